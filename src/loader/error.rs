use crate::content::NodeId;
use crate::path::ContentPath;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

fn display_path(path: &ContentPath) -> String {
    if path.is_root() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("content root {} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid declaration {}: {source}", .file.display())]
    Declaration {
        file: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to parse {}: {message}", .file.display())]
    Parse { file: PathBuf, message: String },
    #[error("{}: type `{type_tag}` has no property `{property}`", display_path(.path))]
    UnknownProperty {
        path: ContentPath,
        type_tag: String,
        property: String,
    },
    #[error("{}: cannot use type `{requested}` for property `{property}`", display_path(.path))]
    UnresolvedType {
        path: ContentPath,
        property: String,
        requested: String,
    },
    #[error("{}: required property `{property}` of `{type_tag}` is missing", display_path(.path))]
    MissingProperty {
        path: ContentPath,
        type_tag: String,
        property: String,
    },
    #[error("{}: required field `{field}` is not set", display_path(.path))]
    MissingField { path: ContentPath, field: String },
    #[error("{} is declared twice: {} and {}", display_path(.path), .first.display(), .second.display())]
    DuplicatePath {
        path: ContentPath,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("{}: asset {} does not exist", display_path(.path), .file.display())]
    MissingAsset { path: ContentPath, file: PathBuf },
    #[error("{}: asset `{name}` must stay inside its directory", display_path(.path))]
    InvalidAsset { path: ContentPath, name: String },
    #[error("{0} was not loaded from disk and cannot be reloaded")]
    NotReloadable(NodeId),
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
}

/// A single failed check, attributed to the node that declared the
/// offending value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}: {message}", display_path(.path))]
pub struct ValidationError {
    pub path: ContentPath,
    pub message: String,
}

/// Every failure of one validation pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    pub fn errors(&self) -> &[ValidationError] {
        &self.0
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} validation error(s)", self.0.len())?;
        for error in &self.0 {
            write!(f, "\n  {error}")?;
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("content paths are only available once loading finished")]
    StillLoading,
    #[error("node {0} is not registered with the loader context")]
    Unregistered(NodeId),
}
