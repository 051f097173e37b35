//! Tag → factory dispatch for content types.
//!
//! Type identifiers in file names (`about.page`, `@title.md`) are looked up
//! in a [`TypeRegistry`] built once at startup. Two kinds of types exist:
//!
//! - [`Nestable`] types are directories. They declare their named properties
//!   and build themselves from a deserialized `_index.yml` plus the already
//!   loaded child nodes.
//! - [`Parsable`] types are single files parsed from their raw contents.
//!
//! ```rust
//! # use sitegraph::content::TypeRegistry;
//! let registry = TypeRegistry::with_builtin_types();
//! assert!(registry.nestable("page").is_some());
//! assert!(registry.parsable("md").is_some());
//! ```

use super::{CHILDREN, Content, FileAsset, ImageAsset, Node};
use super::{Folder, Markdown, Page, Website};
use crate::git::CommitInfo;
use crate::loader::{LoadError, LoadedChild};
use crate::path::ContentPath;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path};
use std::sync::Arc;

/// Content types a property accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeSet {
    Any,
    Only(&'static [&'static str]),
}

impl TypeSet {
    pub fn accepts(&self, tag: &str) -> bool {
        match self {
            TypeSet::Any => true,
            TypeSet::Only(tags) => tags.iter().any(|t| *t == tag),
        }
    }

    /// The only accepted tag, used for directories without a type suffix.
    pub fn single(&self) -> Option<&'static str> {
        match self {
            TypeSet::Only([tag]) => Some(*tag),
            _ => None,
        }
    }
}

/// A named slot on a nestable type that entries on disk can fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertySpec {
    pub name: &'static str,
    pub accepts: TypeSet,
    pub required: bool,
}

impl PropertySpec {
    pub const fn optional(name: &'static str, accepts: TypeSet) -> Self {
        Self {
            name,
            accepts,
            required: false,
        }
    }

    pub const fn required(name: &'static str, accepts: TypeSet) -> Self {
        Self {
            name,
            accepts,
            required: true,
        }
    }

    /// The anonymous `children` group.
    pub const fn children(accepts: TypeSet) -> Self {
        Self::optional(CHILDREN, accepts)
    }
}

/// A directory-backed content type.
pub trait Nestable: Content + Sized {
    const TAG: &'static str;
    /// Shape of `_index.yml`. A missing or empty file deserializes from `{}`.
    type Decl: DeserializeOwned;

    fn properties() -> &'static [PropertySpec] {
        &[]
    }

    fn build(decl: Self::Decl, cx: &mut BuildContext<'_>) -> Result<Self, LoadError>;
}

/// A file-backed content type.
pub trait Parsable: Content + Sized {
    const TAG: &'static str;

    fn parse(file: &Path, path: &ContentPath) -> Result<Self, LoadError>;
}

type BuildFn = fn(serde_yaml::Value, &mut BuildContext<'_>) -> Result<Arc<dyn Content>, LoadError>;
type ParseFn = fn(&Path, &ContentPath) -> Result<Arc<dyn Content>, LoadError>;

pub struct NestableType {
    pub tag: &'static str,
    pub properties: &'static [PropertySpec],
    build: BuildFn,
}

impl NestableType {
    pub fn property(&self, name: &str) -> Option<&PropertySpec> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub(crate) fn build(
        &self,
        declaration: serde_yaml::Value,
        cx: &mut BuildContext<'_>,
    ) -> Result<Arc<dyn Content>, LoadError> {
        (self.build)(declaration, cx)
    }
}

pub struct ParsableType {
    pub tag: &'static str,
    parse: ParseFn,
}

impl ParsableType {
    pub(crate) fn parse(&self, file: &Path, path: &ContentPath) -> Result<Arc<dyn Content>, LoadError> {
        (self.parse)(file, path)
    }
}

fn build_erased<T: Nestable>(
    declaration: serde_yaml::Value,
    cx: &mut BuildContext<'_>,
) -> Result<Arc<dyn Content>, LoadError> {
    let decl: T::Decl =
        serde_yaml::from_value(declaration).map_err(|source| LoadError::Declaration {
            file: cx.declaration_file().to_path_buf(),
            source,
        })?;
    Ok(Arc::new(T::build(decl, cx)?))
}

fn parse_erased<T: Parsable>(file: &Path, path: &ContentPath) -> Result<Arc<dyn Content>, LoadError> {
    Ok(Arc::new(T::parse(file, path)?))
}

/// Closed set of content types known to a loader.
#[derive(Default)]
pub struct TypeRegistry {
    nestable: HashMap<&'static str, NestableType>,
    parsable: HashMap<&'static str, ParsableType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `website`, `folder`, `page` and `md`.
    pub fn with_builtin_types() -> Self {
        let mut registry = Self::new();
        registry
            .register_nestable::<Website>()
            .register_nestable::<Folder>()
            .register_nestable::<Page>()
            .register_parsable::<Markdown>();
        registry
    }

    pub fn register_nestable<T: Nestable>(&mut self) -> &mut Self {
        self.nestable.insert(
            T::TAG,
            NestableType {
                tag: T::TAG,
                properties: T::properties(),
                build: build_erased::<T>,
            },
        );
        self
    }

    pub fn register_parsable<T: Parsable>(&mut self) -> &mut Self {
        self.parsable.insert(
            T::TAG,
            ParsableType {
                tag: T::TAG,
                parse: parse_erased::<T>,
            },
        );
        self
    }

    pub fn nestable(&self, tag: &str) -> Option<&NestableType> {
        self.nestable.get(tag)
    }

    pub fn parsable(&self, tag: &str) -> Option<&ParsableType> {
        self.parsable.get(tag)
    }
}

/// Everything a [`Nestable::build`] call may draw on besides its declaration:
/// the loaded child groups, commit metadata, and asset lookup.
pub struct BuildContext<'a> {
    pub(crate) type_tag: &'static str,
    pub(crate) path: &'a ContentPath,
    pub(crate) dir: &'a Path,
    pub(crate) declaration: &'a Path,
    pub(crate) children: &'a BTreeMap<String, Vec<LoadedChild>>,
    pub(crate) commit: Option<&'a CommitInfo>,
}

impl BuildContext<'_> {
    pub fn path(&self) -> &ContentPath {
        self.path
    }

    pub fn dir(&self) -> &Path {
        self.dir
    }

    pub fn declaration_file(&self) -> &Path {
        self.declaration
    }

    /// All nodes loaded into a property group, in file-name order.
    pub fn children(&self, property: &str) -> Vec<Node> {
        self.children
            .get(property)
            .map(|group| group.iter().map(|c| c.node.clone()).collect())
            .unwrap_or_default()
    }

    pub fn child(&self, property: &str) -> Option<Node> {
        self.children
            .get(property)
            .and_then(|group| group.first())
            .map(|c| c.node.clone())
    }

    pub fn required_child(&self, property: &str) -> Result<Node, LoadError> {
        self.child(property)
            .ok_or_else(|| LoadError::MissingProperty {
                path: self.path.clone(),
                type_tag: self.type_tag.to_string(),
                property: property.to_string(),
            })
    }

    /// Last commit touching this node's declaration file.
    pub fn commit_info(&self) -> Option<CommitInfo> {
        self.commit.cloned()
    }

    /// Resolve a file declared by name in this node's directory. Names are
    /// relative and may only descend into subdirectories.
    pub fn file_asset(&self, name: &str) -> Result<FileAsset, LoadError> {
        let relative = Path::new(name);
        let inside = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if name.is_empty() || !inside {
            return Err(LoadError::InvalidAsset {
                path: self.path.clone(),
                name: name.to_string(),
            });
        }
        let file = self.dir.join(relative);
        if !file.is_file() {
            return Err(LoadError::MissingAsset {
                path: self.path.clone(),
                file,
            });
        }
        let mut parts: Vec<&str> = name.split('/').filter(|s| !s.is_empty()).collect();
        let file_name = parts.pop().unwrap_or_default();
        let path = self.path.resolve(&parts.join("/")).child_leaf(file_name);
        Ok(FileAsset::new(path, file))
    }

    pub fn image_asset(&self, name: &str) -> Result<ImageAsset, LoadError> {
        self.file_asset(name).map(ImageAsset::new)
    }
}
