//! Where content ends up: render paths on disk and the URLs pointing at them.
//!
//! A node's render path is derived from the content tree:
//!
//! 1. a node declaring [`Content::custom_render_path`] uses it as is;
//! 2. the root renders at the root;
//! 3. a node its parent names as [`Content::content_symlink`] renders at
//!    the parent's own location;
//! 4. anything else renders below its parent, under its
//!    [`Content::slug`] or the last segment of its content path.
//!
//! The symlink target must be a direct child, which validation enforces,
//! so the recursion always terminates at the root.
//!
//! URI reference paths put the configured prefix in front of a render
//! path: `path_prefix` for content, `static_prefix` for static assets.
//!
//! ```text
//! content path   blog/010.hello.page     (identity)
//! render path    blog/hello/             (slug applied)
//! file           dist/blog/hello/index.html
//! href           /docs/blog/hello/       (path_prefix = "docs/")
//! absolute       https://example.org/docs/blog/hello/
//! ```
//!
//! [`Content::custom_render_path`]: crate::content::Content::custom_render_path
//! [`Content::content_symlink`]: crate::content::Content::content_symlink
//! [`Content::slug`]: crate::content::Content::slug

pub mod output;

pub use output::{BasicTheme, FileOutputRenderer, OutputType, RenderContext, RenderSummary, Theme};

use crate::cache::CacheError;
use crate::content::Node;
use crate::loader::{LoaderContext, LookupError};
use crate::path::{ContentPath, RenderPath, RenderPathType, UriKind, UriReferencePath};
use crate::slug::slugify;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("parent of {path} is not loaded")]
    MissingParent { path: ContentPath },
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("invalid URL configuration: {0}")]
    Url(#[from] url::ParseError),
    #[error("{0}")]
    Theme(String),
    #[error("refusing to clear {}: it contains the content directory", .0.display())]
    UnsafeTarget(PathBuf),
    #[error("error while rendering into /{render_path}: {source}")]
    Rendering {
        render_path: RenderPath,
        #[source]
        source: Box<RenderError>,
    },
}

pub(crate) fn io_error(path: &std::path::Path) -> impl FnOnce(std::io::Error) -> RenderError + '_ {
    move |source| RenderError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// How public URLs are formed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UrlConfig {
    pub protocol: String,
    /// Host name, optionally with a port.
    pub host: String,
    /// Prefix of every content URL, e.g. `docs/`.
    pub path_prefix: String,
    /// Prefix of static asset URLs. Defaults to `path_prefix`.
    pub static_prefix: Option<String>,
}

impl Default for UrlConfig {
    fn default() -> Self {
        Self {
            protocol: "https".to_string(),
            host: "example.org".to_string(),
            path_prefix: String::new(),
            static_prefix: None,
        }
    }
}

impl UrlConfig {
    pub fn static_prefix(&self) -> &str {
        self.static_prefix.as_deref().unwrap_or(&self.path_prefix)
    }

    /// `protocol://host/`, checked for validity.
    pub fn base_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&format!("{}://{}/", self.protocol, self.host))
    }
}

/// Public path of `render_path`, with the prefix its kind calls for.
pub fn uri_from_render_path(render_path: &RenderPath, config: &UrlConfig) -> UriReferencePath {
    let prefix = match render_path.kind() {
        RenderPathType::Content => config.path_prefix.as_str(),
        RenderPathType::StaticAsset => config.static_prefix(),
    };
    render_path.transform::<UriKind>().prefixed(prefix)
}

/// Full URL of `uri` on the configured host.
///
/// The path is joined as `./<path>` so a first segment containing a colon
/// stays a path instead of being read as a scheme.
pub fn absolute_url(uri: &UriReferencePath, config: &UrlConfig) -> Result<String, url::ParseError> {
    let relative = format!("./{}", uri.to_string_external());
    Ok(config.base_url()?.join(&relative)?.to_string())
}

/// Host-relative URL: `/` for the root, `/<path>` otherwise.
pub fn host_relative_url(uri: &UriReferencePath) -> String {
    if uri.is_root() {
        "/".to_string()
    } else {
        format!("/{}", uri.to_string_external())
    }
}

/// Resolves render paths and links for a finished loader context.
pub struct Renderer<'a> {
    loader: &'a LoaderContext,
    url: UrlConfig,
}

impl<'a> Renderer<'a> {
    pub fn new(loader: &'a LoaderContext, url: UrlConfig) -> Self {
        Self { loader, url }
    }

    pub fn loader(&self) -> &'a LoaderContext {
        self.loader
    }

    pub fn url_config(&self) -> &UrlConfig {
        &self.url
    }

    pub fn find_render_path(&self, node: &Node) -> Result<RenderPath, RenderError> {
        let content = node.get();
        if let Some(path) = content.custom_render_path() {
            return Ok(path);
        }
        let path = self.loader.find_content_path(node)?;
        if path.is_root() {
            return Ok(RenderPath::root());
        }
        let parent = self.parent_of(&path)?;
        let parent_render_path = self.find_render_path(parent)?;
        if parent.get().content_symlink().as_ref() == Some(node) {
            return Ok(parent_render_path);
        }
        let segment = match content.slug() {
            Some(slug) => slug.to_string(),
            None => content
                .slug_source()
                .map(slugify)
                .filter(|slug| !slug.is_empty())
                .unwrap_or_else(|| path.name()),
        };
        Ok(parent_render_path.child(&segment))
    }

    /// True if `node` renders at its parent's location.
    pub fn is_symlink_target(&self, node: &Node) -> Result<bool, RenderError> {
        let path = self.loader.find_content_path(node)?;
        if path.is_root() {
            return Ok(false);
        }
        let parent = self.parent_of(&path)?;
        Ok(parent.get().content_symlink().as_ref() == Some(node))
    }

    fn parent_of(&self, path: &ContentPath) -> Result<&'a Node, RenderError> {
        self.loader
            .content_by_path(&path.parent())
            .ok_or_else(|| RenderError::MissingParent { path: path.clone() })
    }

    pub fn find_uri_reference_path(&self, node: &Node) -> Result<UriReferencePath, RenderError> {
        Ok(uri_from_render_path(&self.find_render_path(node)?, &self.url))
    }

    /// Link to `node`: host-relative, or a full URL if `absolute`.
    pub fn href(&self, node: &Node, absolute: bool) -> Result<String, RenderError> {
        self.href_for_uri(&self.find_uri_reference_path(node)?, absolute)
    }

    pub fn href_for_render_path(
        &self,
        render_path: &RenderPath,
        absolute: bool,
    ) -> Result<String, RenderError> {
        self.href_for_uri(&uri_from_render_path(render_path, &self.url), absolute)
    }

    fn href_for_uri(&self, uri: &UriReferencePath, absolute: bool) -> Result<String, RenderError> {
        if absolute {
            Ok(absolute_url(uri, &self.url)?)
        } else {
            Ok(host_relative_url(uri))
        }
    }
}
