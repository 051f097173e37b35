//! Files shipped alongside content: downloads, images, stylesheets.
//!
//! An asset is declared by file name in a node's `_index.yml` and lives in
//! that node's directory. Its identity is a leaf [`ContentPath`] below the
//! declaring node; the node owning that parent path is the asset's
//! *container* and is looked up during validation.

use super::{Node, Walk, Walker};
use crate::cache::CacheError;
use crate::cache::image::{ImageCache, ImageInfo};
use crate::loader::ValidationContext;
use crate::path::ContentPath;
use parking_lot::RwLock;
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

struct Inner {
    path: ContentPath,
    file: PathBuf,
    container: RwLock<Option<Node>>,
}

#[derive(Clone)]
pub struct FileAsset(Arc<Inner>);

impl FileAsset {
    pub(crate) fn new(path: ContentPath, file: PathBuf) -> Self {
        Self(Arc::new(Inner {
            path,
            file,
            container: RwLock::new(None),
        }))
    }

    pub fn path(&self) -> &ContentPath {
        &self.0.path
    }

    /// Location of the source file on disk.
    pub fn file(&self) -> &Path {
        &self.0.file
    }

    pub fn name(&self) -> String {
        self.0.path.name()
    }

    /// Node owning the asset's directory, set once validation ran.
    pub fn container(&self) -> Option<Node> {
        self.0.container.read().clone()
    }

    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub(crate) fn validate(&self, cx: &ValidationContext<'_>) -> Result<(), String> {
        let parent = self.0.path.parent();
        let container = cx.content_by_path(&parent).cloned();
        let found = container.is_some();
        *self.0.container.write() = container;
        if found {
            Ok(())
        } else {
            Err(format!(
                "Unable to find parent of file asset {}",
                self.0.path
            ))
        }
    }
}

impl fmt::Debug for FileAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileAsset({})", self.0.path)
    }
}

impl Walk for FileAsset {
    fn walk(&self, walker: &mut Walker) {
        walker.asset(self);
    }
}

impl Serialize for FileAsset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.path.serialize(serializer)
    }
}

/// A [`FileAsset`] known to be an image. Dimensions and format are read
/// lazily, at most once per asset, through the build cache.
#[derive(Clone)]
pub struct ImageAsset {
    asset: FileAsset,
    info: Arc<OnceLock<ImageInfo>>,
}

impl ImageAsset {
    pub(crate) fn new(asset: FileAsset) -> Self {
        Self {
            asset,
            info: Arc::new(OnceLock::new()),
        }
    }

    pub fn asset(&self) -> &FileAsset {
        &self.asset
    }

    pub fn info(&self, images: &ImageCache) -> Result<ImageInfo, CacheError> {
        if let Some(info) = self.info.get() {
            return Ok(info.clone());
        }
        let info = images.image_info(self)?;
        Ok(self.info.get_or_init(|| info).clone())
    }
}

impl fmt::Debug for ImageAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageAsset({})", self.asset.path())
    }
}

impl Walk for ImageAsset {
    fn walk(&self, walker: &mut Walker) {
        walker.asset(&self.asset);
    }
}
