//! Cached image identification and resizing.
//!
//! Both regions are keyed by a [`SourceFingerprint`]: the asset's content
//! path plus the size and modification time of its file. Editing an image
//! changes the fingerprint; rendering it from a different page does not.

use super::{CacheError, CacheStore, CacheValue, io_error};
use crate::content::{FileAsset, ImageAsset};
use crate::imaging::{FillType, ImageBackend, Quality, ResizeParams};
use crate::path::ContentPath;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing::debug;

pub const IMAGE_INFO_REGION: &str = "image-info";
pub const IMAGE_RESIZE_REGION: &str = "image-resize";

/// Dimensions and format of a source image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
}

impl CacheValue for ImageInfo {}

/// What a cached image result was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFingerprint {
    pub path: ContentPath,
    pub size: u64,
    /// Modification time in nanoseconds since the epoch, 0 if unknown.
    pub modified: u64,
}

impl SourceFingerprint {
    pub fn of(asset: &FileAsset) -> Result<Self, CacheError> {
        let meta = fs::metadata(asset.file()).map_err(io_error(asset.file()))?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Ok(Self {
            path: asset.path().clone(),
            size: meta.len(),
            modified,
        })
    }
}

/// One step of an image transformation chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Transform {
    Resize {
        width: u32,
        height: u32,
        fill: FillType,
    },
}

#[derive(Serialize)]
struct ResizeKey<'a> {
    source: SourceFingerprint,
    transforms: &'a [Transform],
    quality: Quality,
}

/// A transformed image stored in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizedImage {
    pub blob: String,
    /// Suggested output file name, e.g. `cover_400x300_photo.jpg`.
    pub file_name: String,
    pub width: u32,
    pub height: u32,
}

impl CacheValue for ResizedImage {
    fn blob(&self) -> Option<&str> {
        Some(&self.blob)
    }
}

/// Image operations backed by the build cache.
#[derive(Clone)]
pub struct ImageCache {
    store: Arc<CacheStore>,
    backend: Arc<dyn ImageBackend>,
    quality: Quality,
}

impl ImageCache {
    pub fn new(store: Arc<CacheStore>, backend: Arc<dyn ImageBackend>) -> Self {
        Self {
            store,
            backend,
            quality: Quality::default(),
        }
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Identify `image` without decoding it. Prefer [`ImageAsset::info`],
    /// which also memoizes per asset.
    pub fn image_info(&self, image: &ImageAsset) -> Result<ImageInfo, CacheError> {
        let asset = image.asset();
        let key = SourceFingerprint::of(asset)?;
        self.store
            .region::<SourceFingerprint, ImageInfo>(IMAGE_INFO_REGION)
            .get_or_compute(&key, || {
                debug!(image = %asset.path(), "identifying image");
                let header = self.backend.identify(asset.file())?;
                Ok(ImageInfo {
                    width: header.dimensions.width,
                    height: header.dimensions.height,
                    mime_type: header.mime_type,
                })
            })
    }

    pub fn resize(
        &self,
        image: &ImageAsset,
        width: u32,
        height: u32,
        fill: FillType,
    ) -> Result<ResizedImage, CacheError> {
        self.transform(image, &[Transform::Resize { width, height, fill }])
    }

    /// Apply `transforms` in order. An empty chain stores the source as is.
    pub fn transform(
        &self,
        image: &ImageAsset,
        transforms: &[Transform],
    ) -> Result<ResizedImage, CacheError> {
        let key = ResizeKey {
            source: SourceFingerprint::of(image.asset())?,
            transforms,
            quality: self.quality,
        };
        self.store
            .region::<ResizeKey<'_>, ResizedImage>(IMAGE_RESIZE_REGION)
            .get_or_compute(&key, || self.run(image, transforms))
    }

    fn run(&self, image: &ImageAsset, transforms: &[Transform]) -> Result<ResizedImage, CacheError> {
        let asset = image.asset();
        let blobs = self.store.blobs();
        let name = asset.name();

        if transforms.is_empty() {
            let bytes = fs::read(asset.file()).map_err(io_error(asset.file()))?;
            let info = image.info(self)?;
            return Ok(ResizedImage {
                blob: blobs.store_bytes(&name, &bytes)?,
                file_name: name,
                width: info.width,
                height: info.height,
            });
        }

        debug!(image = %asset.path(), steps = transforms.len(), "transforming image");
        let mut source = asset.file().to_path_buf();
        let mut scratch: Option<PathBuf> = None;
        let mut dims = None;
        let mut file_name = name;
        for transform in transforms {
            let Transform::Resize { width, height, fill } = *transform;
            file_name = step_name(transform, &file_name);
            let output = blobs.scratch_path(&file_name);
            let result = self.backend.resize(&ResizeParams {
                source: source.clone(),
                output: output.clone(),
                width,
                height,
                fill,
                quality: self.quality,
            });
            if let Some(previous) = scratch.take() {
                let _ = fs::remove_file(previous);
            }
            if result.is_err() {
                let _ = fs::remove_file(&output);
            }
            dims = Some(result?);
            source = output.clone();
            scratch = Some(output);
        }

        let (Some(path), Some(dims)) = (scratch, dims) else {
            return Err(CacheError::Compute(format!(
                "transform chain for {} produced no output",
                asset.path()
            )));
        };
        Ok(ResizedImage {
            blob: blobs.store_moved(&file_name, &path)?,
            file_name,
            width: dims.width,
            height: dims.height,
        })
    }
}

/// Name of the output of `transform` applied to the file called `name`.
/// Each step wraps the previous name, so the whole chain shows.
fn step_name(transform: &Transform, name: &str) -> String {
    match transform {
        Transform::Resize { width, height, fill } => format!("{fill}_{width}x{height}_{name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::Dimensions;
    use crate::imaging::backend::tests::MockBackend;
    use crate::test_helpers::write_tree;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        cache_dir: PathBuf,
        image: ImageAsset,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        write_tree(tmp.path(), &[("content/photo.jpg", "not really a jpeg")]);
        let asset = FileAsset::new(
            ContentPath::parse_leaf_path("photo.jpg").unwrap(),
            tmp.path().join("content/photo.jpg"),
        );
        Fixture {
            cache_dir: tmp.path().join("cache"),
            _tmp: tmp,
            image: ImageAsset::new(asset),
        }
    }

    fn cache_with(dir: &std::path::Path, backend: Arc<MockBackend>) -> ImageCache {
        ImageCache::new(Arc::new(CacheStore::open(dir).unwrap()), backend)
    }

    // =========================================================================
    // image_info
    // =========================================================================

    #[test]
    fn image_info_is_cached_across_stores() {
        let fx = fixture();
        let backend = Arc::new(MockBackend::with_dimensions(vec![Dimensions {
            width: 640,
            height: 480,
        }]));
        {
            let images = cache_with(&fx.cache_dir, backend.clone());
            let info = images.image_info(&fx.image).unwrap();
            assert_eq!(info.width, 640);
            assert_eq!(info.mime_type, "image/jpeg");
        }
        // The mock has no dimensions left, so a second identify would fail.
        let images = cache_with(&fx.cache_dir, backend.clone());
        let info = images.image_info(&fx.image).unwrap();
        assert_eq!(info.height, 480);
        assert_eq!(backend.get_operations().len(), 1);
    }

    #[test]
    fn asset_info_is_memoized() {
        let fx = fixture();
        let backend = Arc::new(MockBackend::with_dimensions(vec![Dimensions {
            width: 10,
            height: 20,
        }]));
        let images = cache_with(&fx.cache_dir, backend.clone());
        assert_eq!(fx.image.info(&images).unwrap().width, 10);
        assert_eq!(fx.image.info(&images).unwrap().width, 10);
        assert_eq!(images.store().stats()[IMAGE_INFO_REGION].total(), 1);
    }

    #[test]
    fn missing_source_is_an_io_error() {
        let tmp = TempDir::new().unwrap();
        let image = ImageAsset::new(FileAsset::new(
            ContentPath::parse_leaf_path("gone.jpg").unwrap(),
            tmp.path().join("gone.jpg"),
        ));
        let images = cache_with(&tmp.path().join("cache"), Arc::new(MockBackend::new()));
        assert!(matches!(
            images.image_info(&image),
            Err(CacheError::Io { .. })
        ));
    }

    // =========================================================================
    // resize / transform
    // =========================================================================

    #[test]
    fn resize_runs_backend_once() {
        let fx = fixture();
        let backend = Arc::new(MockBackend::new());
        let images = cache_with(&fx.cache_dir, backend.clone());

        let first = images.resize(&fx.image, 200, 100, FillType::Cover).unwrap();
        let second = images.resize(&fx.image, 200, 100, FillType::Cover).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.file_name, "cover_200x100_photo.jpg");
        assert_eq!((first.width, first.height), (200, 100));
        assert!(images.store().blobs().exists(&first.blob));
        assert_eq!(backend.resize_count(), 1);
    }

    #[test]
    fn resize_survives_reopen() {
        let fx = fixture();
        let backend = Arc::new(MockBackend::new());
        {
            let images = cache_with(&fx.cache_dir, backend.clone());
            images.resize(&fx.image, 50, 50, FillType::Fit).unwrap();
        }
        let images = cache_with(&fx.cache_dir, backend.clone());
        images.resize(&fx.image, 50, 50, FillType::Fit).unwrap();
        assert_eq!(backend.resize_count(), 1);
    }

    #[test]
    fn deleted_blob_is_recomputed() {
        let fx = fixture();
        let backend = Arc::new(MockBackend::new());
        let images = cache_with(&fx.cache_dir, backend.clone());

        let first = images.resize(&fx.image, 64, 64, FillType::Fit).unwrap();
        fs::remove_file(images.store().blobs().path(&first.blob)).unwrap();
        let second = images.resize(&fx.image, 64, 64, FillType::Fit).unwrap();
        assert!(images.store().blobs().exists(&second.blob));
        assert_eq!(backend.resize_count(), 2);
    }

    #[test]
    fn transform_order_is_part_of_the_key() {
        let fx = fixture();
        let backend = Arc::new(MockBackend::new());
        let images = cache_with(&fx.cache_dir, backend.clone());
        let a = Transform::Resize {
            width: 100,
            height: 100,
            fill: FillType::Fit,
        };
        let b = Transform::Resize {
            width: 50,
            height: 20,
            fill: FillType::Transform,
        };

        let ab = images.transform(&fx.image, &[a, b]).unwrap();
        let ba = images.transform(&fx.image, &[b, a]).unwrap();
        assert_eq!(ab.file_name, "transform_50x20_fit_100x100_photo.jpg");
        assert_eq!(ba.file_name, "fit_100x100_transform_50x20_photo.jpg");
        assert_eq!(backend.resize_count(), 4);
    }

    #[test]
    fn chains_ending_in_the_same_step_get_distinct_names() {
        let fx = fixture();
        let images = cache_with(&fx.cache_dir, Arc::new(MockBackend::new()));
        let last = Transform::Resize {
            width: 40,
            height: 40,
            fill: FillType::Cover,
        };
        let first = |width| Transform::Resize {
            width,
            height: width,
            fill: FillType::Fit,
        };

        let small = images.transform(&fx.image, &[first(100), last]).unwrap();
        let large = images.transform(&fx.image, &[first(400), last]).unwrap();
        assert_eq!(small.file_name, "cover_40x40_fit_100x100_photo.jpg");
        assert_ne!(small.file_name, large.file_name);
        let single = images.resize(&fx.image, 40, 40, FillType::Cover).unwrap();
        assert_eq!(single.file_name, "cover_40x40_photo.jpg");
    }

    #[test]
    fn changed_source_is_recomputed() {
        let fx = fixture();
        let backend = Arc::new(MockBackend::new());
        let images = cache_with(&fx.cache_dir, backend.clone());

        images.resize(&fx.image, 10, 10, FillType::Fit).unwrap();
        fs::write(fx.image.asset().file(), "a different, longer image body").unwrap();
        images.resize(&fx.image, 10, 10, FillType::Fit).unwrap();
        assert_eq!(backend.resize_count(), 2);
    }

    #[test]
    fn empty_chain_stores_source() {
        let fx = fixture();
        let backend = Arc::new(MockBackend::with_dimensions(vec![Dimensions {
            width: 3,
            height: 4,
        }]));
        let images = cache_with(&fx.cache_dir, backend.clone());

        let stored = images.transform(&fx.image, &[]).unwrap();
        assert_eq!(stored.file_name, "photo.jpg");
        assert_eq!((stored.width, stored.height), (3, 4));
        let bytes = fs::read(images.store().blobs().path(&stored.blob)).unwrap();
        assert_eq!(bytes, b"not really a jpeg");
        assert_eq!(backend.resize_count(), 0);
    }
}
