//! Pure Rust image processing backend, statically linked into the binary.
//! No system libraries are needed.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Identify | `ImageReader::with_guessed_format` + `into_dimensions` (header only) |
//! | Decode (JPEG, PNG, WebP) | `image` crate (pure Rust decoders) |
//! | Resize (fit) | `DynamicImage::resize` with `Lanczos3` filter |
//! | Resize (cover) | `DynamicImage::resize_to_fill` |
//! | Resize (transform) | `DynamicImage::resize_exact` |
//! | Encode → JPEG | `JpegEncoder::new_with_quality` |
//! | Encode → PNG, WebP | `DynamicImage::save_with_format` (lossless) |

use super::backend::{BackendError, Dimensions, ImageBackend, ImageHeader};
use super::params::{FillType, ResizeParams};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::path::Path;

/// Extensions the backend can decode and encode.
const SUPPORTED: &[(&str, ImageFormat)] = &[
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("webp", ImageFormat::WebP),
];

/// Returns the set of image file extensions that have working decoders compiled in.
pub fn supported_input_extensions() -> Vec<&'static str> {
    SUPPORTED
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled())
        .map(|(ext, _)| *ext)
        .collect()
}

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn open(path: &Path) -> Result<ImageReader<std::io::BufReader<std::fs::File>>, BackendError> {
    ImageReader::open(path)
        .map_err(BackendError::Io)?
        .with_guessed_format()
        .map_err(BackendError::Io)
}

/// Load and decode an image from disk.
fn load_image(path: &Path) -> Result<DynamicImage, BackendError> {
    open(path)?.decode().map_err(|e| {
        BackendError::ProcessingFailed(format!("Failed to decode {}: {}", path.display(), e))
    })
}

fn output_format(path: &Path) -> Result<ImageFormat, BackendError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    SUPPORTED
        .iter()
        .find(|(candidate, _)| *candidate == ext)
        .map(|(_, fmt)| *fmt)
        .ok_or_else(|| BackendError::ProcessingFailed(format!("Unsupported output format: {ext}")))
}

/// Save a DynamicImage to the given path, inferring format from extension.
fn save_image(img: &DynamicImage, path: &Path, quality: u32) -> Result<(), BackendError> {
    match output_format(path)? {
        ImageFormat::Jpeg => {
            let file = std::fs::File::create(path).map_err(BackendError::Io)?;
            let writer = std::io::BufWriter::new(file);
            let encoder = JpegEncoder::new_with_quality(writer, quality as u8);
            DynamicImage::ImageRgb8(img.to_rgb8())
                .write_with_encoder(encoder)
                .map_err(|e| BackendError::ProcessingFailed(format!("JPEG encode failed: {e}")))
        }
        ImageFormat::WebP => DynamicImage::ImageRgba8(img.to_rgba8())
            .save_with_format(path, ImageFormat::WebP)
            .map_err(|e| BackendError::ProcessingFailed(format!("WebP encode failed: {e}"))),
        format => img
            .save_with_format(path, format)
            .map_err(|e| BackendError::ProcessingFailed(format!("Encode failed: {e}"))),
    }
}

impl ImageBackend for RustBackend {
    fn identify(&self, path: &Path) -> Result<ImageHeader, BackendError> {
        let reader = open(path)?;
        let format = reader.format().ok_or_else(|| {
            BackendError::ProcessingFailed(format!("Unknown image format: {}", path.display()))
        })?;
        let (width, height) = reader.into_dimensions().map_err(|e| {
            BackendError::ProcessingFailed(format!("Failed to read dimensions: {}", e))
        })?;
        Ok(ImageHeader {
            dimensions: Dimensions { width, height },
            mime_type: format.to_mime_type().to_string(),
        })
    }

    fn resize(&self, params: &ResizeParams) -> Result<Dimensions, BackendError> {
        // Fail before decoding when the output can't be written anyway.
        output_format(&params.output)?;
        let img = load_image(&params.source)?;
        let resized = match params.fill {
            FillType::Fit => img.resize(params.width, params.height, FilterType::Lanczos3),
            FillType::Cover => img.resize_to_fill(params.width, params.height, FilterType::Lanczos3),
            FillType::Transform => {
                img.resize_exact(params.width, params.height, FilterType::Lanczos3)
            }
        };
        save_image(&resized, &params.output, params.quality.value())?;
        Ok(Dimensions {
            width: resized.width(),
            height: resized.height(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::params::Quality;
    use crate::test_helpers::write_jpeg;

    fn resize_params(source: &Path, output: &Path, width: u32, height: u32, fill: FillType) -> ResizeParams {
        ResizeParams {
            source: source.to_path_buf(),
            output: output.to_path_buf(),
            width,
            height,
            fill,
            quality: Quality::new(85),
        }
    }

    #[test]
    fn supported_extensions_match_decodable_formats() {
        let exts = supported_input_extensions();
        for expected in &["jpg", "jpeg", "png", "webp"] {
            assert!(
                exts.contains(expected),
                "expected {expected} in supported extensions"
            );
        }
    }

    #[test]
    fn identify_synthetic_jpeg() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("test.jpg");
        write_jpeg(&path, 200, 150);

        let header = RustBackend::new().identify(&path).unwrap();
        assert_eq!(header.dimensions, Dimensions { width: 200, height: 150 });
        assert_eq!(header.mime_type, "image/jpeg");
    }

    #[test]
    fn identify_sniffs_format_not_extension() {
        let tmp = tempfile::TempDir::new().unwrap();
        let jpeg = tmp.path().join("a.jpg");
        write_jpeg(&jpeg, 10, 10);
        let png = tmp.path().join("b.png");
        load_image(&jpeg).unwrap().save_with_format(&png, ImageFormat::Png).unwrap();
        let misnamed = tmp.path().join("really-a-png.jpg");
        std::fs::rename(&png, &misnamed).unwrap();

        let header = RustBackend::new().identify(&misnamed).unwrap();
        assert_eq!(header.mime_type, "image/png");
    }

    #[test]
    fn identify_nonexistent_file_errors() {
        let backend = RustBackend::new();
        let result = backend.identify(Path::new("/nonexistent/image.jpg"));
        assert!(result.is_err());
    }

    #[test]
    fn resize_fit_keeps_aspect_ratio() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("source.jpg");
        write_jpeg(&source, 400, 300);
        let output = tmp.path().join("resized.jpg");

        let dims = RustBackend::new()
            .resize(&resize_params(&source, &output, 200, 200, FillType::Fit))
            .unwrap();
        assert_eq!(dims, Dimensions { width: 200, height: 150 });
        assert_eq!(image::image_dimensions(&output).unwrap(), (200, 150));
    }

    #[test]
    fn resize_cover_crops_to_exact_box() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("source.jpg");
        write_jpeg(&source, 800, 600);
        let output = tmp.path().join("thumb.png");

        let dims = RustBackend::new()
            .resize(&resize_params(&source, &output, 100, 120, FillType::Cover))
            .unwrap();
        assert_eq!(dims, Dimensions { width: 100, height: 120 });
        assert_eq!(image::image_dimensions(&output).unwrap(), (100, 120));
    }

    #[test]
    fn resize_transform_stretches() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("source.jpg");
        write_jpeg(&source, 100, 100);
        let output = tmp.path().join("wide.webp");

        let dims = RustBackend::new()
            .resize(&resize_params(&source, &output, 80, 20, FillType::Transform))
            .unwrap();
        assert_eq!(dims, Dimensions { width: 80, height: 20 });
        assert!(std::fs::metadata(&output).unwrap().len() > 0);
    }

    #[test]
    fn resize_unsupported_format_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("source.jpg");
        write_jpeg(&source, 100, 100);
        let output = tmp.path().join("output.avif");

        let result = RustBackend::new().resize(&resize_params(&source, &output, 50, 50, FillType::Fit));
        assert!(result.is_err());
        assert!(!output.exists());
    }
}
