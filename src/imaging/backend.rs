//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the two operations the build cache
//! needs: identify and resize.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), pure Rust and
//! statically linked.

use super::params::ResizeParams;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Result of an identify operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    pub dimensions: Dimensions,
    pub mime_type: String,
}

/// Trait for image processing backends.
///
/// Backends are shared across rayon workers, hence `Send + Sync`.
pub trait ImageBackend: Send + Sync {
    /// Read dimensions and format without decoding pixel data.
    fn identify(&self, path: &Path) -> Result<ImageHeader, BackendError>;

    /// Execute a resize operation and return the output dimensions.
    fn resize(&self, params: &ResizeParams) -> Result<Dimensions, BackendError>;
}
