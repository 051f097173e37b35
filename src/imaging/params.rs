//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the [`ImageCache`](crate::cache::image::ImageCache)
//! (which decides what to produce and whether it already exists) and the
//! [`backend`](super::backend) (which does the pixel work), so a mock
//! backend can stand in for tests.
//!
//! ## Types
//!
//! - [`Quality`]: lossy encoding quality (1–100, default 90). Clamped on construction.
//! - [`FillType`]: how a source is mapped onto a target box.
//! - [`ResizeParams`]: everything one resize needs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// How an image is fitted into a `width × height` box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillType {
    /// Scale to fit inside the box, keeping the aspect ratio.
    Fit,
    /// Scale to cover the box, keeping the aspect ratio, then center-crop.
    Cover,
    /// Stretch to exactly the box.
    Transform,
}

impl fmt::Display for FillType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FillType::Fit => "fit",
            FillType::Cover => "cover",
            FillType::Transform => "transform",
        })
    }
}

/// Parameters for a single resize operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResizeParams {
    pub source: PathBuf,
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fill: FillType,
    pub quality: Quality,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_clamps_to_valid_range() {
        assert_eq!(Quality::new(0).value(), 1);
        assert_eq!(Quality::new(50).value(), 50);
        assert_eq!(Quality::new(150).value(), 100);
    }

    #[test]
    fn quality_default_is_90() {
        assert_eq!(Quality::default().value(), 90);
    }

    #[test]
    fn fill_type_names() {
        assert_eq!(FillType::Cover.to_string(), "cover");
        assert_eq!(serde_json::to_string(&FillType::Fit).unwrap(), "\"fit\"");
    }
}
