//! Image processing in pure Rust, on top of the `image` crate.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | header sniffing via `image::ImageReader` |
//! | **Resize** | Lanczos3, with fit / cover / transform fill modes |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//!
//! Caching of results lives in [`crate::cache::image`]; this module never
//! decides whether work is needed.

pub mod backend;
mod calculations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, ImageBackend, ImageHeader};
pub use calculations::{
    calculate_fill_dimensions, calculate_fit_dimensions, calculate_output_dimensions,
};
pub use params::{FillType, Quality, ResizeParams};
pub use rust_backend::RustBackend;
