//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

use super::params::FillType;

/// Largest size with the source aspect ratio that fits inside `bounds`.
///
/// ```
/// # use sitegraph::imaging::calculate_fit_dimensions;
/// assert_eq!(calculate_fit_dimensions((800, 600), (400, 400)), (400, 300));
/// ```
pub fn calculate_fit_dimensions(source: (u32, u32), bounds: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (max_w, max_h) = bounds;
    if src_w == 0 || src_h == 0 {
        return (0, 0);
    }

    let scale = (max_w as f64 / src_w as f64).min(max_h as f64 / src_h as f64);
    let w = ((src_w as f64 * scale).round() as u32).max(1);
    let h = ((src_h as f64 * scale).round() as u32).max(1);
    (w, h)
}

/// Calculate dimensions needed to fill a target area (resize before crop).
///
/// Returns dimensions that completely cover the target area while maintaining
/// the source aspect ratio. One dimension will match exactly, the other may exceed.
///
/// # Arguments
/// * `source` - Original image dimensions (width, height)
/// * `target` - Target area dimensions (width, height)
///
/// # Returns
/// * `(width, height)` - Fill dimensions (at least one matches target)
pub fn calculate_fill_dimensions(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;

    let src_aspect = src_w as f64 / src_h as f64;
    let tgt_aspect = tgt_w as f64 / tgt_h as f64;

    if src_aspect > tgt_aspect {
        // Source is wider: height will match, width will exceed
        let h = tgt_h;
        let w = (h as f64 * src_aspect).round() as u32;
        (w, h)
    } else {
        // Source is taller: width will match, height will exceed
        let w = tgt_w;
        let h = (w as f64 / src_aspect).round() as u32;
        (w, h)
    }
}

/// Final output size of resizing `source` into `bounds` with `fill`.
pub fn calculate_output_dimensions(
    source: (u32, u32),
    bounds: (u32, u32),
    fill: FillType,
) -> (u32, u32) {
    match fill {
        FillType::Fit => calculate_fit_dimensions(source, bounds),
        FillType::Cover | FillType::Transform => bounds,
    }
}
