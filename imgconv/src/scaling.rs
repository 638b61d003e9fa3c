//! Target sizes, aspect-preserving scaling and density compensation

use crate::error::{ConvertError, Result};

/// Density ImageMagick assumes for vector input when none is given.
pub const BASELINE_DPI: u32 = 96;

/// Density used when a vector document's size can't be read. It is what
/// rasterizes a 16x16 document cleanly at 512x512.
pub const FALLBACK_VECTOR_DPI: u32 = 3072;

/// Requested output size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetSize {
    /// Keep the source's intrinsic size (requested as -1x-1).
    Native,
    Exact { width: u32, height: u32 },
}

impl TargetSize {
    /// Validate a raw width/height pair. Both must be positive, or both -1.
    pub fn new(width: i64, height: i64) -> Result<Self> {
        match (width, height) {
            (-1, -1) => Ok(TargetSize::Native),
            (w, h) if w > 0 && h > 0 && w <= u32::MAX as i64 && h <= u32::MAX as i64 => {
                Ok(TargetSize::Exact {
                    width: w as u32,
                    height: h as u32,
                })
            }
            _ => Err(ConvertError::InvalidDimensions { width, height }),
        }
    }

    pub fn exact(&self) -> Option<(u32, u32)> {
        match *self {
            TargetSize::Native => None,
            TargetSize::Exact { width, height } => Some((width, height)),
        }
    }
}

/// Scale `(width, height)` so the larger side equals `max_dimension`,
/// keeping the aspect ratio. The smaller side is truncated, but never
/// drops below 1.
///
/// `width` and `height` must be non-zero; callers get them from
/// [`crate::svg_metrics`], which only ever returns positive sizes.
///
/// ```
/// use imgconv::scaling::scale_with_aspect;
/// assert_eq!(scale_with_aspect(10, 5, 512), (512, 256));
/// ```
pub fn scale_with_aspect(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    debug_assert!(width > 0 && height > 0, "source dimensions must be non-zero");

    let w_ratio = width as f64 / height as f64;
    let h_ratio = height as f64 / width as f64;
    let max = max_dimension as f64;

    if w_ratio < h_ratio {
        (((max * w_ratio) as u32).max(1), max_dimension)
    } else {
        (max_dimension, ((max * h_ratio) as u32).max(1))
    }
}

/// Density for rasterizing a vector source of `src` size into `dst` pixels
/// with a tool that otherwise renders at [`BASELINE_DPI`].
///
/// This is a heuristic, not an exact conversion: it takes the whole number
/// of times the source's larger side fits into each target side, picks the
/// smaller factor, and multiplies the baseline by it. The result is floored
/// at the baseline: a downscale has factor 0, and a plain `96 * factor`
/// would ask for density 0, so it renders at the tool's default instead.
///
/// Any non-positive argument yields the baseline.
pub fn compute_dpi(src_width: i64, src_height: i64, dst_width: i64, dst_height: i64) -> u32 {
    if src_width <= 0 || src_height <= 0 || dst_width <= 0 || dst_height <= 0 {
        return BASELINE_DPI;
    }

    let max_ref = src_width.max(src_height);
    let factor = (dst_width / max_ref).min(dst_height / max_ref);
    let dpi = (BASELINE_DPI as i64).saturating_mul(factor);
    dpi.clamp(BASELINE_DPI as i64, u32::MAX as i64) as u32
}
