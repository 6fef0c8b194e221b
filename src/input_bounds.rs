//! Normalized per-feature bounds of an epsilon ball around an image
use crate::bounds::Bounds1;
use crate::error::{PropGenError, Result};
use crate::normalize::Normalization;
use crate::NNVFloat;
use ndarray::{Array1, ArrayView3};

/// Raw pixel range the bounds are clipped to before normalization.
const PIXEL_RANGE: (NNVFloat, NNVFloat) = (0., 1.);

/// Box of the L∞ ball of radius `epsilon` around `image`, clipped to the
/// valid pixel range and mapped through `normalization`, flattened
/// channel-major.
///
/// # Errors
/// If `epsilon` is negative or NaN, or the image channels do not match the
/// normalization
pub fn derive_input_bounds(
    image: &ArrayView3<NNVFloat>,
    epsilon: NNVFloat,
    normalization: &Normalization,
) -> Result<Bounds1> {
    if !(epsilon >= 0.) {
        return Err(PropGenError::InvalidConfig(format!(
            "epsilon must be non-negative, got {}",
            epsilon
        )));
    }
    let (lo, hi) = PIXEL_RANGE;
    let raw_lower = image.mapv(|x| (x - epsilon).clamp(lo, hi));
    let raw_upper = image.mapv(|x| (x + epsilon).clamp(lo, hi));
    let lower: Array1<NNVFloat> = normalization.apply(&raw_lower.view())?.iter().copied().collect();
    let upper: Array1<NNVFloat> = normalization.apply(&raw_upper.view())?.iter().copied().collect();
    Ok(Bounds1::new(lower.view(), upper.view())?)
}
