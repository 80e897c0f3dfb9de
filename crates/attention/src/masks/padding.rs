//! Builders for padding masks used to drop padded keys.
//!
//! All padding masks share the dtype and layout described in
//! [`super::MASK_DTYPE`](super::MASK_DTYPE).

use candle_core::{Result, Tensor};

use super::{MASK_DTYPE, MASK_FILL};

/// Convert a `[batch, seq]` 0/1 token mask into an additive attention bias.
///
/// Positions holding `1` keep a bias of `0.0`; positions holding `0` receive
/// [`MASK_FILL`]. The result is shaped `[batch, 1, 1, seq]` and broadcasts
/// over heads and query positions.
pub fn additive_padding_mask(mask: &Tensor) -> Result<Tensor> {
    let (batch, seq) = mask.dims2()?;
    let keep = mask.to_dtype(MASK_DTYPE)?;
    // (1 - keep) * fill
    keep.affine(-(MASK_FILL as f64), MASK_FILL as f64)?
        .reshape((batch, 1, 1, seq))
}
