//! Mask utilities shared by attention implementations.
//!
//! Masks produced here are additive `f32` tensors shaped
//! `[batch, 1, 1, k_len]`. Values are either `0.0` (keep) or [`MASK_FILL`]
//! (discard). A large finite fill keeps half-precision softmax free of NaNs.

pub mod padding;

use candle_core::DType;

/// Dtype shared by all additive masks.
pub const MASK_DTYPE: DType = DType::F32;

/// Additive bias applied to padded key positions.
pub const MASK_FILL: f32 = -10_000.0;

pub use padding::additive_padding_mask;

#[cfg(test)]
mod tests;
