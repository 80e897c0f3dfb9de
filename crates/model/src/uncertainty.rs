//! Normalised entropy of a class distribution.
//!
//! The score is `-Σ p·ln p / ln N`: `0` for a one-hot distribution and `1`
//! for the uniform distribution over `N` classes.

use candle_core::Tensor;

use crate::error::{ModelError, Result};

/// Uncertainty of `probs` over `num_classes` classes, clamped to `[0, 1]`.
///
/// Zero-probability classes contribute nothing. With a single class the
/// distribution is trivially certain and the score is `0`.
pub fn uncertainty(probs: &[f32], num_classes: usize) -> f32 {
    if num_classes <= 1 {
        return 0.0;
    }
    let entropy: f64 = probs
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| {
            let p = f64::from(p);
            -p * p.ln()
        })
        .sum();
    let normalized = entropy / (num_classes as f64).ln();
    normalized.clamp(0.0, 1.0) as f32
}

/// Row-wise uncertainty for a `(batch, num_classes)` probability tensor.
pub fn batch_uncertainty(probs: &Tensor) -> Result<Vec<f32>> {
    let (_, num_classes) = probs.dims2()?;
    let rows = probs.to_dtype(candle_core::DType::F32)?.to_vec2::<f32>()?;
    rows.iter()
        .map(|row| {
            if row.iter().any(|p| !p.is_finite() || *p < 0.0) {
                Err(ModelError::Config(format!(
                    "probabilities must be finite and non-negative, got {row:?}"
                )))
            } else {
                Ok(uncertainty(row, num_classes))
            }
        })
        .collect()
}
