//! Reference attention kernel.
//!
//! The exact path prioritises numerical fidelity and mirrors the semantics
//! described by the [`Attention`](crate::core::Attention) trait. Softmax uses
//! the composite candle op so the kernel stays differentiable.

use std::sync::OnceLock;

use candle_core::{DType, Tensor, D};
use candle_nn::ops::{dropout, softmax};

use crate::core::{Attention, AttentionError, Config};

/// Scaled dot-product attention over `[batch, heads, seq, head_dim]` inputs.
#[derive(Debug, Default)]
pub struct ExactAttention {
    first_call: OnceLock<()>,
}

impl ExactAttention {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Attention for ExactAttention {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
        train: bool,
    ) -> Result<Tensor, AttentionError> {
        if self.first_call.set(()).is_ok() {
            log::debug!(
                "attention::reference init device={:?} dtype={:?} dropout={:?} mask={}",
                q.device(),
                q.dtype(),
                config.dropout_p,
                mask.is_some()
            );
        }

        let device = q.device();
        if !device.same_device(k.device()) || !device.same_device(v.device()) {
            return Err(AttentionError::InvalidShape {
                context: "q, k, v must reside on the same device".to_string(),
            });
        }

        let dtype = q.dtype();
        if dtype != k.dtype() || dtype != v.dtype() {
            return Err(AttentionError::InvalidShape {
                context: "q, k, v must share the same dtype".to_string(),
            });
        }

        if !matches!(dtype, DType::F32 | DType::F16 | DType::BF16) {
            return Err(AttentionError::UnsupportedDType {
                requested: format!("{dtype:?}"),
            });
        }

        let (batch, heads, _q_len, head_dim) =
            q.dims4().map_err(|_| AttentionError::InvalidShape {
                context: "q must have shape [batch, heads, seq_len, head_dim]".to_string(),
            })?;
        let (kb, kh, k_len, kd) = k.dims4().map_err(|_| AttentionError::InvalidShape {
            context: "k must have shape [batch, heads, seq_len, head_dim]".to_string(),
        })?;
        if kb != batch || kh != heads || kd != head_dim {
            return Err(AttentionError::InvalidShape {
                context: format!(
                    "k shape mismatch: expected [{batch}, {heads}, ?, {head_dim}] got [{kb}, {kh}, {k_len}, {kd}]"
                ),
            });
        }
        if v.dims() != k.dims() {
            return Err(AttentionError::InvalidShape {
                context: format!("v shape {:?} must match k shape {:?}", v.dims(), k.dims()),
            });
        }

        let scale = 1.0 / (head_dim as f64).sqrt();
        let scores = q.matmul(&k.t()?)?.affine(scale, 0.0)?;

        let scores = match mask {
            Some(mask) => {
                let dims = mask.dims();
                let broadcastable = dims.len() == 4
                    && (dims[0] == 1 || dims[0] == batch)
                    && (dims[1] == 1 || dims[1] == heads)
                    && dims[3] == k_len;
                if !broadcastable {
                    return Err(AttentionError::InvalidShape {
                        context: format!(
                            "mask {dims:?} must broadcast to [{batch}, {heads}, q_len, {k_len}]"
                        ),
                    });
                }
                let mask = mask.to_dtype(dtype)?;
                scores.broadcast_add(&mask)?
            }
            None => scores,
        };

        let probs = softmax(&scores, D::Minus1)?;
        let probs = match config.dropout_p {
            Some(p) if train && p > 0.0 => dropout(&probs, p)?,
            _ => probs,
        };

        Ok(probs.matmul(v)?)
    }
}
