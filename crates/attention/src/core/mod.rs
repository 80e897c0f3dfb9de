//! Core traits and types shared across attention implementations.
//!
//! Implementations operate on tensors with layout
//! `[batch, n_heads, seq_len, head_dim]` and return a tensor of the same
//! layout and dtype as the queries.

pub mod config;
pub mod errors;

use candle_core::Tensor;

pub use config::Config;
pub use errors::AttentionError;

/// Unified interface for attention kernels.
///
/// * `q`, `k`, and `v` share the layout `[batch, n_heads, seq_len, head_dim]`.
/// * The returned tensor mirrors the layout and dtype of `q`.
/// * Masks, when present, must broadcast to `[batch, n_heads, q_len, k_len]`;
///   the encoder passes `[batch, 1, 1, k_len]`.
/// * Dropout is controlled via [`Config::dropout_p`] and is only applied when
///   `train` is set.
pub trait Attention {
    /// Compute self-attention with an optional additive mask.
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
        train: bool,
    ) -> Result<Tensor, AttentionError>;
}
