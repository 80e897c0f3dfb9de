//! Bidirectional self-attention primitives for BERT-style encoders.
//!
//! The crate defines a portable API for computing scaled dot-product attention
//! over tensors with layout `[batch, n_heads, seq_len, head_dim]`, plus a
//! trainable multi-head wrapper that owns the query/key/value and output
//! projections.
//!
//! Masks are additive and broadcast over heads and queries; padded key
//! positions receive [`masks::MASK_FILL`] so their softmax weight is
//! effectively zero.
//!
//! Dropout is an optional, train-only concern controlled via the public
//! configuration and the per-call `train` flag. Callers pass `train = false`
//! for evaluation or when deterministic outputs are required.

pub mod core;
pub mod masks;
pub mod projection;
pub mod reference;

pub use core::{Attention, AttentionError, Config};
pub use masks::additive_padding_mask;
pub use projection::{MultiHeadAttention, MultiHeadConfig};
pub use reference::ExactAttention;
