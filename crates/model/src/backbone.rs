//! The layered encoder contract consumed by the cascade and the controller.

use candle_core::Tensor;

use crate::error::Result;

/// A layered sequence encoder that can be driven one layer at a time.
///
/// `trainable = false` must return outputs detached from the autograd graph
/// with dropout disabled; `trainable = true` tracks gradients and applies
/// dropout.
pub trait Backbone: Send + Sync {
    /// Number of layers `L`.
    fn num_layers(&self) -> usize;

    fn hidden_size(&self) -> usize;

    /// `ids` and `mask` are `(batch, seq)`; returns `(batch, seq, hidden)`.
    fn embed(&self, ids: &Tensor, mask: &Tensor, trainable: bool) -> Result<Tensor>;

    /// Applies layer `index` with an additive attention bias shaped
    /// `(batch, 1, 1, seq)`.
    fn apply_layer(
        &self,
        index: usize,
        hidden: &Tensor,
        attention_bias: &Tensor,
        trainable: bool,
    ) -> Result<Tensor>;
}

pub(crate) fn track(tensor: Tensor, trainable: bool) -> Tensor {
    if trainable {
        tensor
    } else {
        tensor.detach()
    }
}
