//! Post-norm residual merge used after every BERT sub-layer.
//!
//! `AddNorm` applies dropout to the transformed branch, adds the residual
//! input, then normalises. Dropout runs only when the caller passes
//! `train = true`.

use candle_core::{Result, Tensor};
use candle_nn::{Dropout, VarBuilder};

use crate::{
    checks,
    norm::{LayerNorm, NormConfig},
};

#[derive(Debug, Clone, PartialEq)]
pub struct ResidualConfig {
    pub hidden_size: usize,
    pub dropout_p: f32,
    pub epsilon: f64,
}

#[derive(Debug, Clone)]
pub struct AddNorm {
    norm: LayerNorm,
    dropout: Dropout,
    hidden_size: usize,
}

impl AddNorm {
    /// Registers the normalisation parameters under `vb.pp("LayerNorm")`.
    pub fn new(config: &ResidualConfig, vb: VarBuilder) -> Result<Self> {
        let norm = LayerNorm::new(
            NormConfig::new(config.hidden_size, config.epsilon),
            vb.pp("LayerNorm"),
        )?;
        Ok(Self {
            norm,
            dropout: Dropout::new(config.dropout_p),
            hidden_size: config.hidden_size,
        })
    }

    pub fn forward(&self, branch: &Tensor, residual: &Tensor, train: bool) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("residual.branch", branch, self.hidden_size)?;
        checks::expect_shape("residual.input", residual, branch.dims())?;
        let branch = self.dropout.forward(branch, train)?;
        self.norm.forward(&(branch + residual)?)
    }
}
