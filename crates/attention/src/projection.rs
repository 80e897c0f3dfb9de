//! Trainable multi-head self-attention.
//!
//! Parameters are registered through a [`VarBuilder`]. The query, key and
//! value projections live under one prefix and the output projection under
//! another, which lets callers match the Hugging Face BERT layout
//! (`attention.self.{query,key,value}` and `attention.output.dense`).

use candle_core::{Module, Tensor};
use candle_nn::{linear, Linear, VarBuilder};

use crate::core::{Attention, AttentionError, Config};
use crate::reference::ExactAttention;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultiHeadConfig {
    pub hidden_size: usize,
    pub num_heads: usize,
    pub dropout_p: f32,
}

impl MultiHeadConfig {
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_heads
    }

    pub fn validate(&self) -> Result<(), AttentionError> {
        if self.num_heads == 0 || self.hidden_size == 0 {
            return Err(AttentionError::InvalidConfig {
                message: "hidden_size and num_heads must be greater than zero".to_string(),
            });
        }
        if self.hidden_size % self.num_heads != 0 {
            return Err(AttentionError::InvalidConfig {
                message: format!(
                    "hidden_size {} is not divisible by num_heads {}",
                    self.hidden_size, self.num_heads
                ),
            });
        }
        if !(0.0..1.0).contains(&self.dropout_p) {
            return Err(AttentionError::InvalidConfig {
                message: format!("dropout_p {} must be in [0, 1)", self.dropout_p),
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct MultiHeadAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    num_heads: usize,
    head_dim: usize,
    kernel: ExactAttention,
    kernel_config: Config,
}

impl MultiHeadAttention {
    /// Register projections: `query`, `key`, `value` under `projections` and
    /// the merge projection directly under `output`.
    pub fn new(
        config: &MultiHeadConfig,
        projections: VarBuilder,
        output: VarBuilder,
    ) -> Result<Self, AttentionError> {
        config.validate()?;
        let hidden = config.hidden_size;
        Ok(Self {
            query: linear(hidden, hidden, projections.pp("query"))?,
            key: linear(hidden, hidden, projections.pp("key"))?,
            value: linear(hidden, hidden, projections.pp("value"))?,
            output: linear(hidden, hidden, output)?,
            num_heads: config.num_heads,
            head_dim: config.head_dim(),
            kernel: ExactAttention::new(),
            kernel_config: Config::with_dropout(config.dropout_p),
        })
    }

    /// `hidden` is `[batch, seq, hidden]`; `bias` is an additive mask that
    /// broadcasts to `[batch, heads, seq, seq]`.
    pub fn forward(
        &self,
        hidden: &Tensor,
        bias: &Tensor,
        train: bool,
    ) -> Result<Tensor, AttentionError> {
        let (batch, seq, width) = hidden.dims3().map_err(|_| AttentionError::InvalidShape {
            context: "hidden must have shape [batch, seq_len, hidden]".to_string(),
        })?;
        if width != self.num_heads * self.head_dim {
            return Err(AttentionError::InvalidShape {
                context: format!(
                    "hidden width {width} does not match {} heads of {}",
                    self.num_heads, self.head_dim
                ),
            });
        }

        let q = self.split_heads(&self.query.forward(hidden)?, batch, seq)?;
        let k = self.split_heads(&self.key.forward(hidden)?, batch, seq)?;
        let v = self.split_heads(&self.value.forward(hidden)?, batch, seq)?;

        let context = self
            .kernel
            .attend(&q, &k, &v, Some(bias), &self.kernel_config, train)?;
        let merged = context
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq, width))?;
        Ok(self.output.forward(&merged)?)
    }

    fn split_heads(&self, x: &Tensor, batch: usize, seq: usize) -> Result<Tensor, AttentionError> {
        Ok(x.reshape((batch, seq, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?)
    }
}
