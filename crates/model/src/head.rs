//! Per-layer classifier heads.
//!
//! A head maps `(batch, seq, hidden)` states to `(batch, labels_num)` logits:
//! tanh projection to a small width, one masked self-attention pass, pooling
//! over the sequence, then a tanh projection and the output projection.

use attention::{MultiHeadAttention, MultiHeadConfig};
use candle_core::{IndexOp, Module, Tensor};
use candle_nn::{Linear, VarBuilder};
use layers::{checks, ActivationKind, LinearConfig};
use serde::{Deserialize, Serialize};

use crate::backbone::track;
use crate::error::{ModelError, Result};

pub const HEAD_HIDDEN_SIZE: usize = 128;
pub const HEAD_ATTENTION_HEADS: usize = 2;

/// Anything that turns a layer's hidden state into label logits.
pub trait Classifier: Send + Sync {
    /// `trainable = false` returns logits detached from the autograd graph
    /// with dropout disabled.
    fn infer(&self, hidden: &Tensor, attention_bias: &Tensor, trainable: bool) -> Result<Tensor>;
}

/// How a head collapses the sequence axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pooling {
    /// Average over every position, padding included.
    Mean,
    /// Element-wise maximum over every position, padding included.
    Max,
    /// The final position, which may be padding.
    Last,
    /// The start-token position.
    #[default]
    First,
}

impl Pooling {
    /// `(batch, seq, hidden)` to `(batch, hidden)`.
    pub fn apply(self, hidden: &Tensor) -> Result<Tensor> {
        let (_, seq, _) = hidden.dims3()?;
        let pooled = match self {
            Pooling::Mean => hidden.mean(1)?,
            Pooling::Max => hidden.max(1)?,
            Pooling::Last => hidden.i((.., seq - 1, ..))?,
            Pooling::First => hidden.i((.., 0, ..))?,
        };
        Ok(pooled)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeadConfig {
    pub input_size: usize,
    pub hidden_size: usize,
    pub num_heads: usize,
    pub labels_num: usize,
    pub pooling: Pooling,
    pub dropout_p: f32,
}

impl HeadConfig {
    pub fn new(input_size: usize, labels_num: usize, pooling: Pooling, dropout_p: f32) -> Self {
        Self {
            input_size,
            hidden_size: HEAD_HIDDEN_SIZE,
            num_heads: HEAD_ATTENTION_HEADS,
            labels_num,
            pooling,
            dropout_p,
        }
    }
}

#[derive(Debug)]
pub struct ClassifierHead {
    config: HeadConfig,
    input_projection: Linear,
    attention: MultiHeadAttention,
    pooled_projection: Linear,
    output_projection: Linear,
}

impl ClassifierHead {
    pub fn new(config: HeadConfig, vb: VarBuilder) -> Result<Self> {
        if config.labels_num == 0 {
            return Err(ModelError::InvalidLabels(
                "a classifier head needs at least one label".into(),
            ));
        }
        let input_projection =
            LinearConfig::new(config.input_size, config.hidden_size).build(vb.pp("input_projection"))?;
        let attention_vb = vb.pp("self_attention");
        let attention = MultiHeadAttention::new(
            &MultiHeadConfig {
                hidden_size: config.hidden_size,
                num_heads: config.num_heads,
                dropout_p: config.dropout_p,
            },
            attention_vb.clone(),
            attention_vb.pp("output"),
        )?;
        let pooled_projection = LinearConfig::new(config.hidden_size, config.hidden_size)
            .build(vb.pp("pooled_projection"))?;
        let output_projection = LinearConfig::new(config.hidden_size, config.labels_num)
            .build(vb.pp("output_projection"))?;

        Ok(Self {
            config,
            input_projection,
            attention,
            pooled_projection,
            output_projection,
        })
    }

    pub fn config(&self) -> &HeadConfig {
        &self.config
    }
}

impl Classifier for ClassifierHead {
    fn infer(&self, hidden: &Tensor, attention_bias: &Tensor, trainable: bool) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("head.input", hidden, self.config.input_size)?;

        let projected = ActivationKind::Tanh.forward(&self.input_projection.forward(hidden)?)?;
        let attended = self.attention.forward(&projected, attention_bias, trainable)?;
        let pooled = self.config.pooling.apply(&attended)?;
        let pooled = ActivationKind::Tanh.forward(&self.pooled_projection.forward(&pooled)?)?;
        let logits = self.output_projection.forward(&pooled)?;
        Ok(track(logits, trainable))
    }
}
