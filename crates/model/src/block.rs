use std::fmt;

use attention::{MultiHeadAttention, MultiHeadConfig};
use candle_core::Tensor;
use candle_nn::VarBuilder;
use layers::{AddNorm, FeedForward, FeedForwardConfig, ResidualConfig};

use crate::config::BackboneConfig;
use crate::error::Result;

/// Post-norm BERT encoder layer: self-attention and feed-forward, each
/// followed by dropout, residual add and LayerNorm.
pub struct EncoderLayer {
    index: usize,
    attention: MultiHeadAttention,
    attention_output: AddNorm,
    feed_forward: FeedForward,
    output: AddNorm,
}

impl fmt::Debug for EncoderLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncoderLayer")
            .field("index", &self.index)
            .finish()
    }
}

impl EncoderLayer {
    /// `vb` points at `encoder.layer.{index}`.
    pub fn new(index: usize, config: &BackboneConfig, vb: VarBuilder) -> Result<Self> {
        let attention_cfg = MultiHeadConfig {
            hidden_size: config.hidden_size,
            num_heads: config.num_heads,
            dropout_p: config.attention_dropout,
        };
        let residual_cfg = ResidualConfig {
            hidden_size: config.hidden_size,
            dropout_p: config.hidden_dropout,
            epsilon: config.layer_norm_eps,
        };

        let attention_vb = vb.pp("attention");
        let attention = MultiHeadAttention::new(
            &attention_cfg,
            attention_vb.pp("self"),
            attention_vb.pp("output").pp("dense"),
        )?;
        let attention_output = AddNorm::new(&residual_cfg, attention_vb.pp("output"))?;
        let feed_forward = FeedForward::new(
            FeedForwardConfig::new(
                config.hidden_size,
                config.intermediate_size,
                config.activation()?,
            ),
            vb.pp("intermediate").pp("dense"),
            vb.pp("output").pp("dense"),
        )?;
        let output = AddNorm::new(&residual_cfg, vb.pp("output"))?;

        Ok(Self {
            index,
            attention,
            attention_output,
            feed_forward,
            output,
        })
    }

    pub fn forward(&self, hidden: &Tensor, attention_bias: &Tensor, train: bool) -> Result<Tensor> {
        let attended = self.attention.forward(hidden, attention_bias, train)?;
        let hidden = self.attention_output.forward(&attended, hidden, train)?;
        let expanded = self.feed_forward.forward(&hidden)?;
        Ok(self.output.forward(&expanded, &hidden, train)?)
    }
}
