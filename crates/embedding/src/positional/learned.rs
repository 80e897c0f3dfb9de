//! Learned absolute position table, one row per position up to
//! `max_positions`.

use candle_core::{Device, Result, Tensor};
use candle_nn::VarBuilder;

use crate::token::{TokenEmbedding, TokenEmbeddingConfig};

#[derive(Debug, Clone)]
pub struct LearnedPositions {
    table: TokenEmbedding,
    max_positions: usize,
}

impl LearnedPositions {
    pub fn new(max_positions: usize, hidden_dim: usize, vb: VarBuilder) -> Result<Self> {
        let table = TokenEmbedding::new(
            TokenEmbeddingConfig {
                vocab_size: max_positions,
                hidden_dim,
            },
            vb,
        )?;
        Ok(Self {
            table,
            max_positions,
        })
    }

    pub fn max_positions(&self) -> usize {
        self.max_positions
    }

    /// Embeddings for positions `0..seq_len`, shaped `(1, seq_len, hidden)`.
    pub fn forward(&self, seq_len: usize, device: &Device) -> Result<Tensor> {
        if seq_len > self.max_positions {
            candle_core::bail!(
                "sequence length {seq_len} exceeds the {} learned positions",
                self.max_positions
            );
        }
        let ids = Tensor::arange(0u32, seq_len as u32, device)?.unsqueeze(0)?;
        self.table.forward(&ids)
    }
}
