//! BERT input embeddings.
//!
//! Parameter names follow the Hugging Face layout under the supplied prefix:
//! `word_embeddings`, `position_embeddings`, `token_type_embeddings` and
//! `LayerNorm`.

use candle_core::{Result, Tensor};
use candle_nn::{Dropout, VarBuilder};
use layers::{LayerNorm, NormConfig};

use crate::{
    positional::LearnedPositions,
    token::{TokenEmbedding, TokenEmbeddingConfig},
};

#[derive(Debug, Clone, PartialEq)]
pub struct BertEmbeddingsConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub max_position_embeddings: usize,
    pub type_vocab_size: usize,
    pub layer_norm_eps: f64,
    pub dropout_p: f32,
}

#[derive(Debug, Clone)]
pub struct BertEmbeddings {
    word: TokenEmbedding,
    position: LearnedPositions,
    token_type: TokenEmbedding,
    norm: LayerNorm,
    dropout: Dropout,
}

impl BertEmbeddings {
    pub fn new(config: &BertEmbeddingsConfig, vb: VarBuilder) -> Result<Self> {
        let word = TokenEmbedding::new(
            TokenEmbeddingConfig {
                vocab_size: config.vocab_size,
                hidden_dim: config.hidden_size,
            },
            vb.pp("word_embeddings"),
        )?;
        let position = LearnedPositions::new(
            config.max_position_embeddings,
            config.hidden_size,
            vb.pp("position_embeddings"),
        )?;
        let token_type = TokenEmbedding::new(
            TokenEmbeddingConfig {
                vocab_size: config.type_vocab_size,
                hidden_dim: config.hidden_size,
            },
            vb.pp("token_type_embeddings"),
        )?;
        let norm = LayerNorm::new(
            NormConfig::new(config.hidden_size, config.layer_norm_eps),
            vb.pp("LayerNorm"),
        )?;
        Ok(Self {
            word,
            position,
            token_type,
            norm,
            dropout: Dropout::new(config.dropout_p),
        })
    }

    /// `token_ids` is `(batch, seq)`; segment ids default to all zeros for
    /// single-sentence inputs.
    pub fn forward(
        &self,
        token_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let (_, seq) = token_ids.dims2()?;
        let words = self.word.forward(token_ids)?;
        let positions = self.position.forward(seq, token_ids.device())?;
        let segments = match token_type_ids {
            Some(ids) => self.token_type.forward(ids)?,
            None => self.token_type.forward(&token_ids.zeros_like()?)?,
        };

        let summed = words.broadcast_add(&positions)?.add(&segments)?;
        let normed = self.norm.forward(&summed)?;
        self.dropout.forward(&normed, train)
    }
}
