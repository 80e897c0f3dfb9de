//! Token embedding lookup table.

use candle_core::{bail, DType, Error, Result, Tensor};
use candle_nn::{Init, VarBuilder};

/// Configuration for building a token embedding table.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenEmbeddingConfig {
    /// Number of rows (distinct ids).
    pub vocab_size: usize,
    /// Dimensionality of each embedding vector.
    pub hidden_dim: usize,
}

/// Learnable lookup table stored as `weight` under the supplied prefix.
#[derive(Debug, Clone)]
pub struct TokenEmbedding {
    config: TokenEmbeddingConfig,
    weight: Tensor,
}

impl TokenEmbedding {
    /// Registers the table, sampling fresh parameters from `N(0, 0.02)`.
    pub fn new(config: TokenEmbeddingConfig, vb: VarBuilder) -> Result<Self> {
        if config.vocab_size == 0 {
            bail!("token embedding requires vocab_size > 0");
        }
        if config.hidden_dim == 0 {
            bail!("token embedding requires hidden_dim > 0");
        }

        let weight = vb.get_with_hints(
            (config.vocab_size, config.hidden_dim),
            "weight",
            Init::Randn {
                mean: 0.0,
                stdev: 0.02,
            },
        )?;
        Ok(Self { config, weight })
    }

    pub fn config(&self) -> &TokenEmbeddingConfig {
        &self.config
    }

    /// Looks up embeddings for the provided token ids.
    ///
    /// Inputs must be shaped `(batch, seq)` with an integer dtype. Outputs follow
    /// the `(batch, seq, hidden)` layout.
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        let (batch, seq) = self.validate_token_ids(token_ids)?;

        let flat = token_ids.to_dtype(DType::I64)?.flatten_all()?;
        self.ensure_id_range(&flat)?;

        let gathered = self.weight.index_select(&flat, 0)?;
        gathered.reshape((batch, seq, self.config.hidden_dim))
    }

    fn validate_token_ids(&self, token_ids: &Tensor) -> Result<(usize, usize)> {
        let (batch, seq) = match token_ids.dims() {
            [batch, seq] => (*batch, *seq),
            _ => return Err(Error::Msg("token_ids must be shaped [batch, seq]".into())),
        };
        if batch == 0 || seq == 0 {
            return Err(Error::Msg(
                "token_ids must have non-zero batch and seq dimensions".into(),
            ));
        }
        if !is_integer_dtype(token_ids.dtype()) {
            return Err(Error::Msg(format!(
                "token_ids expected integer dtype but received {:?}",
                token_ids.dtype()
            )));
        }
        Ok((batch, seq))
    }

    fn ensure_id_range(&self, flat_ids: &Tensor) -> Result<()> {
        let min_id = flat_ids.min_all()?.to_scalar::<i64>()?;
        if min_id < 0 {
            return Err(Error::Msg(format!(
                "encountered negative token id {min_id} (minimum)"
            )));
        }

        let max_id = flat_ids.max_all()?.to_scalar::<i64>()?;
        let vocab = self.config.vocab_size as i64;
        if max_id >= vocab {
            log::debug!("rejecting id {max_id} for table of {vocab} rows");
            return Err(Error::Msg(format!(
                "token id {max_id} exceeds vocab size {vocab}"
            )));
        }
        Ok(())
    }
}

fn is_integer_dtype(dtype: DType) -> bool {
    matches!(dtype, DType::U8 | DType::U32 | DType::I64)
}
