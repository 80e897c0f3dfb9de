//! Position-wise feed-forward block.
//!
//! The block expands `(batch, seq, hidden)` to `intermediate_size`, applies
//! the activation, then contracts back to the hidden size.

use candle_core::{Module, Result, Tensor};
use candle_nn::{Linear, VarBuilder};

use crate::{activations::ActivationKind, linear::LinearConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedForwardConfig {
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub activation: ActivationKind,
}

impl FeedForwardConfig {
    pub fn new(hidden_size: usize, intermediate_size: usize, activation: ActivationKind) -> Self {
        Self {
            hidden_size,
            intermediate_size,
            activation,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedForward {
    config: FeedForwardConfig,
    expand: Linear,
    contract: Linear,
}

impl FeedForward {
    /// `expand` and `contract` are the prefixes of the two projections,
    /// `intermediate.dense` and `output.dense` in BERT checkpoints.
    pub fn new(config: FeedForwardConfig, expand: VarBuilder, contract: VarBuilder) -> Result<Self> {
        let up = LinearConfig::new(config.hidden_size, config.intermediate_size).build(expand)?;
        let down = LinearConfig::new(config.intermediate_size, config.hidden_size).build(contract)?;
        Ok(Self {
            config,
            expand: up,
            contract: down,
        })
    }

    pub fn config(&self) -> &FeedForwardConfig {
        &self.config
    }

    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        let expanded = self.expand.forward(hidden)?;
        let activated = self.config.activation.forward(&expanded)?;
        self.contract.forward(&activated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn preserves_hidden_width() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let ff = FeedForward::new(
            FeedForwardConfig::new(8, 32, ActivationKind::Gelu),
            vb.pp("intermediate").pp("dense"),
            vb.pp("output").pp("dense"),
        )?;
        let input = Tensor::randn(0f32, 1.0, (2, 3, 8), &Device::Cpu)?;
        assert_eq!(ff.forward(&input)?.dims(), &[2, 3, 8]);
        assert_eq!(varmap.all_vars().len(), 4);
        Ok(())
    }
}
