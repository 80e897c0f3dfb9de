//! Layer normalisation over the hidden axis.
//!
//! Inputs follow the `(batch, seq, hidden)` convention. Statistics are
//! computed with elementary tensor ops so gradients flow through every path.
//! Parameters are named `weight` and `bias`.

use candle_core::{Result, Tensor, D};
use candle_nn::{Init, VarBuilder};

use crate::checks;

#[derive(Debug, Clone, PartialEq)]
pub struct NormConfig {
    /// Size of the hidden dimension being normalised.
    pub hidden_size: usize,
    /// Numeric stabiliser applied to the variance.
    pub epsilon: f64,
}

impl NormConfig {
    pub fn new(hidden_size: usize, epsilon: f64) -> Self {
        Self {
            hidden_size,
            epsilon,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LayerNorm {
    config: NormConfig,
    weight: Tensor,
    bias: Tensor,
}

impl LayerNorm {
    pub fn new(config: NormConfig, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(config.hidden_size, "weight", Init::Const(1.0))?;
        let bias = vb.get_with_hints(config.hidden_size, "bias", Init::Const(0.0))?;
        checks::expect_shape("norm.weight", &weight, &[config.hidden_size])?;
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    pub fn config(&self) -> &NormConfig {
        &self.config
    }

    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("norm.input", hidden, self.config.hidden_size)?;

        let hidden_size = self.config.hidden_size as f64;
        let mean = (hidden.sum_keepdim(D::Minus1)? / hidden_size)?;
        let centered = hidden.broadcast_sub(&mean)?;
        let variance = (centered.sqr()?.sum_keepdim(D::Minus1)? / hidden_size)?;
        let denom = (variance + self.config.epsilon)?.sqrt()?;

        centered
            .broadcast_div(&denom)?
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn output_has_zero_mean_unit_variance() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let norm = LayerNorm::new(NormConfig::new(6, 1e-12), vb.pp("LayerNorm"))?;

        let input = Tensor::new(&[[[1f32, 2.0, 3.0, 4.0, 5.0, 6.0]]], &Device::Cpu)?;
        let out = norm.forward(&input)?;

        let mean = out.mean_all()?.to_scalar::<f32>()?;
        let var = out.sqr()?.mean_all()?.to_scalar::<f32>()?;
        assert!(mean.abs() < 1e-5);
        assert!((var - 1.0).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn rejects_wrong_hidden_width() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let norm = LayerNorm::new(NormConfig::new(4, 1e-12), vb)?;
        let input = Tensor::zeros((1, 2, 3), DType::F32, &Device::Cpu)?;
        assert!(norm.forward(&input).is_err());
        Ok(())
    }
}
