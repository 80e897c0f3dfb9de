//! Dense projections with explicit initialisation.
//!
//! Projections accept inputs shaped `(batch, seq, input_dim)` or
//! `(batch, input_dim)` and return the same leading layout with `output_dim`
//! features. Weights are stored `(output_dim, input_dim)` like PyTorch so
//! pretrained checkpoints load unchanged.

use candle_core::{Error, Result};
use candle_nn::{Init, Linear, VarBuilder};

/// Parameter initialisation schemes for freshly created projections.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LinearInit {
    /// Zero-mean normal draw; BERT uses `std = 0.02`.
    Normal { std: f64 },
    /// Candle's default Kaiming scheme.
    Kaiming,
}

impl LinearInit {
    fn weight_init(self) -> Init {
        match self {
            LinearInit::Normal { std } => Init::Randn {
                mean: 0.0,
                stdev: std,
            },
            LinearInit::Kaiming => candle_nn::init::DEFAULT_KAIMING_NORMAL,
        }
    }
}

impl Default for LinearInit {
    fn default() -> Self {
        LinearInit::Normal { std: 0.02 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearConfig {
    pub input_dim: usize,
    pub output_dim: usize,
    pub bias: bool,
    pub init: LinearInit,
}

impl LinearConfig {
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: true,
            init: LinearInit::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_dim == 0 || self.output_dim == 0 {
            return Err(Error::Msg(format!(
                "linear dimensions must be non-zero, got {}x{}",
                self.input_dim, self.output_dim
            )));
        }
        if let LinearInit::Normal { std } = self.init {
            if !(std.is_finite() && std > 0.0) {
                return Err(Error::Msg(format!("invalid init std {std}")));
            }
        }
        Ok(())
    }

    /// Registers `weight` (and `bias`) under `vb` and returns the projection.
    pub fn build(&self, vb: VarBuilder) -> Result<Linear> {
        self.validate()?;
        let weight = vb.get_with_hints(
            (self.output_dim, self.input_dim),
            "weight",
            self.init.weight_init(),
        )?;
        let bias = if self.bias {
            Some(vb.get_with_hints(self.output_dim, "bias", Init::Const(0.0))?)
        } else {
            None
        };
        Ok(Linear::new(weight, bias))
    }
}
