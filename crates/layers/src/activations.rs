//! Activation catalogue for encoder feed-forward stacks and classifier heads.
//!
//! Activations keep the input layout unchanged.
//!
//! # Built-in formulas
//!
//! * **GELU** uses the exact erf form `0.5 * x * (1 + erf(x / sqrt(2)))`,
//!   matching BERT checkpoints.
//! * **GELU (tanh)** is the tanh approximation some checkpoints name
//!   `gelu_new`.
//! * **Tanh** squashes projections inside classifier heads.

use std::str::FromStr;

use candle_core::{Error, Result, Tensor};

/// Identifies which non-linearity is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationKind {
    /// Identity function, useful for debugging or wiring custom stacks.
    Identity,
    #[default]
    Gelu,
    GeluTanh,
    Tanh,
    Relu,
}

impl ActivationKind {
    pub fn forward(self, input: &Tensor) -> Result<Tensor> {
        match self {
            ActivationKind::Identity => Ok(input.clone()),
            ActivationKind::Gelu => input.gelu_erf(),
            ActivationKind::GeluTanh => input.gelu(),
            ActivationKind::Tanh => input.tanh(),
            ActivationKind::Relu => input.relu(),
        }
    }
}

impl FromStr for ActivationKind {
    type Err = Error;

    /// Accepts the `hidden_act` spellings used by Hugging Face configs.
    fn from_str(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "identity" | "linear" => Ok(Self::Identity),
            "gelu" => Ok(Self::Gelu),
            "gelu_new" | "gelu_pytorch_tanh" => Ok(Self::GeluTanh),
            "tanh" => Ok(Self::Tanh),
            "relu" => Ok(Self::Relu),
            other => Err(Error::Msg(format!("unsupported activation '{other}'"))),
        }
    }
}
