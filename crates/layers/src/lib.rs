//! Building blocks for BERT-style encoder layers.
//!
//! Every parameterised component registers its tensors through a
//! [`candle_nn::VarBuilder`] so callers control naming and can collect the
//! parameters for optimisation or serialisation from the backing `VarMap`.

pub mod activations;
pub mod checks;
pub mod linear;
pub mod mlp;
pub mod norm;
pub mod residual;

pub use activations::ActivationKind;
pub use linear::{LinearConfig, LinearInit};
pub use mlp::{FeedForward, FeedForwardConfig};
pub use norm::{LayerNorm, NormConfig};
pub use residual::{AddNorm, ResidualConfig};
