//! Configuration options shared by all attention implementations.

/// Configuration driving attention behaviour.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    /// Probability for dropout applied to attention weights during training.
    ///
    /// When `None`, dropout is disabled and the computation is deterministic.
    pub dropout_p: Option<f32>,
}

impl Config {
    pub fn with_dropout(dropout_p: f32) -> Self {
        Self {
            dropout_p: (dropout_p > 0.0).then_some(dropout_p),
        }
    }
}
