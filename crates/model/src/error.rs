//! Error types for model construction, inference and persistence.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ModelError>;

#[derive(Error, Debug)]
pub enum ModelError {
    /// The identifier does not name a registered pretrained backbone.
    #[error("unknown backbone '{name}' (known: {known})")]
    UnknownBackbone { name: String, known: String },

    /// Label list was empty or contained duplicates.
    #[error("invalid labels: {0}")]
    InvalidLabels(String),

    /// A label name absent from the label space.
    #[error("unknown label '{0}'")]
    UnknownLabel(String),

    /// A label id outside `0..labels_num`.
    #[error("label id {id} out of range for {labels_num} labels")]
    LabelIdOutOfRange { id: u32, labels_num: usize },

    #[error("speed {0} must lie in [0, 1]")]
    InvalidSpeed(f32),

    #[error("configuration error: {0}")]
    Config(String),

    /// Downloaded or local weights did not match the pinned digest.
    #[error("integrity check failed for {}: expected sha256 {expected}, found {actual}", path.display())]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// No digest was pinned or published for the weights file.
    #[error("no sha256 digest to verify {} against; set weights_sha256", path.display())]
    UnpinnedWeights { path: PathBuf },

    #[error("failed to provision weights: {0}")]
    Provision(String),

    /// A parameter snapshot that does not cover the model exactly.
    #[error("parameter snapshot mismatch: {0}")]
    Snapshot(String),

    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("attention error: {0}")]
    Attention(#[from] attention::AttentionError),

    #[error("tokenizer error: {0}")]
    Tokenizer(#[from] tokenizer::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
