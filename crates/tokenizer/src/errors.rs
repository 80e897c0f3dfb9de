use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tokenizer error: {0}")]
    Tokenizer(#[from] tokenizers::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("artifact error: {0}")]
    Artifact(String),
}
