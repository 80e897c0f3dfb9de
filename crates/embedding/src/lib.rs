//! Embedding crate
//!
//! Token lookup tables and the BERT input embedding stack
//! (word + learned position + token type, followed by LayerNorm and dropout).

pub mod bert;
pub mod positional;
pub mod token;

pub use bert::{BertEmbeddings, BertEmbeddingsConfig};
pub use positional::LearnedPositions;
pub use token::{TokenEmbedding, TokenEmbeddingConfig};
