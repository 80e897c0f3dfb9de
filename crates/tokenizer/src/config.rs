use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to a BERT `vocab.txt`, one token per line; the line index is the id.
    pub vocab: PathBuf,
    #[serde(default = "default_lowercase")]
    pub lowercase: bool,
    #[serde(default)]
    pub special_tokens: SpecialTokens,
    #[serde(default = "default_max_input_chars_per_word")]
    pub max_input_chars_per_word: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpecialTokens {
    pub start: String,
    pub pad: String,
    pub unknown: String,
}

impl Default for SpecialTokens {
    fn default() -> Self {
        Self {
            start: "[CLS]".to_string(),
            pad: "[PAD]".to_string(),
            unknown: "[UNK]".to_string(),
        }
    }
}

impl Config {
    pub fn new(vocab: impl Into<PathBuf>, lowercase: bool) -> Self {
        Self {
            vocab: vocab.into(),
            lowercase,
            special_tokens: SpecialTokens::default(),
            max_input_chars_per_word: default_max_input_chars_per_word(),
        }
    }
}

fn default_lowercase() -> bool {
    true
}

fn default_max_input_chars_per_word() -> usize {
    100
}
