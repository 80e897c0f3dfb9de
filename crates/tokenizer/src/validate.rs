use crate::config::Config;
use crate::errors::{Error, Result};
use std::collections::HashSet;
use tokenizers::models::wordpiece::WordPiece;
use tokenizers::Model;

pub fn validate_config(cfg: &Config) -> Result<()> {
    if cfg.max_input_chars_per_word == 0 {
        return Err(Error::InvalidConfig(
            "max_input_chars_per_word must be greater than zero".into(),
        ));
    }

    let special = &cfg.special_tokens;
    let mut seen = HashSet::new();
    for token in [&special.start, &special.pad, &special.unknown] {
        if token.is_empty() {
            return Err(Error::InvalidConfig("special tokens must be non-empty".into()));
        }
        if !seen.insert(token) {
            return Err(Error::Validation(format!(
                "special token '{token}' appears multiple times"
            )));
        }
    }
    Ok(())
}

pub fn validate_model(model: &WordPiece, cfg: &Config) -> Result<()> {
    let special = &cfg.special_tokens;
    for token in [&special.start, &special.pad, &special.unknown] {
        if model.token_to_id(token).is_none() {
            return Err(Error::Validation(format!(
                "expected special token '{token}' to be present in {}",
                cfg.vocab.display()
            )));
        }
    }
    Ok(())
}
