use crate::errors::{Error, Result};
use std::path::Path;
use tokenizers::models::wordpiece::WordPiece;

const VOCAB_TXT_ERR: &str = "vocab txt not found at";

pub fn load_wordpiece(
    vocab: &Path,
    unknown: &str,
    max_input_chars_per_word: usize,
) -> Result<WordPiece> {
    ensure_file(vocab, VOCAB_TXT_ERR)?;
    let vocab_str = path_to_string(vocab)?;

    WordPiece::from_file(&vocab_str)
        .unk_token(unknown.to_string())
        .max_input_chars_per_word(max_input_chars_per_word)
        .build()
        .map_err(Error::from)
}

fn ensure_file(path: &Path, msg: &str) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(Error::Artifact(format!("{msg} {}", path.display())))
    }
}

fn path_to_string(path: &Path) -> Result<String> {
    path.to_str()
        .map(|s| s.to_string())
        .ok_or_else(|| Error::Artifact(format!("path is not valid UTF-8: {}", path.display())))
}
