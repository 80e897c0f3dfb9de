//! BERT WordPiece tokenization and fixed-length sequence encoding.
//!
//! Text goes through BERT basic tokenization (control-character cleanup,
//! CJK character splitting, optional lowercasing and accent stripping,
//! whitespace and punctuation splitting) and then greedy longest-match
//! WordPiece splitting against a `vocab.txt` file. Unknown words become the
//! configured unknown token.
//!
//! [`TokenSequence::encode`] turns a token list into the fixed-length
//! `(ids, mask)` pair consumed by the encoder: the start token is always at
//! position 0, long inputs are truncated and short inputs are padded.
//!
//! # Thread Safety
//!
//! [`WordPieceTokenizer`] is `Send + Sync` and holds no interior mutability.

pub mod config;
pub mod errors;
pub mod sequence;
pub mod wordpiece;

mod artifacts;
mod validate;

pub use config::{Config, SpecialTokens};
pub use errors::{Error, Result};
pub use sequence::TokenSequence;
pub use wordpiece::WordPieceTokenizer;

/// Splits raw text into token strings.
pub trait Tokenize {
    fn tokenize(&self, text: &str) -> Result<Vec<String>>;
}

/// Maps token strings to integer ids.
///
/// Unknown tokens resolve to the unknown-token id. The start and pad ids are
/// reserved and always present.
pub trait Vocabulary {
    fn get(&self, token: &str) -> u32;
    fn start_id(&self) -> u32;
    fn pad_id(&self) -> u32;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
