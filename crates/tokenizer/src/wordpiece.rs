//! BERT basic tokenization followed by WordPiece splitting.

use tokenizers::models::wordpiece::WordPiece;
use tokenizers::normalizers::bert::BertNormalizer;
use tokenizers::pre_tokenizers::bert::BertPreTokenizer;
use tokenizers::{
    Model, NormalizedString, Normalizer, OffsetReferential, OffsetType, PreTokenizedString,
    PreTokenizer,
};

use crate::artifacts;
use crate::config::Config;
use crate::errors::{Error, Result};
use crate::validate;
use crate::{Tokenize, Vocabulary};

#[derive(Debug)]
pub struct WordPieceTokenizer {
    normalizer: BertNormalizer,
    pre_tokenizer: BertPreTokenizer,
    model: WordPiece,
    start_id: u32,
    pad_id: u32,
    unknown_id: u32,
}

impl WordPieceTokenizer {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        validate::validate_config(cfg)?;
        let special = &cfg.special_tokens;
        let model = artifacts::load_wordpiece(
            &cfg.vocab,
            &special.unknown,
            cfg.max_input_chars_per_word,
        )?;
        validate::validate_model(&model, cfg)?;

        let id_of = |token: &str| {
            model.token_to_id(token).ok_or_else(|| {
                Error::Validation(format!("special token '{token}' missing from vocabulary"))
            })
        };
        let start_id = id_of(&special.start)?;
        let pad_id = id_of(&special.pad)?;
        let unknown_id = id_of(&special.unknown)?;

        log::debug!(
            "loaded wordpiece vocabulary of {} tokens from {}",
            model.get_vocab_size(),
            cfg.vocab.display()
        );

        Ok(Self {
            // strip_accents follows lowercase when unset, as in BERT.
            normalizer: BertNormalizer::new(true, true, None, cfg.lowercase),
            pre_tokenizer: BertPreTokenizer,
            model,
            start_id,
            pad_id,
            unknown_id,
        })
    }
}

impl Tokenize for WordPieceTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<String>> {
        let mut normalized = NormalizedString::from(text);
        self.normalizer.normalize(&mut normalized)?;

        let mut pretokenized = PreTokenizedString::from(normalized);
        self.pre_tokenizer.pre_tokenize(&mut pretokenized)?;
        pretokenized.tokenize(|piece| self.model.tokenize(piece.get()))?;

        Ok(pretokenized
            .get_splits(OffsetReferential::Original, OffsetType::Byte)
            .into_iter()
            .flat_map(|(_, _, tokens)| tokens.iter().flatten().map(|token| token.value.clone()))
            .collect())
    }
}

impl Vocabulary for WordPieceTokenizer {
    fn get(&self, token: &str) -> u32 {
        self.model.token_to_id(token).unwrap_or(self.unknown_id)
    }

    fn start_id(&self) -> u32 {
        self.start_id
    }

    fn pad_id(&self) -> u32 {
        self.pad_id
    }

    fn len(&self) -> usize {
        self.model.get_vocab_size()
    }
}
