//! Fixed-length `(ids, mask)` encoding.

use crate::errors::{Error, Result};
use crate::Vocabulary;

/// Token ids and their 0/1 attention mask, both exactly `seq_length` long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSequence {
    ids: Vec<u32>,
    mask: Vec<u32>,
}

impl TokenSequence {
    /// Prefixes the start token, then truncates to `seq_length` (keeping the
    /// earliest tokens) or pads with the pad id and mask 0.
    pub fn encode<V, S>(tokens: &[S], vocab: &V, seq_length: usize) -> Result<Self>
    where
        V: Vocabulary + ?Sized,
        S: AsRef<str>,
    {
        if seq_length == 0 {
            return Err(Error::InvalidConfig("seq_length must be at least 1".into()));
        }

        let mut ids = Vec::with_capacity(seq_length);
        ids.push(vocab.start_id());
        ids.extend(
            tokens
                .iter()
                .take(seq_length - 1)
                .map(|token| vocab.get(token.as_ref())),
        );
        let mut mask = vec![1u32; ids.len()];

        ids.resize(seq_length, vocab.pad_id());
        mask.resize(seq_length, 0);
        Ok(Self { ids, mask })
    }

    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    pub fn mask(&self) -> &[u32] {
        &self.mask
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Number of positions holding real tokens, start token included.
    pub fn real_tokens(&self) -> usize {
        self.mask.iter().filter(|&&m| m == 1).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapVocab(HashMap<&'static str, u32>);

    impl Vocabulary for MapVocab {
        fn get(&self, token: &str) -> u32 {
            self.0.get(token).copied().unwrap_or(1)
        }
        fn start_id(&self) -> u32 {
            101
        }
        fn pad_id(&self) -> u32 {
            0
        }
        fn len(&self) -> usize {
            self.0.len()
        }
    }

    fn vocab() -> MapVocab {
        MapVocab(HashMap::from([("a", 5), ("b", 6), ("c", 7), ("d", 8), ("e", 9)]))
    }

    #[test]
    fn long_input_is_truncated_after_start_token() -> Result<()> {
        let seq = TokenSequence::encode(&["a", "b", "c", "d", "e"], &vocab(), 4)?;
        assert_eq!(seq.ids(), &[101, 5, 6, 7]);
        assert_eq!(seq.mask(), &[1, 1, 1, 1]);
        Ok(())
    }

    #[test]
    fn short_input_is_padded() -> Result<()> {
        let seq = TokenSequence::encode(&["c"], &vocab(), 4)?;
        assert_eq!(seq.ids(), &[101, 7, 0, 0]);
        assert_eq!(seq.mask(), &[1, 1, 0, 0]);
        assert_eq!(seq.real_tokens(), 2);
        Ok(())
    }

    #[test]
    fn length_is_always_seq_length() -> Result<()> {
        let tokens = ["a"; 9];
        for seq_length in 1..12 {
            for n in 0..tokens.len() {
                let seq = TokenSequence::encode(&tokens[..n], &vocab(), seq_length)?;
                assert_eq!(seq.ids().len(), seq_length);
                assert_eq!(seq.mask().len(), seq_length);
                assert_eq!(seq.ids()[0], 101);
            }
        }
        Ok(())
    }

    #[test]
    fn unknown_tokens_use_vocabulary_fallback() -> Result<()> {
        let seq = TokenSequence::encode(&["zzz"], &vocab(), 3)?;
        assert_eq!(seq.ids(), &[101, 1, 0]);
        Ok(())
    }

    #[test]
    fn zero_length_is_rejected() {
        assert!(TokenSequence::encode(&["a"], &vocab(), 0).is_err());
    }
}
