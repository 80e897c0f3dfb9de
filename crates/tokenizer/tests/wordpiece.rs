use std::io::Write;

use tokenizer::{Config, Error, Result, TokenSequence, Tokenize, Vocabulary, WordPieceTokenizer};

const VOCAB: &[&str] = &[
    "[PAD]", "[UNK]", "[CLS]", "[SEP]", "the", "movie", "was", "great", "terrible", "play",
    "##ing", "!", ",", "好", "看",
];

fn write_vocab(lines: &[&str]) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::NamedTempFile::new()?;
    for line in lines {
        writeln!(file, "{line}")?;
    }
    file.flush()?;
    Ok(file)
}

#[test]
fn splits_words_into_wordpieces() -> Result<()> {
    let vocab = write_vocab(VOCAB)?;
    let tok = WordPieceTokenizer::from_config(&Config::new(vocab.path(), true))?;

    let tokens = tok.tokenize("The movie was PLAYING, great!")?;
    assert_eq!(
        tokens,
        vec!["the", "movie", "was", "play", "##ing", ",", "great", "!"]
    );
    Ok(())
}

#[test]
fn unknown_words_map_to_unknown_token() -> Result<()> {
    let vocab = write_vocab(VOCAB)?;
    let tok = WordPieceTokenizer::from_config(&Config::new(vocab.path(), true))?;

    let tokens = tok.tokenize("the zebra")?;
    assert_eq!(tokens, vec!["the", "[UNK]"]);
    assert_eq!(tok.get("zebra"), 1);
    assert_eq!(tok.get("movie"), 5);
    Ok(())
}

#[test]
fn cjk_characters_are_split_individually() -> Result<()> {
    let vocab = write_vocab(VOCAB)?;
    let tok = WordPieceTokenizer::from_config(&Config::new(vocab.path(), true))?;
    assert_eq!(tok.tokenize("好看")?, vec!["好", "看"]);
    Ok(())
}

#[test]
fn reserved_ids_come_from_vocabulary() -> Result<()> {
    let vocab = write_vocab(VOCAB)?;
    let tok = WordPieceTokenizer::from_config(&Config::new(vocab.path(), true))?;
    assert_eq!(tok.start_id(), 2);
    assert_eq!(tok.pad_id(), 0);
    assert_eq!(tok.len(), VOCAB.len());

    let tokens = tok.tokenize("great")?;
    let seq = TokenSequence::encode(&tokens, &tok, 4)?;
    assert_eq!(seq.ids(), &[2, 7, 0, 0]);
    assert_eq!(seq.mask(), &[1, 1, 0, 0]);
    Ok(())
}

#[test]
fn missing_special_token_is_rejected() -> Result<()> {
    let vocab = write_vocab(&["[PAD]", "[UNK]", "movie"])?;
    let err = WordPieceTokenizer::from_config(&Config::new(vocab.path(), true)).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    Ok(())
}

#[test]
fn missing_vocab_file_is_an_artifact_error() {
    let err = WordPieceTokenizer::from_config(&Config::new("/nonexistent/vocab.txt", true))
        .unwrap_err();
    assert!(matches!(err, Error::Artifact(_)));
}
