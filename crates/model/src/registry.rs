//! Known pretrained backbones and the Hub repositories that host them.

use crate::error::{ModelError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PretrainedBackbone {
    pub name: &'static str,
    pub repo: &'static str,
    pub revision: &'static str,
    /// Whether the vocabulary expects lowercased input.
    pub lowercase: bool,
    /// SHA-256 of `model.safetensors`. When unset, the digest the Hub
    /// publishes for the file is used instead.
    pub weights_sha256: Option<&'static str>,
}

const KNOWN_BACKBONES: &[PretrainedBackbone] = &[
    PretrainedBackbone {
        name: "google_bert_base_en",
        repo: "google-bert/bert-base-uncased",
        revision: "main",
        lowercase: true,
        weights_sha256: None,
    },
    PretrainedBackbone {
        name: "google_bert_base_en_cased",
        repo: "google-bert/bert-base-cased",
        revision: "main",
        lowercase: false,
        weights_sha256: None,
    },
    PretrainedBackbone {
        name: "google_bert_base_zh",
        repo: "google-bert/bert-base-chinese",
        revision: "main",
        lowercase: false,
        weights_sha256: None,
    },
    PretrainedBackbone {
        name: "google_bert_base_multilingual",
        repo: "google-bert/bert-base-multilingual-cased",
        revision: "main",
        lowercase: false,
        weights_sha256: None,
    },
];

pub fn known_backbones() -> &'static [PretrainedBackbone] {
    KNOWN_BACKBONES
}

pub fn resolve(name: &str) -> Result<&'static PretrainedBackbone> {
    KNOWN_BACKBONES
        .iter()
        .find(|backbone| backbone.name == name)
        .ok_or_else(|| ModelError::UnknownBackbone {
            name: name.to_string(),
            known: KNOWN_BACKBONES
                .iter()
                .map(|backbone| backbone.name)
                .collect::<Vec<_>>()
                .join(", "),
        })
}
