use std::path::Path;
use std::str::FromStr;

use candle_core::Device;
use layers::ActivationKind;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::head::Pooling;

/// Hyperparameters of a BERT encoder.
///
/// Field aliases accept the names used in Hugging Face `config.json` files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackboneConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    #[serde(alias = "num_hidden_layers")]
    pub num_layers: usize,
    #[serde(alias = "num_attention_heads")]
    pub num_heads: usize,
    pub intermediate_size: usize,
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
    #[serde(default = "default_dropout", alias = "hidden_dropout_prob")]
    pub hidden_dropout: f32,
    #[serde(default = "default_dropout", alias = "attention_probs_dropout_prob")]
    pub attention_dropout: f32,
    #[serde(default = "default_hidden_act")]
    pub hidden_act: String,
}

impl BackboneConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn activation(&self) -> Result<ActivationKind> {
        ActivationKind::from_str(&self.hidden_act).map_err(|e| ModelError::Config(e.to_string()))
    }

    /// Validate structural invariants before any parameter is allocated.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        for (name, value) in [
            ("vocab_size", self.vocab_size),
            ("hidden_size", self.hidden_size),
            ("num_layers", self.num_layers),
            ("num_heads", self.num_heads),
            ("intermediate_size", self.intermediate_size),
            ("max_position_embeddings", self.max_position_embeddings),
            ("type_vocab_size", self.type_vocab_size),
        ] {
            if value == 0 {
                errors.push(format!("{name} must be greater than zero"));
            }
        }
        if self.num_heads > 0 && self.hidden_size % self.num_heads != 0 {
            errors.push(format!(
                "hidden_size ({}) must be divisible by num_heads ({})",
                self.hidden_size, self.num_heads
            ));
        }
        for (name, p) in [
            ("hidden_dropout", self.hidden_dropout),
            ("attention_dropout", self.attention_dropout),
        ] {
            if !(0.0..1.0).contains(&p) {
                errors.push(format!("{name} must be in [0, 1)"));
            }
        }
        if self.layer_norm_eps.is_nan() || self.layer_norm_eps <= 0.0 {
            errors.push("layer_norm_eps must be positive".to_string());
        }
        if let Err(err) = self.activation() {
            errors.push(err.to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ModelError::Config(errors.join("; ")))
        }
    }
}

/// Construction-time options for a [`crate::FastBertModel`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOptions {
    #[serde(default = "default_seq_length")]
    pub seq_length: usize,
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default)]
    pub pooling: Pooling,
    /// Overrides the backbone's dropout and sets the classifier heads' dropout.
    #[serde(default)]
    pub dropout: Option<f32>,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            seq_length: default_seq_length(),
            device: default_device(),
            pooling: Pooling::default(),
            dropout: None,
        }
    }
}

impl ModelOptions {
    pub fn validate(&self) -> Result<()> {
        if self.seq_length == 0 {
            return Err(ModelError::Config("seq_length must be at least 1".into()));
        }
        if let Some(p) = self.dropout {
            if !(0.0..1.0).contains(&p) {
                return Err(ModelError::Config(format!("dropout {p} must be in [0, 1)")));
            }
        }
        parse_device(&self.device).map(|_| ())
    }
}

/// Parses `cpu`, `cuda`, `cuda:N`, `metal` or `metal:N`.
pub fn parse_device(spec: &str) -> Result<Device> {
    let spec = spec.trim().to_ascii_lowercase();
    let (kind, ordinal) = match spec.split_once(':') {
        Some((kind, ordinal)) => {
            let ordinal = ordinal
                .parse::<usize>()
                .map_err(|_| ModelError::Config(format!("invalid device ordinal in '{spec}'")))?;
            (kind.to_string(), ordinal)
        }
        None => (spec.clone(), 0),
    };
    match kind.as_str() {
        "cpu" => Ok(Device::Cpu),
        "cuda" => Ok(Device::new_cuda(ordinal)?),
        "metal" => Ok(Device::new_metal(ordinal)?),
        other => Err(ModelError::Config(format!("unsupported device '{other}'"))),
    }
}

fn default_seq_length() -> usize {
    128
}

fn default_device() -> String {
    "cpu".to_string()
}

fn default_max_position_embeddings() -> usize {
    512
}

fn default_type_vocab_size() -> usize {
    2
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

fn default_dropout() -> f32 {
    0.1
}

fn default_hidden_act() -> String {
    "gelu".to_string()
}
