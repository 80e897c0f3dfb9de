use model::{ModelError, ModelOptions};
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

/// Hyperparameters for both training phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitOptions {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Phase 2 rate; `10 × learning_rate` when unset.
    #[serde(default)]
    pub distillation_learning_rate: Option<f64>,
    #[serde(default = "default_finetuning_epochs")]
    pub finetuning_epochs: usize,
    #[serde(default = "default_distillation_epochs")]
    pub distillation_epochs: usize,
    #[serde(default = "default_report_every")]
    pub report_every: usize,
    #[serde(default = "default_warmup_fraction")]
    pub warmup_fraction: f64,
    #[serde(default = "default_dev_speed")]
    pub dev_speed: f32,
    #[serde(default)]
    pub schedule: ScheduleKind,
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,
    #[serde(default)]
    pub tensorboard_dir: Option<PathBuf>,
    /// Validation sentences; filled from `[data]` when loaded from a run config.
    #[serde(skip)]
    pub dev_sentences: Vec<String>,
    #[serde(skip)]
    pub dev_labels: Vec<String>,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            learning_rate: default_learning_rate(),
            distillation_learning_rate: None,
            finetuning_epochs: default_finetuning_epochs(),
            distillation_epochs: default_distillation_epochs(),
            report_every: default_report_every(),
            warmup_fraction: default_warmup_fraction(),
            dev_speed: default_dev_speed(),
            schedule: ScheduleKind::default(),
            weight_decay: default_weight_decay(),
            seed: default_seed(),
            checkpoint_path: default_checkpoint_path(),
            tensorboard_dir: None,
            dev_sentences: Vec::new(),
            dev_labels: Vec::new(),
        }
    }
}

impl FitOptions {
    pub fn distillation_learning_rate(&self) -> f64 {
        self.distillation_learning_rate
            .unwrap_or(self.learning_rate * DISTILLATION_LR_MULTIPLIER)
    }

    pub fn validate(&self) -> Result<(), TrainingError> {
        let mut errors = Vec::new();

        if self.batch_size == 0 {
            errors.push("batch_size must be greater than 0".to_string());
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            errors.push("learning_rate must be greater than 0".to_string());
        }
        if let Some(lr) = self.distillation_learning_rate {
            if lr.is_nan() || lr <= 0.0 {
                errors.push("distillation_learning_rate must be greater than 0".to_string());
            }
        }
        if self.report_every == 0 {
            errors.push("report_every must be greater than 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.warmup_fraction) {
            errors.push("warmup_fraction must be in [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.dev_speed) {
            errors.push("dev_speed must be in [0, 1]".to_string());
        }
        if self.weight_decay.is_nan() || self.weight_decay < 0.0 {
            errors.push("weight_decay must be >= 0".to_string());
        }
        if self.checkpoint_path.as_os_str().is_empty() {
            errors.push("checkpoint_path must not be empty".to_string());
        }
        if self.dev_sentences.len() != self.dev_labels.len() {
            errors.push(format!(
                "dev_sentences ({}) and dev_labels ({}) differ in length",
                self.dev_sentences.len(),
                self.dev_labels.len()
            ));
        }

        if !errors.is_empty() {
            return Err(TrainingError::validation(errors));
        }
        Ok(())
    }
}

/// Learning-rate schedule shape shared by both phases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Linear warmup, then linear decay to zero at the last step.
    #[default]
    WarmupLinear,
    /// Linear warmup, then the base rate until the end.
    ConstantWithWarmup,
}

/// Backbone and labels for a command-line run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSection {
    pub backbone: String,
    pub labels: Vec<String>,
    #[serde(flatten)]
    pub options: ModelOptions,
    /// SHA-256 the pretrained weights must match, overriding the registry's
    /// pin and the Hub's published digest. Required with `local_weights`.
    #[serde(default)]
    pub weights_sha256: Option<String>,
    /// Use pretrained files from this directory instead of the Hub.
    #[serde(default)]
    pub local_weights: Option<PathBuf>,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

/// Tab-separated `label<TAB>sentence` files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default)]
    pub train: Option<PathBuf>,
    #[serde(default)]
    pub dev: Option<PathBuf>,
    #[serde(default)]
    pub test: Option<PathBuf>,
}

impl DataConfig {
    fn apply_base_path(&mut self, base: &Path) {
        for path in [self.train.as_mut(), self.dev.as_mut(), self.test.as_mut()]
            .into_iter()
            .flatten()
        {
            absolutize_in_place(path, base);
        }
    }
}

/// `[model]`, `[data]` and `[fit]` sections of a run configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub model: ModelSection,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub fit: FitOptions,
}

impl RunConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TrainingError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut config: RunConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | Some("tml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(TrainingError::ConfigFormat(format!(
                    "unsupported configuration extension '{}'",
                    other
                )));
            }
        };

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.apply_base_path(base_dir);
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TrainingError> {
        let mut errors = Vec::new();
        if self.model.backbone.trim().is_empty() {
            errors.push("model.backbone must not be empty".to_string());
        }
        if self.model.labels.is_empty() {
            errors.push("model.labels must not be empty".to_string());
        }
        if let Err(err) = self.model.options.validate() {
            errors.push(format!("model: {err}"));
        }
        if let Err(TrainingError::Validation(messages)) = self.fit.validate() {
            errors.extend(messages.into_iter().map(|m| format!("fit.{m}")));
        }

        if !errors.is_empty() {
            return Err(TrainingError::validation(errors));
        }
        Ok(())
    }

    fn apply_base_path(&mut self, base: &Path) {
        self.data.apply_base_path(base);
        absolutize_in_place(&mut self.fit.checkpoint_path, base);
        for path in [
            self.fit.tensorboard_dir.as_mut(),
            self.model.local_weights.as_mut(),
            self.model.cache_dir.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            absolutize_in_place(path, base);
        }
    }
}

fn absolutize_in_place(path: &mut PathBuf, base: &Path) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

const DISTILLATION_LR_MULTIPLIER: f64 = 10.0;

fn default_batch_size() -> usize {
    16
}

fn default_learning_rate() -> f64 {
    2e-5
}

fn default_finetuning_epochs() -> usize {
    5
}

fn default_distillation_epochs() -> usize {
    10
}

fn default_report_every() -> usize {
    100
}

fn default_warmup_fraction() -> f64 {
    0.1
}

fn default_dev_speed() -> f32 {
    0.5
}

fn default_weight_decay() -> f64 {
    0.01
}

fn default_seed() -> u64 {
    7
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("fastbert.safetensors")
}

#[derive(Debug)]
pub enum TrainingError {
    Io(std::io::Error),
    ConfigFormat(String),
    Validation(Vec<String>),
    Initialization(String),
    Runtime(String),
    /// Accuracy was requested over zero examples.
    EmptyEvaluationSet,
    Model(ModelError),
}

impl TrainingError {
    pub fn initialization(message: impl Into<String>) -> Self {
        Self::Initialization(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }

    pub fn validation(messages: Vec<String>) -> Self {
        Self::Validation(messages)
    }
}

impl fmt::Display for TrainingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingError::Io(err) => write!(f, "io error: {}", err),
            TrainingError::ConfigFormat(err) => write!(f, "failed to parse config: {}", err),
            TrainingError::Validation(messages) => {
                write!(f, "invalid configuration: {}", messages.join("; "))
            }
            TrainingError::Initialization(msg) => {
                write!(f, "trainer initialization failed: {}", msg)
            }
            TrainingError::Runtime(msg) => write!(f, "training failed: {}", msg),
            TrainingError::EmptyEvaluationSet => {
                write!(f, "cannot evaluate accuracy over an empty set")
            }
            TrainingError::Model(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for TrainingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TrainingError::Io(err) => Some(err),
            TrainingError::Model(err) => Some(err),
            TrainingError::ConfigFormat(_)
            | TrainingError::Validation(_)
            | TrainingError::EmptyEvaluationSet => None,
            TrainingError::Initialization(_) | TrainingError::Runtime(_) => None,
        }
    }
}

impl From<std::io::Error> for TrainingError {
    fn from(value: std::io::Error) -> Self {
        TrainingError::Io(value)
    }
}

impl From<toml::de::Error> for TrainingError {
    fn from(value: toml::de::Error) -> Self {
        TrainingError::ConfigFormat(value.to_string())
    }
}

impl From<serde_json::Error> for TrainingError {
    fn from(value: serde_json::Error) -> Self {
        TrainingError::ConfigFormat(value.to_string())
    }
}

impl From<ModelError> for TrainingError {
    fn from(value: ModelError) -> Self {
        TrainingError::Model(value)
    }
}
