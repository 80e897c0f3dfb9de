//! The adaptive-depth classifier: tokenizer, BERT backbone, one head per
//! layer and the label space, with all parameters in a single `VarMap`.
//!
//! Parameter names are `backbone.*` for the encoder and
//! `classifiers.{i}.*` for the head after layer `i`.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use tokenizer::{TokenSequence, Tokenize, Vocabulary, WordPieceTokenizer};

use crate::backbone::Backbone;
use crate::cascade::Cascade;
use crate::config::{parse_device, BackboneConfig, ModelOptions};
use crate::controller::{AdaptiveController, ExecutionTrace};
use crate::encoder::BertEncoder;
use crate::error::{ModelError, Result};
use crate::head::{Classifier, ClassifierHead, HeadConfig};
use crate::labels::LabelSpace;
use crate::registry;
use crate::weights::{self, LoadReport, WeightProvisioner, BACKBONE_PREFIX};

pub const CLASSIFIERS_PREFIX: &str = "classifiers";

/// Tokenizer plus vocabulary, shareable across rebuilt models.
pub trait TextEncoder: Tokenize + Vocabulary + Send + Sync {}

impl<T: Tokenize + Vocabulary + Send + Sync> TextEncoder for T {}

pub struct FastBertModel {
    backbone_name: String,
    options: ModelOptions,
    device: Device,
    labels: LabelSpace,
    text_encoder: Arc<dyn TextEncoder>,
    varmap: VarMap,
    backbone: BertEncoder,
    cascade: Cascade<ClassifierHead>,
}

impl std::fmt::Debug for FastBertModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastBertModel")
            .field("backbone", &self.backbone_name)
            .field("layers", &self.cascade.len())
            .field("labels", &self.labels.names())
            .field("device", &self.device)
            .finish()
    }
}

impl FastBertModel {
    /// Builds a model around a registered pretrained backbone.
    ///
    /// The identifier and labels are validated before anything is fetched.
    pub fn from_pretrained<S: Into<String>>(
        identifier: &str,
        labels: Vec<S>,
        options: ModelOptions,
        provisioner: &dyn WeightProvisioner,
    ) -> Result<Self> {
        let backbone = registry::resolve(identifier)?;
        let labels = LabelSpace::new(labels)?;
        options.validate()?;

        let files = provisioner.provision(backbone)?;
        let config = BackboneConfig::from_json_file(&files.config)?;
        let tokenizer =
            WordPieceTokenizer::from_config(&tokenizer::Config::new(&files.vocab, backbone.lowercase))?;

        let mut model = Self::from_parts(config, Arc::new(tokenizer), labels, options)?;
        model.backbone_name = backbone.name.to_string();
        model.load_pretrained(&files.weights)?;
        Ok(model)
    }

    /// Builds a randomly initialised model from an explicit backbone config.
    pub fn from_parts(
        config: BackboneConfig,
        text_encoder: Arc<dyn TextEncoder>,
        labels: LabelSpace,
        options: ModelOptions,
    ) -> Result<Self> {
        options.validate()?;
        let device = parse_device(&options.device)?;
        Self::build("custom".to_string(), config, text_encoder, labels, options, device)
    }

    fn build(
        backbone_name: String,
        mut config: BackboneConfig,
        text_encoder: Arc<dyn TextEncoder>,
        labels: LabelSpace,
        options: ModelOptions,
        device: Device,
    ) -> Result<Self> {
        if let Some(p) = options.dropout {
            config.hidden_dropout = p;
            config.attention_dropout = p;
        }
        config.validate()?;
        if options.seq_length > config.max_position_embeddings {
            return Err(ModelError::Config(format!(
                "seq_length {} exceeds the backbone's {} positions",
                options.seq_length, config.max_position_embeddings
            )));
        }
        if text_encoder.len() > config.vocab_size {
            return Err(ModelError::Config(format!(
                "vocabulary of {} tokens does not fit the backbone's {} embeddings",
                text_encoder.len(),
                config.vocab_size
            )));
        }

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let backbone = BertEncoder::new(&config, vb.pp(BACKBONE_PREFIX))?;

        let head_dropout = options.dropout.unwrap_or(config.hidden_dropout);
        let heads_vb = vb.pp(CLASSIFIERS_PREFIX);
        let heads = (0..config.num_layers)
            .map(|index| {
                ClassifierHead::new(
                    HeadConfig::new(config.hidden_size, labels.len(), options.pooling, head_dropout),
                    heads_vb.pp(index),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let cascade = Cascade::new(heads)?;

        Ok(Self {
            backbone_name,
            options,
            device,
            labels,
            text_encoder,
            varmap,
            backbone,
            cascade,
        })
    }

    pub fn load_pretrained(&self, path: &Path) -> Result<LoadReport> {
        weights::load_pretrained(&self.varmap, path, &self.device)
    }

    pub fn backbone_name(&self) -> &str {
        &self.backbone_name
    }

    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn labels(&self) -> &LabelSpace {
        &self.labels
    }

    pub fn seq_length(&self) -> usize {
        self.options.seq_length
    }

    pub fn num_layers(&self) -> usize {
        self.cascade.len()
    }

    pub fn backbone(&self) -> &BertEncoder {
        &self.backbone
    }

    pub fn cascade(&self) -> &Cascade<ClassifierHead> {
        &self.cascade
    }

    pub fn controller(&self) -> Result<AdaptiveController<'_, BertEncoder, ClassifierHead>> {
        AdaptiveController::new(&self.backbone, &self.cascade)
    }

    pub fn encode(&self, sentence: &str) -> Result<TokenSequence> {
        let tokens = self.text_encoder.tokenize(sentence)?;
        Ok(TokenSequence::encode(
            &tokens,
            self.text_encoder.as_ref(),
            self.options.seq_length,
        )?)
    }

    /// `(ids, mask)` tensors shaped `(batch, seq_length)`.
    pub fn encode_batch<S: AsRef<str>>(&self, sentences: &[S]) -> Result<(Tensor, Tensor)> {
        let seq_length = self.options.seq_length;
        let mut ids = Vec::with_capacity(sentences.len() * seq_length);
        let mut mask = Vec::with_capacity(sentences.len() * seq_length);
        for sentence in sentences {
            let encoded = self.encode(sentence.as_ref())?;
            ids.extend_from_slice(encoded.ids());
            mask.extend_from_slice(encoded.mask());
        }
        let shape = (sentences.len(), seq_length);
        Ok((
            Tensor::from_vec(ids, shape, &self.device)?,
            Tensor::from_vec(mask, shape, &self.device)?,
        ))
    }

    /// Adaptive pass over one sentence.
    pub fn infer(&self, sentence: &str, speed: f32) -> Result<ExecutionTrace> {
        if !(0.0..=1.0).contains(&speed) {
            return Err(ModelError::InvalidSpeed(speed));
        }
        let (ids, mask) = self.encode_batch(&[sentence])?;
        self.controller()?.run(&ids, &mask, speed)
    }

    /// Predicted label name and the number of layers executed.
    pub fn predict(&self, sentence: &str, speed: f32) -> Result<(String, usize)> {
        let trace = self.infer(sentence, speed)?;
        let label = self.labels.name(trace.label_id)?.to_string();
        Ok((label, trace.exec_layer_num))
    }

    /// Full-depth teacher logits for a batch.
    pub fn teacher_logits(&self, ids: &Tensor, mask: &Tensor, trainable: bool) -> Result<Tensor> {
        let (states, bias) = self.controller()?.full_depth_hidden_states(ids, mask, trainable)?;
        let last = states
            .last()
            .ok_or_else(|| ModelError::Config("backbone produced no hidden states".into()))?;
        self.cascade.teacher().infer(last, &bias, trainable)
    }

    /// Every layer's hidden state plus the attention bias.
    pub fn hidden_states(&self, ids: &Tensor, mask: &Tensor, trainable: bool) -> Result<(Vec<Tensor>, Tensor)> {
        self.controller()?.full_depth_hidden_states(ids, mask, trainable)
    }

    pub fn head_prefix(index: usize) -> String {
        format!("{CLASSIFIERS_PREFIX}.{index}.")
    }

    /// All parameters, sorted by name.
    pub fn named_parameters(&self) -> Result<Vec<(String, Var)>> {
        let vars = self
            .varmap
            .data()
            .lock()
            .map_err(|_| ModelError::Config("parameter store lock poisoned".into()))?;
        let mut named: Vec<(String, Var)> =
            vars.iter().map(|(name, var)| (name.clone(), var.clone())).collect();
        named.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(named)
    }

    /// Backbone and teacher-head parameters.
    pub fn finetuning_parameters(&self) -> Result<Vec<(String, Var)>> {
        let teacher = Self::head_prefix(self.cascade.teacher_index());
        let backbone = format!("{BACKBONE_PREFIX}.");
        Ok(self
            .named_parameters()?
            .into_iter()
            .filter(|(name, _)| name.starts_with(&backbone) || name.starts_with(&teacher))
            .collect())
    }

    /// Student-head parameters.
    pub fn distillation_parameters(&self) -> Result<Vec<(String, Var)>> {
        let prefixes: Vec<String> = self
            .cascade
            .students()
            .map(|(index, _)| Self::head_prefix(index))
            .collect();
        Ok(self
            .named_parameters()?
            .into_iter()
            .filter(|(name, _)| prefixes.iter().any(|prefix| name.starts_with(prefix)))
            .collect())
    }

    pub fn snapshot(&self) -> Result<HashMap<String, Tensor>> {
        Ok(self
            .named_parameters()?
            .into_iter()
            .map(|(name, var)| (name, var.as_tensor().clone()))
            .collect())
    }

    /// Overwrites every parameter. The snapshot must name exactly this
    /// model's parameters with matching shapes.
    pub fn restore(&self, tensors: &HashMap<String, Tensor>) -> Result<()> {
        let params = self.named_parameters()?;
        let expected: HashSet<&str> = params.iter().map(|(name, _)| name.as_str()).collect();

        let mut missing: Vec<&str> = expected
            .iter()
            .copied()
            .filter(|name| !tensors.contains_key(*name))
            .collect();
        let mut unexpected: Vec<&str> = tensors
            .keys()
            .map(String::as_str)
            .filter(|name| !expected.contains(name))
            .collect();
        if !missing.is_empty() || !unexpected.is_empty() {
            missing.sort_unstable();
            unexpected.sort_unstable();
            return Err(ModelError::Snapshot(format!(
                "missing {missing:?}, unexpected {unexpected:?}"
            )));
        }

        for (name, var) in &params {
            let tensor = &tensors[name];
            if tensor.dims() != var.dims() {
                return Err(ModelError::Snapshot(format!(
                    "{name}: expected shape {:?}, found {:?}",
                    var.dims(),
                    tensor.dims()
                )));
            }
            var.set(&tensor.to_device(&self.device)?.to_dtype(var.dtype())?)?;
        }
        Ok(())
    }

    /// Writes every parameter to a safetensors file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        candle_core::safetensors::save(&self.snapshot()?, path)?;
        Ok(())
    }

    pub fn load(&self, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Err(ModelError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("checkpoint not found at {}", path.display()),
            )));
        }
        let tensors = candle_core::safetensors::load(path, &self.device)?;
        self.restore(&tensors)
    }

    /// Re-registers every parameter on `device`.
    pub fn to_device(&mut self, device: &str) -> Result<()> {
        let target = parse_device(device)?;
        let snapshot = self.snapshot()?;
        let mut options = self.options.clone();
        options.device = device.to_string();

        let rebuilt = Self::build(
            self.backbone_name.clone(),
            self.backbone.config().clone(),
            Arc::clone(&self.text_encoder),
            self.labels.clone(),
            options,
            target,
        )?;
        rebuilt.restore(&snapshot)?;
        *self = rebuilt;
        log::info!("moved model to {:?}", self.device);
        Ok(())
    }

    pub fn parameter_count(&self) -> Result<usize> {
        Ok(self
            .named_parameters()?
            .iter()
            .map(|(_, var)| var.elem_count())
            .sum())
    }

    /// Human-readable summary of the configuration.
    pub fn describe(&self) -> Result<String> {
        let config = self.backbone.config();
        let mut out = String::new();
        let _ = writeln!(out, "backbone:        {}", self.backbone_name);
        let _ = writeln!(out, "layers:          {}", self.backbone.num_layers());
        let _ = writeln!(out, "hidden_size:     {}", config.hidden_size);
        let _ = writeln!(out, "attention_heads: {}", config.num_heads);
        let _ = writeln!(out, "vocab_size:      {}", config.vocab_size);
        let _ = writeln!(out, "seq_length:      {}", self.options.seq_length);
        let _ = writeln!(out, "pooling:         {:?}", self.options.pooling);
        let _ = writeln!(out, "device:          {:?}", self.device);
        let _ = writeln!(out, "labels:          {}", self.labels.names().join(", "));
        let _ = writeln!(out, "parameters:      {}", self.parameter_count()?);
        Ok(out)
    }
}
