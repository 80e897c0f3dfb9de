//! Adaptive-depth BERT sentence classification.
//!
//! A [`FastBert`] attaches a classifier head to every encoder layer. Training
//! first fine-tunes the backbone with the last head (the teacher), then
//! distills the teacher into the earlier heads (the students). At inference
//! each head reports its uncertainty and the pass stops at the first head
//! that is confident enough for the requested `speed`.

use std::path::Path;

pub use model::{
    sha256_file, BackboneConfig, ExecutionTrace, FastBertModel, HubProvisioner, LabelSpace,
    LocalProvisioner, ModelError, ModelOptions, Pooling, WeightProvisioner,
};
pub use training::{
    Dataset, EvaluationSummary, FitOptions, FitReport, RunConfig, TrainingError, TrainingPhase,
};

use training::{CheckpointInfo, ModelSection};

pub type Result<T> = std::result::Result<T, TrainingError>;

pub struct FastBert {
    model: FastBertModel,
}

impl FastBert {
    /// Builds a classifier over a registered backbone, downloading its
    /// pretrained files from the Hugging Face Hub when not cached.
    pub fn new<S: Into<String>>(
        backbone: &str,
        labels: Vec<S>,
        options: ModelOptions,
    ) -> Result<Self> {
        Self::with_provisioner(backbone, labels, options, &HubProvisioner::new())
    }

    pub fn with_provisioner<S: Into<String>>(
        backbone: &str,
        labels: Vec<S>,
        options: ModelOptions,
        provisioner: &dyn WeightProvisioner,
    ) -> Result<Self> {
        let model = FastBertModel::from_pretrained(backbone, labels, options, provisioner)?;
        log::info!("{}", model.describe()?.trim_end());
        Ok(Self { model })
    }

    /// Builds the model described by a run configuration's `[model]`
    /// section.
    pub fn from_section(section: &ModelSection) -> Result<Self> {
        let provisioner = provisioner_for(section);
        Self::with_provisioner(
            &section.backbone,
            section.labels.clone(),
            section.options.clone(),
            provisioner.as_ref(),
        )
    }

    /// Wraps a model built directly, e.g. with a custom provisioner.
    pub fn from_model(model: FastBertModel) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &FastBertModel {
        &self.model
    }

    /// Trains on parallel sentence and label lists; see [`FitOptions`] for
    /// the validation set and checkpoint location.
    pub fn fit(
        &mut self,
        sentences: Vec<String>,
        labels: Vec<String>,
        options: FitOptions,
    ) -> Result<FitReport> {
        let train = Dataset::new(sentences, labels)?;
        let mut trainer = training::Trainer::new(options)?;
        trainer.fit(&mut self.model, &train)
    }

    /// Label name and executed layer count for one sentence.
    pub fn predict(&self, sentence: &str, speed: f32) -> Result<(String, usize)> {
        Ok(self.model.predict(sentence, speed)?)
    }

    pub fn evaluate(&self, data: &Dataset, speed: f32) -> Result<EvaluationSummary> {
        training::evaluate(&self.model, data, speed)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        training::save_checkpoint(
            &self.model,
            path.as_ref(),
            CheckpointInfo {
                phase: TrainingPhase::Final,
                epoch: None,
                accuracy: None,
            },
        )?;
        Ok(())
    }

    /// Restores every parameter, verifying the checkpoint manifest when one
    /// sits next to the file.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<()> {
        training::load_checkpoint(&self.model, path.as_ref())?;
        Ok(())
    }

    pub fn to_device(&mut self, device: &str) -> Result<()> {
        Ok(self.model.to_device(device)?)
    }
}

/// Local directory when `local_weights` is set, the Hub otherwise.
pub fn provisioner_for(section: &ModelSection) -> Box<dyn WeightProvisioner> {
    match &section.local_weights {
        Some(dir) => {
            let mut local = LocalProvisioner::new(dir);
            if let Some(digest) = &section.weights_sha256 {
                local = local.with_expected_sha256(digest);
            }
            Box::new(local)
        }
        None => {
            let mut hub = HubProvisioner::new();
            if let Some(dir) = &section.cache_dir {
                hub = hub.with_cache_dir(dir);
            }
            if let Some(digest) = &section.weights_sha256 {
                hub = hub.with_expected_sha256(digest);
            }
            Box::new(hub)
        }
    }
}
