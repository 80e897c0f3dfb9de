use std::path::{Path, PathBuf};

use candle_core::Tensor;
use candle_nn::ops;
use model::{Classifier, FastBertModel};

use crate::{
    checkpoint::{self, CheckpointInfo, TrainingPhase},
    data::{Dataset, ShuffledBatches},
    logging::{Logger, LoggingSettings},
    loss::{to_runtime_error, CrossEntropyLoss, DistillationLoss, LossOutput},
    metrics::{EvaluationMetrics, EvaluationSummary, LossWindow, StepSnapshot, TrainingMetrics},
    optimizer::{AdamWConfig, TrainerOptimizer, TrainerOptimizerOptions},
    scheduler::{build_scheduler, training_steps, LRScheduler},
    FitOptions, TrainingError,
};

/// When a phase writes its checkpoint after an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointPolicy {
    /// Only when accuracy strictly beats every earlier epoch of the phase.
    OnImprovement,
    /// After every epoch, overwriting the previous file.
    EveryEpoch,
}

impl CheckpointPolicy {
    pub fn for_phase(phase: TrainingPhase) -> Self {
        match phase {
            TrainingPhase::Finetuning => CheckpointPolicy::OnImprovement,
            TrainingPhase::Distillation | TrainingPhase::Final => CheckpointPolicy::EveryEpoch,
        }
    }
}

/// Tracks the best accuracy seen so far; the first observation always
/// counts as an improvement.
#[derive(Debug, Clone, Default)]
pub struct ImprovementGate {
    best: Option<f64>,
}

impl ImprovementGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether `accuracy` strictly exceeds the best so far, and
    /// records it if so.
    pub fn observe(&mut self, accuracy: f64) -> bool {
        let improved = match self.best {
            Some(best) => accuracy > best,
            None => true,
        };
        if improved {
            self.best = Some(accuracy);
        }
        improved
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }
}

#[derive(Debug, Clone)]
pub struct EpochReport {
    pub epoch: usize,
    pub mean_loss: Option<f64>,
    pub evaluation: EvaluationSummary,
    pub checkpoint_saved: bool,
}

#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub phase: TrainingPhase,
    pub steps: usize,
    pub epochs: Vec<EpochReport>,
    pub skipped: bool,
}

impl PhaseReport {
    fn new(phase: TrainingPhase) -> Self {
        Self {
            phase,
            steps: 0,
            epochs: Vec::new(),
            skipped: false,
        }
    }

    pub fn last_evaluation(&self) -> Option<&EvaluationSummary> {
        self.epochs.last().map(|epoch| &epoch.evaluation)
    }
}

#[derive(Debug, Clone)]
pub struct FitReport {
    pub finetuning: PhaseReport,
    pub distillation: PhaseReport,
    pub checkpoint: PathBuf,
}

/// Two-phase training: supervised fine-tuning of the backbone and teacher
/// head, then self-distillation of every student head from the frozen
/// teacher.
pub struct Trainer {
    options: FitOptions,
    logger: Logger,
}

impl Trainer {
    pub fn new(options: FitOptions) -> Result<Self, TrainingError> {
        options.validate()?;
        let logger = Logger::new(LoggingSettings::new(options.tensorboard_dir.clone(), 1))?;
        Ok(Self { options, logger })
    }

    pub fn options(&self) -> &FitOptions {
        &self.options
    }

    /// Runs both phases and writes the final checkpoint.
    ///
    /// The validation set comes from `dev_sentences`/`dev_labels`; when
    /// empty, evaluation uses `train`.
    pub fn fit(
        &mut self,
        model: &mut FastBertModel,
        train: &Dataset,
    ) -> Result<FitReport, TrainingError> {
        if train.is_empty() {
            return Err(TrainingError::validation(vec![
                "training set must not be empty".to_string(),
            ]));
        }
        let validation = Dataset::new(
            self.options.dev_sentences.clone(),
            self.options.dev_labels.clone(),
        )?;
        model.labels().ids_for(train.labels())?;
        model.labels().ids_for(validation.labels())?;
        let dev = if validation.is_empty() {
            log::info!("no validation set given; evaluating on the training set");
            train
        } else {
            &validation
        };

        if let Err(err) = model.device().set_seed(self.options.seed) {
            log::debug!("device RNG not seeded: {err}");
        }
        log::info!(
            "training {} layers on {:?}: {} train / {} dev examples",
            model.num_layers(),
            model.device(),
            train.len(),
            dev.len()
        );

        let finetuning = self.fine_tune_backbone(model, train, dev)?;
        let distillation = self.self_distill(model, train, dev)?;

        let path = self.options.checkpoint_path.clone();
        checkpoint::save_checkpoint(
            model,
            &path,
            CheckpointInfo {
                phase: TrainingPhase::Final,
                epoch: None,
                accuracy: distillation
                    .last_evaluation()
                    .or(finetuning.last_evaluation())
                    .map(|summary| summary.accuracy),
            },
        )?;
        self.logger.flush();
        log::info!("final model saved to {}", path.display());

        Ok(FitReport {
            finetuning,
            distillation,
            checkpoint: path,
        })
    }

    /// Phase 1: trains the backbone and teacher head against gold labels,
    /// keeping the best epoch by validation accuracy at speed 0.
    pub fn fine_tune_backbone(
        &mut self,
        model: &FastBertModel,
        train: &Dataset,
        dev: &Dataset,
    ) -> Result<PhaseReport, TrainingError> {
        let phase = TrainingPhase::Finetuning;
        let mut report = PhaseReport::new(phase);
        let epochs = self.options.finetuning_epochs;
        let learning_rate = self.options.learning_rate;

        let targets = model.labels().ids_for(train.labels())?;
        let mut optimizer = TrainerOptimizer::new(
            model.finetuning_parameters()?,
            AdamWConfig::bert(learning_rate, self.options.weight_decay),
            TrainerOptimizerOptions::default(),
        )?;
        let mut scheduler = self.scheduler(learning_rate, train.len(), epochs)?;
        let loss_fn = CrossEntropyLoss::new();
        let policy = CheckpointPolicy::for_phase(phase);
        let mut gate = ImprovementGate::new();
        let mut saved_any = false;
        let mut progress = StepProgress::new(self.options.report_every);

        log::info!("{}: {} epochs at lr {:e}", phase.tag(), epochs, learning_rate);
        for epoch in 1..=epochs {
            let mut epoch_loss = LossWindow::new();
            let batches = self.batches(phase, train.len(), epoch);
            for batch in batches {
                let sentences: Vec<&str> = batch.iter().map(|&i| train.sentence(i)).collect();
                let gold: Vec<u32> = batch.iter().map(|&i| targets[i]).collect();
                let (ids, mask) = model.encode_batch(&sentences)?;
                let gold = Tensor::new(gold, model.device()).map_err(to_runtime_error)?;

                let logits = model.teacher_logits(&ids, &mask, true)?;
                let LossOutput { loss, metrics } = loss_fn.compute(&logits, &gold)?;
                let mut grads = loss.backward().map_err(to_runtime_error)?;

                let lr = scheduler.step();
                optimizer.set_learning_rate(lr);
                optimizer.step(&mut grads)?;

                let value = f64::from(metrics.average_loss());
                epoch_loss.push(value);
                if let Some(snapshot) = progress.record(batch.len(), value) {
                    self.logger.log_step(phase, epoch, progress.steps, lr, &snapshot);
                }
            }

            let evaluation = self.evaluate(model, dev, 0.0)?;
            self.logger.log_evaluation(phase, epoch, 0.0, &evaluation);

            let improved = gate.observe(evaluation.accuracy);
            let checkpoint_saved = match policy {
                CheckpointPolicy::OnImprovement => improved,
                CheckpointPolicy::EveryEpoch => true,
            };
            if checkpoint_saved {
                self.save(model, phase, epoch, evaluation.accuracy)?;
                saved_any = true;
            }
            report.epochs.push(EpochReport {
                epoch,
                mean_loss: epoch_loss.take_mean(),
                evaluation,
                checkpoint_saved,
            });
        }
        report.steps = progress.steps;

        if saved_any {
            checkpoint::load_checkpoint(model, &self.options.checkpoint_path)?;
            log::info!(
                "{}: restored best epoch (accuracy {:.4})",
                phase.tag(),
                gate.best().unwrap_or_default()
            );
        } else {
            log::warn!(
                "{}: no checkpoint was written; continuing from the current weights",
                phase.tag()
            );
        }
        self.logger.flush();
        Ok(report)
    }

    /// Phase 2: fits every student head to the teacher's soft predictions.
    /// Backbone and teacher parameters are left untouched.
    pub fn self_distill(
        &mut self,
        model: &FastBertModel,
        train: &Dataset,
        dev: &Dataset,
    ) -> Result<PhaseReport, TrainingError> {
        let phase = TrainingPhase::Distillation;
        let mut report = PhaseReport::new(phase);
        if model.num_layers() < 2 {
            log::warn!(
                "{}: a single-layer backbone has no student heads; skipping",
                phase.tag()
            );
            report.skipped = true;
            return Ok(report);
        }

        let epochs = self.options.distillation_epochs;
        let learning_rate = self.options.distillation_learning_rate();
        let dev_speed = self.options.dev_speed;

        let mut optimizer = TrainerOptimizer::new(
            model.distillation_parameters()?,
            AdamWConfig::bert(learning_rate, self.options.weight_decay),
            TrainerOptimizerOptions::default(),
        )?;
        let mut scheduler = self.scheduler(learning_rate, train.len(), epochs)?;
        let loss_fn = DistillationLoss::new();
        let policy = CheckpointPolicy::for_phase(phase);
        let mut gate = ImprovementGate::new();
        let mut progress = StepProgress::new(self.options.report_every);

        log::info!("{}: {} epochs at lr {:e}", phase.tag(), epochs, learning_rate);
        for epoch in 1..=epochs {
            let mut epoch_loss = LossWindow::new();
            let batches = self.batches(phase, train.len(), epoch);
            for batch in batches {
                let sentences: Vec<&str> = batch.iter().map(|&i| train.sentence(i)).collect();
                let (ids, mask) = model.encode_batch(&sentences)?;

                let (states, bias) = model.hidden_states(&ids, &mask, false)?;
                let teacher_index = model.cascade().teacher_index();
                let teacher_logits =
                    model
                        .cascade()
                        .teacher()
                        .infer(&states[teacher_index], &bias, false)?;
                let teacher_probs = ops::softmax(&teacher_logits, candle_core::D::Minus1)
                    .map_err(to_runtime_error)?
                    .detach();

                let mut total: Option<Tensor> = None;
                for (index, student) in model.cascade().students() {
                    let logits = student.infer(&states[index], &bias, true)?;
                    let loss = loss_fn.compute(&logits, &teacher_probs)?;
                    total = Some(match total {
                        Some(sum) => (sum + loss).map_err(to_runtime_error)?,
                        None => loss,
                    });
                }
                let Some(loss) = total else {
                    continue;
                };
                let value = f64::from(loss.to_vec0::<f32>().map_err(to_runtime_error)?);
                let mut grads = loss.backward().map_err(to_runtime_error)?;

                let lr = scheduler.step();
                optimizer.set_learning_rate(lr);
                optimizer.step(&mut grads)?;

                epoch_loss.push(value);
                if let Some(snapshot) = progress.record(batch.len(), value) {
                    self.logger.log_step(phase, epoch, progress.steps, lr, &snapshot);
                }
            }

            let evaluation = self.evaluate(model, dev, dev_speed)?;
            self.logger.log_evaluation(phase, epoch, dev_speed, &evaluation);

            let improved = gate.observe(evaluation.accuracy);
            let checkpoint_saved = match policy {
                CheckpointPolicy::OnImprovement => improved,
                CheckpointPolicy::EveryEpoch => true,
            };
            if checkpoint_saved {
                self.save(model, phase, epoch, evaluation.accuracy)?;
            }
            report.epochs.push(EpochReport {
                epoch,
                mean_loss: epoch_loss.take_mean(),
                evaluation,
                checkpoint_saved,
            });
        }
        report.steps = progress.steps;
        self.logger.flush();
        Ok(report)
    }

    /// Accuracy and mean executed depth of adaptive inference at `speed`,
    /// one sentence at a time.
    pub fn evaluate(
        &self,
        model: &FastBertModel,
        data: &Dataset,
        speed: f32,
    ) -> Result<EvaluationSummary, TrainingError> {
        evaluate(model, data, speed)
    }

    fn scheduler(
        &self,
        base_lr: f64,
        examples: usize,
        epochs: usize,
    ) -> Result<Box<dyn LRScheduler>, TrainingError> {
        let total = training_steps(examples, epochs, self.options.batch_size);
        build_scheduler(
            self.options.schedule,
            base_lr,
            total,
            self.options.warmup_fraction,
        )
    }

    fn batches(&self, phase: TrainingPhase, len: usize, epoch: usize) -> ShuffledBatches {
        ShuffledBatches::new(
            len,
            self.options.batch_size,
            shuffle_seed(self.options.seed, phase),
            epoch,
        )
    }

    fn save(
        &self,
        model: &FastBertModel,
        phase: TrainingPhase,
        epoch: usize,
        accuracy: f64,
    ) -> Result<(), TrainingError> {
        let path: &Path = &self.options.checkpoint_path;
        checkpoint::save_checkpoint(
            model,
            path,
            CheckpointInfo {
                phase,
                epoch: Some(epoch),
                accuracy: Some(accuracy),
            },
        )?;
        log::info!(
            "{} epoch={} saved checkpoint to {} (accuracy {:.4})",
            phase.tag(),
            epoch,
            path.display(),
            accuracy
        );
        Ok(())
    }
}

/// Standalone form of [`Trainer::evaluate`].
pub fn evaluate(
    model: &FastBertModel,
    data: &Dataset,
    speed: f32,
) -> Result<EvaluationSummary, TrainingError> {
    let mut metrics = EvaluationMetrics::default();
    for (sentence, label) in data.sentences().iter().zip(data.labels()) {
        let gold = model.labels().id(label)?;
        let trace = model.infer(sentence, speed)?;
        metrics.update(trace.label_id == gold, trace.exec_layer_num);
    }
    metrics.finalize()
}

/// Batch-order seed for `phase`, so the two phases never share an order.
fn shuffle_seed(seed: u64, phase: TrainingPhase) -> u64 {
    match phase {
        TrainingPhase::Distillation => seed ^ DISTILLATION_SEED_SALT,
        TrainingPhase::Finetuning | TrainingPhase::Final => seed,
    }
}

const DISTILLATION_SEED_SALT: u64 = 0x9e37_79b9_7f4a_7c15;

/// Step counter that yields a snapshot every `report_every` steps with the
/// mean loss of that window.
struct StepProgress {
    report_every: usize,
    steps: usize,
    window: LossWindow,
    metrics: TrainingMetrics,
}

impl StepProgress {
    fn new(report_every: usize) -> Self {
        Self {
            report_every: report_every.max(1),
            steps: 0,
            window: LossWindow::new(),
            metrics: TrainingMetrics::new(),
        }
    }

    fn record(&mut self, examples: usize, loss: f64) -> Option<StepSnapshot> {
        self.steps += 1;
        self.window.push(loss);
        let snapshot = self.metrics.record_step(examples as u64, loss);
        if self.steps % self.report_every != 0 {
            return None;
        }
        let mean = self.window.take_mean()?;
        Some(StepSnapshot {
            loss: mean,
            ..snapshot
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_saves_only_on_strict_improvement() {
        let mut gate = ImprovementGate::new();
        let decisions: Vec<bool> = [0.70, 0.65, 0.80]
            .into_iter()
            .map(|acc| gate.observe(acc))
            .collect();
        assert_eq!(decisions, vec![true, false, true]);
        assert_eq!(gate.best(), Some(0.80));
    }

    #[test]
    fn gate_ignores_ties_and_accepts_zero_first() {
        let mut gate = ImprovementGate::new();
        assert!(gate.observe(0.0));
        assert!(!gate.observe(0.0));
        assert!(gate.observe(0.5));
        assert!(!gate.observe(0.5));
    }

    #[test]
    fn phases_use_asymmetric_checkpoint_policies() {
        assert_eq!(
            CheckpointPolicy::for_phase(TrainingPhase::Finetuning),
            CheckpointPolicy::OnImprovement
        );
        assert_eq!(
            CheckpointPolicy::for_phase(TrainingPhase::Distillation),
            CheckpointPolicy::EveryEpoch
        );
    }

    #[test]
    fn progress_reports_window_means() {
        let mut progress = StepProgress::new(2);
        assert!(progress.record(4, 1.0).is_none());
        let snapshot = progress.record(4, 3.0).expect("report on second step");
        assert_eq!(snapshot.loss, 2.0);
        assert!(progress.record(4, 5.0).is_none());
        assert_eq!(progress.steps, 3);
    }

    #[test]
    fn phases_shuffle_in_different_orders() {
        let order = |phase| -> Vec<Vec<usize>> {
            (1..=3)
                .map(|epoch| {
                    ShuffledBatches::new(32, 4, shuffle_seed(42, phase), epoch)
                        .flatten()
                        .collect()
                })
                .collect()
        };
        let finetuning = order(TrainingPhase::Finetuning);
        let distillation = order(TrainingPhase::Distillation);
        for (a, b) in finetuning.iter().zip(&distillation) {
            assert_ne!(a, b);
        }
        assert_eq!(finetuning, order(TrainingPhase::Finetuning));
    }

    #[test]
    fn invalid_options_are_rejected_up_front() {
        let options = FitOptions {
            batch_size: 0,
            ..FitOptions::default()
        };
        assert!(matches!(
            Trainer::new(options),
            Err(TrainingError::Validation(_))
        ));
    }
}
