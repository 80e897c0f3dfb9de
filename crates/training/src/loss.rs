use candle_core::{DType, Tensor, D};
use candle_nn::ops;

use crate::TrainingError;

/// Floor applied to teacher probabilities before taking their log.
const PROB_FLOOR: f64 = 1e-12;

/// Negative log-likelihood of log-softmax logits against gold label ids,
/// averaged over the batch.
#[derive(Debug, Clone, Default)]
pub struct CrossEntropyLoss;

impl CrossEntropyLoss {
    pub fn new() -> Self {
        Self
    }

    /// `logits` is `(batch, labels_num)`, `targets` holds `batch` label ids.
    pub fn compute(&self, logits: &Tensor, targets: &Tensor) -> Result<LossOutput, TrainingError> {
        let (batch, labels_num) = logits.dims2().map_err(|_| {
            TrainingError::runtime("cross entropy expects (batch, labels) logits")
        })?;
        if batch == 0 || labels_num == 0 {
            return Err(TrainingError::runtime(
                "no examples available for loss computation",
            ));
        }
        if targets.dims() != [batch] {
            return Err(TrainingError::runtime(format!(
                "targets shape {:?} does not match batch of {}",
                targets.dims(),
                batch
            )));
        }

        let targets = match targets.dtype() {
            DType::U32 => targets.clone(),
            DType::I64 | DType::U8 => targets.to_dtype(DType::U32).map_err(to_runtime_error)?,
            dtype => {
                return Err(TrainingError::runtime(format!(
                    "unsupported target dtype {:?} for cross entropy",
                    dtype
                )))
            }
        }
        .to_device(logits.device())
        .map_err(to_runtime_error)?;

        let log_probs = ops::log_softmax(logits, D::Minus1).map_err(to_runtime_error)?;
        let nll = log_probs
            .gather(&targets.unsqueeze(1).map_err(to_runtime_error)?, 1)
            .map_err(to_runtime_error)?
            .neg()
            .map_err(to_runtime_error)?;
        let average_loss = nll.mean_all().map_err(to_runtime_error)?;
        let average_loss_value = average_loss.to_vec0::<f32>().map_err(to_runtime_error)?;

        let predictions = logits.argmax(D::Minus1).map_err(to_runtime_error)?;
        let correct = predictions
            .eq(&targets)
            .map_err(to_runtime_error)?
            .to_dtype(DType::F32)
            .map_err(to_runtime_error)?
            .sum_all()
            .map_err(to_runtime_error)?
            .to_vec0::<f32>()
            .map_err(to_runtime_error)?
            .round() as usize;

        Ok(LossOutput {
            loss: average_loss,
            metrics: LossMetrics {
                average_loss: average_loss_value,
                examples: batch,
                correct,
            },
        })
    }
}

/// Kullback-Leibler divergence from a fixed teacher distribution to a
/// student's, `Σ p·(ln p − ln q) / batch`.
#[derive(Debug, Clone, Default)]
pub struct DistillationLoss;

impl DistillationLoss {
    pub fn new() -> Self {
        Self
    }

    /// `student_logits` are raw `(batch, labels_num)` scores; `teacher_probs`
    /// is a probability distribution of the same shape and carries no
    /// gradient.
    pub fn compute(
        &self,
        student_logits: &Tensor,
        teacher_probs: &Tensor,
    ) -> Result<Tensor, TrainingError> {
        let (batch, _) = student_logits.dims2().map_err(|_| {
            TrainingError::runtime("distillation expects (batch, labels) student logits")
        })?;
        if batch == 0 {
            return Err(TrainingError::runtime(
                "no examples available for loss computation",
            ));
        }
        if student_logits.dims() != teacher_probs.dims() {
            return Err(TrainingError::runtime(format!(
                "student shape {:?} does not match teacher shape {:?}",
                student_logits.dims(),
                teacher_probs.dims()
            )));
        }

        let teacher = teacher_probs.detach();
        let student_log_probs =
            ops::log_softmax(student_logits, D::Minus1).map_err(to_runtime_error)?;
        let teacher_log_probs = teacher
            .clamp(PROB_FLOOR, 1.0)
            .map_err(to_runtime_error)?
            .log()
            .map_err(to_runtime_error)?;

        let gap = (teacher_log_probs - student_log_probs).map_err(to_runtime_error)?;
        (teacher * gap)
            .map_err(to_runtime_error)?
            .sum_all()
            .map_err(to_runtime_error)?
            .affine(1.0 / batch as f64, 0.0)
            .map_err(to_runtime_error)
    }
}

#[derive(Debug, Clone)]
pub struct LossOutput {
    pub loss: Tensor,
    pub metrics: LossMetrics,
}

#[derive(Debug, Clone)]
pub struct LossMetrics {
    average_loss: f32,
    examples: usize,
    correct: usize,
}

impl LossMetrics {
    pub fn average_loss(&self) -> f32 {
        self.average_loss
    }

    pub fn examples(&self) -> usize {
        self.examples
    }

    pub fn correct(&self) -> usize {
        self.correct
    }

    pub fn accuracy(&self) -> f32 {
        if self.examples == 0 {
            0.0
        } else {
            self.correct as f32 / self.examples as f32
        }
    }
}

pub(crate) fn to_runtime_error(err: candle_core::Error) -> TrainingError {
    TrainingError::runtime(err.to_string())
}
