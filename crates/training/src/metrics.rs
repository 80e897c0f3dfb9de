use std::time::{Duration, Instant};

use crate::TrainingError;

/// Mean loss over the steps since the last report.
#[derive(Debug, Default)]
pub struct LossWindow {
    sum: f64,
    steps: usize,
}

impl LossWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, loss: f64) {
        self.sum += loss;
        self.steps += 1;
    }

    pub fn len(&self) -> usize {
        self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps == 0
    }

    /// Mean of the window, which is then cleared.
    pub fn take_mean(&mut self) -> Option<f64> {
        if self.steps == 0 {
            return None;
        }
        let mean = self.sum / self.steps as f64;
        self.sum = 0.0;
        self.steps = 0;
        Some(mean)
    }
}

/// Wall-clock throughput of a training phase.
#[derive(Debug)]
pub struct TrainingMetrics {
    step_timer: Instant,
    start_time: Instant,
    examples_processed: u64,
}

impl Default for TrainingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingMetrics {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            step_timer: now,
            start_time: now,
            examples_processed: 0,
        }
    }

    pub fn record_step(&mut self, examples: u64, loss: f64) -> StepSnapshot {
        let now = Instant::now();
        let step_duration = now.duration_since(self.step_timer);
        self.step_timer = now;
        self.examples_processed = self.examples_processed.saturating_add(examples);

        let examples_per_sec = if step_duration > Duration::ZERO {
            examples as f64 / step_duration.as_secs_f64()
        } else {
            0.0
        };

        StepSnapshot {
            loss,
            examples,
            examples_per_sec,
            total_examples: self.examples_processed,
            wall_time: now.duration_since(self.start_time),
            step_duration,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepSnapshot {
    pub loss: f64,
    pub examples: u64,
    pub examples_per_sec: f64,
    pub total_examples: u64,
    pub wall_time: Duration,
    pub step_duration: Duration,
}

/// Accumulates per-sentence outcomes of an adaptive evaluation pass.
#[derive(Debug, Default)]
pub struct EvaluationMetrics {
    correct: u64,
    examples: u64,
    executed_layers: u64,
}

impl EvaluationMetrics {
    pub fn update(&mut self, correct: bool, executed_layers: usize) {
        self.examples += 1;
        self.executed_layers += executed_layers as u64;
        if correct {
            self.correct += 1;
        }
    }

    pub fn finalize(self) -> Result<EvaluationSummary, TrainingError> {
        if self.examples == 0 {
            return Err(TrainingError::EmptyEvaluationSet);
        }
        let examples = self.examples as f64;
        Ok(EvaluationSummary {
            accuracy: self.correct as f64 / examples,
            average_exec_layers: self.executed_layers as f64 / examples,
            correct: self.correct,
            examples: self.examples,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationSummary {
    pub accuracy: f64,
    pub average_exec_layers: f64,
    pub correct: u64,
    pub examples: u64,
}
