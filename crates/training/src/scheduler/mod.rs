use crate::config::ScheduleKind;
use crate::data::batches_per_epoch;
use crate::TrainingError;

pub trait LRScheduler: Send {
    /// Returns the rate for the current step and advances by one.
    fn step(&mut self) -> f64;
    fn learning_rate(&self) -> f64;
}

/// Schedule length for `epochs` passes over `examples` in batches of
/// `batch_size`: `floor(examples * epochs / batch_size) + 1`, widened so
/// that sets smaller than one batch still cover every optimizer step.
pub fn training_steps(examples: usize, epochs: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        return 1;
    }
    let nominal = examples.saturating_mul(epochs) / batch_size;
    let taken = batches_per_epoch(examples, batch_size).saturating_mul(epochs);
    nominal.max(taken) + 1
}

pub fn build_scheduler(
    kind: ScheduleKind,
    base_lr: f64,
    total_steps: usize,
    warmup_fraction: f64,
) -> Result<Box<dyn LRScheduler>, TrainingError> {
    match kind {
        ScheduleKind::WarmupLinear => Ok(Box::new(WarmupLinear::new(
            base_lr,
            total_steps,
            warmup_fraction,
        )?)),
        ScheduleKind::ConstantWithWarmup => Ok(Box::new(ConstantWithWarmup::new(
            base_lr,
            total_steps,
            warmup_fraction,
        )?)),
    }
}

/// Linear warmup from zero, then linear decay reaching zero at
/// `total_steps`.
#[derive(Debug, Clone)]
pub struct WarmupLinear {
    base_lr: f64,
    total_steps: usize,
    warmup_steps: usize,
    step: usize,
    current_lr: f64,
}

impl WarmupLinear {
    pub fn new(
        base_lr: f64,
        total_steps: usize,
        warmup_fraction: f64,
    ) -> Result<Self, TrainingError> {
        validate(base_lr, total_steps)?;
        Ok(Self {
            base_lr,
            total_steps,
            warmup_steps: compute_warmup_steps(total_steps, warmup_fraction),
            step: 0,
            current_lr: 0.0,
        })
    }

    pub fn warmup_steps(&self) -> usize {
        self.warmup_steps
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    fn multiplier(&self, step: usize) -> f64 {
        if self.warmup_steps > 0 && step < self.warmup_steps {
            return step as f64 / self.warmup_steps as f64;
        }
        let remaining = self.total_steps.saturating_sub(step) as f64;
        let span = self.total_steps.saturating_sub(self.warmup_steps).max(1) as f64;
        (remaining / span).max(0.0)
    }
}

impl LRScheduler for WarmupLinear {
    fn step(&mut self) -> f64 {
        let lr = self.base_lr * self.multiplier(self.step);
        self.current_lr = lr;
        self.step = self.step.saturating_add(1);
        lr
    }

    fn learning_rate(&self) -> f64 {
        self.current_lr
    }
}

#[derive(Debug, Clone)]
pub struct ConstantWithWarmup {
    base_lr: f64,
    warmup_steps: usize,
    step: usize,
    current_lr: f64,
}

impl ConstantWithWarmup {
    pub fn new(
        base_lr: f64,
        total_steps: usize,
        warmup_fraction: f64,
    ) -> Result<Self, TrainingError> {
        validate(base_lr, total_steps)?;
        Ok(Self {
            base_lr,
            warmup_steps: compute_warmup_steps(total_steps, warmup_fraction),
            step: 0,
            current_lr: 0.0,
        })
    }

    fn compute_lr(&self, step: usize) -> f64 {
        if self.warmup_steps > 0 && step < self.warmup_steps {
            self.base_lr * step as f64 / self.warmup_steps as f64
        } else {
            self.base_lr
        }
    }
}

impl LRScheduler for ConstantWithWarmup {
    fn step(&mut self) -> f64 {
        let lr = self.compute_lr(self.step);
        self.current_lr = lr;
        self.step = self.step.saturating_add(1);
        lr
    }

    fn learning_rate(&self) -> f64 {
        self.current_lr
    }
}

fn validate(base_lr: f64, total_steps: usize) -> Result<(), TrainingError> {
    if base_lr.is_nan() || base_lr <= 0.0 {
        return Err(TrainingError::initialization(
            "scheduler requires base learning rate > 0",
        ));
    }
    if total_steps == 0 {
        return Err(TrainingError::initialization(
            "scheduler requires total_steps greater than zero",
        ));
    }
    Ok(())
}

fn compute_warmup_steps(total_steps: usize, fraction: f64) -> usize {
    let clamped = fraction.clamp(0.0, 1.0);
    ((clamped * total_steps as f64).floor() as usize).min(total_steps)
}
