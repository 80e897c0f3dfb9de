use candle_core::{backprop::GradStore, DType, Tensor, Var};

use crate::loss::to_runtime_error;
use crate::TrainingError;

const EPS: f64 = 1e-12;

/// Substrings marking parameters exempt from weight decay.
pub const NO_DECAY_PATTERNS: &[&str] = &["bias", "LayerNorm", "gamma", "beta"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamWConfig {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub weight_decay: f64,
    /// Divide the moments by `1 - beta^t`. BERT fine-tuning disables this.
    pub correct_bias: bool,
}

impl AdamWConfig {
    /// BERT fine-tuning defaults: betas (0.9, 0.999), epsilon 1e-6, no bias
    /// correction.
    pub fn bert(learning_rate: f64, weight_decay: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-6,
            weight_decay,
            correct_bias: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainerOptimizerOptions {
    pub weight_decay_exclude: Vec<String>,
}

impl Default for TrainerOptimizerOptions {
    fn default() -> Self {
        Self {
            weight_decay_exclude: NO_DECAY_PATTERNS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// AdamW over a fixed set of named parameters.
///
/// Parameters without a gradient in a step are left untouched, moments
/// included.
#[derive(Debug)]
pub struct TrainerOptimizer {
    config: AdamWConfig,
    params: Vec<ParameterSlot>,
    step: usize,
}

#[derive(Debug)]
struct ParameterSlot {
    name: String,
    param: Var,
    dtype: DType,
    first_moment: Tensor,
    second_moment: Tensor,
    apply_weight_decay: bool,
}

impl TrainerOptimizer {
    pub fn new(
        named_parameters: Vec<(String, Var)>,
        config: AdamWConfig,
        options: TrainerOptimizerOptions,
    ) -> Result<Self, TrainingError> {
        if named_parameters.is_empty() {
            return Err(TrainingError::initialization(
                "optimizer requires at least one parameter",
            ));
        }

        let mut params = Vec::with_capacity(named_parameters.len());
        for (name, var) in named_parameters {
            let tensor = var.as_tensor();
            if !tensor.dtype().is_float() {
                return Err(TrainingError::initialization(format!(
                    "optimizer received non-floating parameter '{}'",
                    name
                )));
            }
            let device = tensor.device();
            let shape = tensor.dims().to_vec();
            let dtype = tensor.dtype();

            let first_moment =
                Tensor::zeros(shape.as_slice(), DType::F32, device).map_err(to_runtime_error)?;
            let second_moment =
                Tensor::zeros(shape.as_slice(), DType::F32, device).map_err(to_runtime_error)?;

            let apply_weight_decay =
                should_apply_weight_decay(&name, &options.weight_decay_exclude);

            params.push(ParameterSlot {
                name,
                param: var,
                dtype,
                first_moment,
                second_moment,
                apply_weight_decay,
            });
        }

        let decayed = params.iter().filter(|slot| slot.apply_weight_decay).count();
        log::debug!(
            "optimizer tracks {} tensors ({} with weight decay {})",
            params.len(),
            decayed,
            config.weight_decay
        );

        Ok(Self {
            config,
            params,
            step: 0,
        })
    }

    pub fn learning_rate(&self) -> f64 {
        self.config.learning_rate
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.config.learning_rate = lr;
    }

    pub fn steps(&self) -> usize {
        self.step
    }

    /// Names of the parameters that receive weight decay.
    pub fn decayed_parameters(&self) -> impl Iterator<Item = &str> {
        self.params
            .iter()
            .filter(|slot| slot.apply_weight_decay)
            .map(|slot| slot.name.as_str())
    }

    pub fn step(&mut self, grads: &mut GradStore) -> Result<(), TrainingError> {
        let mut processed = Vec::new();
        for (idx, slot) in self.params.iter().enumerate() {
            let Some(grad) = grads.remove(slot.param.as_tensor()) else {
                continue;
            };
            processed.push((idx, grad.to_dtype(DType::F32).map_err(to_runtime_error)?));
        }

        if processed.is_empty() {
            return Ok(());
        }

        self.step += 1;
        let cfg = self.config;
        let (scale_m, scale_v) = if cfg.correct_bias {
            (
                bias_correction_scale(cfg.beta1, self.step),
                bias_correction_scale(cfg.beta2, self.step),
            )
        } else {
            (1.0, 1.0)
        };

        for (index, grad) in processed {
            let slot = &mut self.params[index];

            let prev_m = slot
                .first_moment
                .affine(cfg.beta1, 0.0)
                .map_err(to_runtime_error)?;
            let grad_term = grad.affine(1.0 - cfg.beta1, 0.0).map_err(to_runtime_error)?;
            let new_m = prev_m.add(&grad_term).map_err(to_runtime_error)?;

            let prev_v = slot
                .second_moment
                .affine(cfg.beta2, 0.0)
                .map_err(to_runtime_error)?;
            let grad_sq_term = grad
                .sqr()
                .map_err(to_runtime_error)?
                .affine(1.0 - cfg.beta2, 0.0)
                .map_err(to_runtime_error)?;
            let new_v = prev_v.add(&grad_sq_term).map_err(to_runtime_error)?;

            let m_hat = new_m.affine(scale_m, 0.0).map_err(to_runtime_error)?;
            let denom = new_v
                .affine(scale_v, 0.0)
                .map_err(to_runtime_error)?
                .sqrt()
                .map_err(to_runtime_error)?
                .affine(1.0, cfg.epsilon)
                .map_err(to_runtime_error)?;
            let update = m_hat
                .div(&denom)
                .map_err(to_runtime_error)?
                .affine(cfg.learning_rate, 0.0)
                .map_err(to_runtime_error)?;

            let base = slot
                .param
                .as_tensor()
                .to_dtype(DType::F32)
                .map_err(to_runtime_error)?;
            let decayed = if slot.apply_weight_decay && cfg.weight_decay != 0.0 {
                base.affine(1.0 - cfg.learning_rate * cfg.weight_decay, 0.0)
                    .map_err(to_runtime_error)?
            } else {
                base
            };

            let next = decayed.sub(&update).map_err(to_runtime_error)?;
            let cast = if slot.dtype == DType::F32 {
                next
            } else {
                next.to_dtype(slot.dtype).map_err(to_runtime_error)?
            };
            slot.param.set(&cast).map_err(to_runtime_error)?;

            slot.first_moment = new_m;
            slot.second_moment = new_v;
        }

        Ok(())
    }
}

fn bias_correction_scale(beta: f64, step: usize) -> f64 {
    let correction = 1.0 - beta.powi(step as i32);
    if correction.abs() < EPS {
        1.0
    } else {
        1.0 / correction
    }
}

fn should_apply_weight_decay(name: &str, exclusions: &[String]) -> bool {
    !exclusions
        .iter()
        .any(|pattern| !pattern.is_empty() && name.contains(pattern.as_str()))
}
