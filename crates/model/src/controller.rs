//! Uncertainty-gated early exit.
//!
//! The controller runs the backbone one layer at a time. After layer `i` the
//! matching head scores the hidden state; if the head's uncertainty is below
//! `speed` the pass stops with `exec_layer_num = i + 1`. Otherwise the pass
//! continues, and after the last layer the teacher's prediction is used.

use attention::additive_padding_mask;
use candle_core::{Tensor, D};
use candle_nn::ops::softmax;

use crate::backbone::Backbone;
use crate::cascade::Cascade;
use crate::error::{ModelError, Result};
use crate::head::Classifier;
use crate::uncertainty::uncertainty;

/// Outcome of one adaptive pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionTrace {
    pub label_id: u32,
    /// Layers actually executed, `1..=L`.
    pub exec_layer_num: usize,
    /// Uncertainty observed after each executed layer.
    pub uncertainties: Vec<f32>,
    /// Distribution of the head that produced the prediction.
    pub probabilities: Vec<f32>,
}

pub struct AdaptiveController<'a, B: ?Sized, C> {
    backbone: &'a B,
    cascade: &'a Cascade<C>,
}

impl<'a, B, C> AdaptiveController<'a, B, C>
where
    B: Backbone + ?Sized,
    C: Classifier,
{
    pub fn new(backbone: &'a B, cascade: &'a Cascade<C>) -> Result<Self> {
        if backbone.num_layers() != cascade.len() {
            return Err(ModelError::Config(format!(
                "cascade has {} heads but the backbone has {} layers",
                cascade.len(),
                backbone.num_layers()
            )));
        }
        Ok(Self { backbone, cascade })
    }

    /// Classifies a single `(1, seq)` sequence, exiting at the first layer
    /// whose uncertainty is strictly below `speed`.
    pub fn run(&self, ids: &Tensor, mask: &Tensor, speed: f32) -> Result<ExecutionTrace> {
        if !(0.0..=1.0).contains(&speed) {
            return Err(ModelError::InvalidSpeed(speed));
        }
        let (batch, _) = ids.dims2()?;
        if batch != 1 {
            return Err(ModelError::Config(format!(
                "adaptive inference runs one sequence at a time, got batch {batch}"
            )));
        }

        let bias = additive_padding_mask(mask)?;
        let mut hidden = self.backbone.embed(ids, mask, false)?;
        let mut uncertainties = Vec::with_capacity(self.cascade.len());

        for index in 0..self.cascade.len() {
            hidden = self.backbone.apply_layer(index, &hidden, &bias, false)?;
            let logits = self.cascade.head(index)?.infer(&hidden, &bias, false)?;
            let probabilities = softmax(&logits, D::Minus1)?.squeeze(0)?.to_vec1::<f32>()?;
            let score = uncertainty(&probabilities, probabilities.len());
            uncertainties.push(score);

            let last = index + 1 == self.cascade.len();
            if score < speed || last {
                log::trace!("exit after layer {} with uncertainty {score:.4}", index + 1);
                return Ok(ExecutionTrace {
                    label_id: argmax(&probabilities) as u32,
                    exec_layer_num: index + 1,
                    uncertainties,
                    probabilities,
                });
            }
        }

        Err(ModelError::Config("cascade produced no prediction".into()))
    }

    /// Runs every layer and returns each layer's hidden state together with
    /// the attention bias used.
    pub fn full_depth_hidden_states(
        &self,
        ids: &Tensor,
        mask: &Tensor,
        trainable: bool,
    ) -> Result<(Vec<Tensor>, Tensor)> {
        let bias = additive_padding_mask(mask)?;
        let mut hidden = self.backbone.embed(ids, mask, trainable)?;
        let mut states = Vec::with_capacity(self.cascade.len());
        for index in 0..self.cascade.len() {
            hidden = self.backbone.apply_layer(index, &hidden, &bias, trainable)?;
            states.push(hidden.clone());
        }
        Ok((states, bias))
    }
}

/// Index of the first maximum.
pub fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, best_value), (index, &value)| {
            if value > best_value {
                (index, value)
            } else {
                (best, best_value)
            }
        })
        .0
}
