//! BERT encoder driven layer by layer.

use candle_core::Tensor;
use candle_nn::VarBuilder;
use embedding::{BertEmbeddings, BertEmbeddingsConfig};
use layers::checks;

use crate::backbone::{track, Backbone};
use crate::block::EncoderLayer;
use crate::config::BackboneConfig;
use crate::error::{ModelError, Result};

#[derive(Debug)]
pub struct BertEncoder {
    config: BackboneConfig,
    embeddings: BertEmbeddings,
    layers: Vec<EncoderLayer>,
}

impl BertEncoder {
    /// Registers `embeddings.*` and `encoder.layer.{i}.*` under `vb`.
    pub fn new(config: &BackboneConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let embeddings = BertEmbeddings::new(
            &BertEmbeddingsConfig {
                vocab_size: config.vocab_size,
                hidden_size: config.hidden_size,
                max_position_embeddings: config.max_position_embeddings,
                type_vocab_size: config.type_vocab_size,
                layer_norm_eps: config.layer_norm_eps,
                dropout_p: config.hidden_dropout,
            },
            vb.pp("embeddings"),
        )?;

        let layer_vb = vb.pp("encoder").pp("layer");
        let layers = (0..config.num_layers)
            .map(|index| EncoderLayer::new(index, config, layer_vb.pp(index)))
            .collect::<Result<Vec<_>>>()?;

        log::debug!(
            "built encoder layers={} hidden={} heads={}",
            config.num_layers,
            config.hidden_size,
            config.num_heads
        );
        Ok(Self {
            config: config.clone(),
            embeddings,
            layers,
        })
    }

    pub fn config(&self) -> &BackboneConfig {
        &self.config
    }
}

impl Backbone for BertEncoder {
    fn num_layers(&self) -> usize {
        self.layers.len()
    }

    fn hidden_size(&self) -> usize {
        self.config.hidden_size
    }

    fn embed(&self, ids: &Tensor, mask: &Tensor, trainable: bool) -> Result<Tensor> {
        let (batch, seq) = checks::expect_batch_seq("encoder.ids", ids)?;
        if checks::expect_batch_seq("encoder.mask", mask)? != (batch, seq) {
            return Err(ModelError::Config(format!(
                "mask shape {:?} does not match ids shape {:?}",
                mask.dims(),
                ids.dims()
            )));
        }
        let hidden = self.embeddings.forward(ids, None, trainable)?;
        Ok(track(hidden, trainable))
    }

    fn apply_layer(
        &self,
        index: usize,
        hidden: &Tensor,
        attention_bias: &Tensor,
        trainable: bool,
    ) -> Result<Tensor> {
        let layer = self.layers.get(index).ok_or_else(|| {
            ModelError::Config(format!(
                "layer {index} out of range for {} layers",
                self.layers.len()
            ))
        })?;
        let hidden = layer.forward(hidden, attention_bias, trainable)?;
        Ok(track(hidden, trainable))
    }
}
