//! Adaptive-depth BERT classification.
//!
//! A [`FastBertModel`] attaches one lightweight classifier head after every
//! encoder layer. At inference the [`AdaptiveController`] stops at the first
//! head whose normalized-entropy uncertainty falls below the requested speed;
//! the head after the last layer (the teacher) always answers.

pub mod backbone;
mod block;
pub mod cascade;
pub mod config;
pub mod controller;
pub mod encoder;
pub mod error;
pub mod fastbert;
pub mod head;
pub mod labels;
pub mod registry;
pub mod uncertainty;
pub mod weights;

pub use backbone::Backbone;
pub use cascade::{Cascade, HeadRole};
pub use config::{parse_device, BackboneConfig, ModelOptions};
pub use controller::{argmax, AdaptiveController, ExecutionTrace};
pub use encoder::BertEncoder;
pub use error::{ModelError, Result};
pub use fastbert::{FastBertModel, TextEncoder, CLASSIFIERS_PREFIX};
pub use head::{Classifier, ClassifierHead, HeadConfig, Pooling};
pub use labels::LabelSpace;
pub use registry::{known_backbones, resolve as resolve_backbone, PretrainedBackbone};
pub use uncertainty::{batch_uncertainty, uncertainty};
pub use weights::{
    hub_content_digest, load_pretrained, remap_pretrained_name, sha256_file, verify_sha256,
    HubProvisioner, LoadReport, LocalProvisioner, ProvisionedFiles, WeightProvisioner,
};
