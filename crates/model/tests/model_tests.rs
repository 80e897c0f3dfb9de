use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use model::{
    resolve_backbone, sha256_file, AdaptiveController, Backbone, BackboneConfig, Cascade,
    Classifier, FastBertModel, HubProvisioner, LabelSpace, LocalProvisioner, ModelError,
    ModelOptions,
};
use tokenizer::{Config, WordPieceTokenizer};

const VOCAB: &[&str] = &[
    "[PAD]", "[UNK]", "[CLS]", "[SEP]", "the", "movie", "was", "great", "terrible", "boring",
    "fun", "plot", "!",
];

fn write_vocab(dir: &Path) -> Result<std::path::PathBuf> {
    let path = dir.join("vocab.txt");
    let mut file = std::fs::File::create(&path)?;
    for token in VOCAB {
        writeln!(file, "{token}")?;
    }
    Ok(path)
}

fn tiny_config(num_layers: usize) -> BackboneConfig {
    BackboneConfig {
        vocab_size: 16,
        hidden_size: 8,
        num_layers,
        num_heads: 2,
        intermediate_size: 16,
        max_position_embeddings: 16,
        type_vocab_size: 2,
        layer_norm_eps: 1e-12,
        hidden_dropout: 0.1,
        attention_dropout: 0.1,
        hidden_act: "gelu".to_string(),
    }
}

fn options(seq_length: usize) -> ModelOptions {
    ModelOptions {
        seq_length,
        ..ModelOptions::default()
    }
}

fn tiny_model(dir: &Path, num_layers: usize, seq_length: usize) -> Result<FastBertModel> {
    let vocab = write_vocab(dir)?;
    let tokenizer = WordPieceTokenizer::from_config(&Config::new(vocab, true))?;
    Ok(FastBertModel::from_parts(
        tiny_config(num_layers),
        Arc::new(tokenizer),
        LabelSpace::new(["pos", "neg"])?,
        options(seq_length),
    )?)
}

fn first_values(model: &FastBertModel, name: &str) -> Result<Vec<f32>> {
    let params = model.named_parameters()?;
    let (_, var) = params
        .iter()
        .find(|(n, _)| n == name)
        .ok_or_else(|| anyhow::anyhow!("missing parameter {name}"))?;
    Ok(var.as_tensor().flatten_all()?.to_vec1::<f32>()?)
}

/// Backbone that passes a constant hidden state through every layer.
struct Passthrough {
    layers: usize,
}

impl Backbone for Passthrough {
    fn num_layers(&self) -> usize {
        self.layers
    }

    fn hidden_size(&self) -> usize {
        2
    }

    fn embed(&self, ids: &Tensor, _mask: &Tensor, _trainable: bool) -> model::Result<Tensor> {
        let (batch, seq) = ids.dims2()?;
        Ok(Tensor::zeros((batch, seq, 2), DType::F32, ids.device())?)
    }

    fn apply_layer(
        &self,
        _index: usize,
        hidden: &Tensor,
        _attention_bias: &Tensor,
        _trainable: bool,
    ) -> model::Result<Tensor> {
        Ok(hidden.clone())
    }
}

/// Head returning the same logits for every input.
struct FixedLogits(Vec<f32>);

impl Classifier for FixedLogits {
    fn infer(&self, hidden: &Tensor, _: &Tensor, _: bool) -> model::Result<Tensor> {
        Ok(Tensor::new(self.0.as_slice(), hidden.device())?.unsqueeze(0)?)
    }
}

fn single_sequence() -> Result<(Tensor, Tensor)> {
    let device = Device::Cpu;
    Ok((
        Tensor::new(&[[2u32, 5, 0, 0]], &device)?,
        Tensor::new(&[[1u32, 1, 0, 0]], &device)?,
    ))
}

#[test]
fn confident_first_head_exits_after_one_layer() -> Result<()> {
    let backbone = Passthrough { layers: 3 };
    let cascade = Cascade::new(vec![
        FixedLogits(vec![10.0, -10.0]),
        FixedLogits(vec![10.0, -10.0]),
        FixedLogits(vec![10.0, -10.0]),
    ])?;
    let (ids, mask) = single_sequence()?;

    let trace = AdaptiveController::new(&backbone, &cascade)?.run(&ids, &mask, 0.5)?;
    assert_eq!(trace.exec_layer_num, 1);
    assert_eq!(trace.label_id, 0);
    assert_eq!(trace.uncertainties.len(), 1);
    assert!(trace.uncertainties[0] < 0.01);
    Ok(())
}

#[test]
fn uncertain_students_fall_through_to_teacher() -> Result<()> {
    let backbone = Passthrough { layers: 3 };
    let cascade = Cascade::new(vec![
        FixedLogits(vec![0.0, 0.0]),
        FixedLogits(vec![0.0, 0.0]),
        FixedLogits(vec![-3.0, 3.0]),
    ])?;
    let (ids, mask) = single_sequence()?;

    let trace = AdaptiveController::new(&backbone, &cascade)?.run(&ids, &mask, 0.5)?;
    assert_eq!(trace.exec_layer_num, 3);
    assert_eq!(trace.label_id, 1);
    assert_eq!(trace.uncertainties.len(), 3);
    assert!((trace.uncertainties[0] - 1.0).abs() < 1e-5);
    Ok(())
}

#[test]
fn controller_rejects_mismatched_cascade() -> Result<()> {
    let backbone = Passthrough { layers: 3 };
    let cascade = Cascade::new(vec![FixedLogits(vec![0.0, 1.0])])?;
    assert!(AdaptiveController::new(&backbone, &cascade).is_err());
    Ok(())
}

#[test]
fn speed_zero_runs_every_layer_and_agrees_with_teacher() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let model = tiny_model(dir.path(), 3, 8)?;
    let sentence = "the movie was great !";

    let (label, layers) = model.predict(sentence, 0.0)?;
    assert_eq!(layers, 3);

    let (ids, mask) = model.encode_batch(&[sentence])?;
    let logits = model.teacher_logits(&ids, &mask, false)?;
    let teacher = model::argmax(&logits.squeeze(0)?.to_vec1::<f32>()?);
    assert_eq!(label, model.labels().name(teacher as u32)?);
    Ok(())
}

#[test]
fn executed_depth_never_grows_with_speed() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let model = tiny_model(dir.path(), 4, 8)?;

    for sentence in ["the plot was boring", "fun movie !", "terrible"] {
        let mut previous = usize::MAX;
        for speed in [0.0, 0.2, 0.4, 0.6, 0.8, 1.0] {
            let (_, layers) = model.predict(sentence, speed)?;
            assert!((1..=4).contains(&layers));
            assert!(layers <= previous, "{sentence}: depth grew at speed {speed}");
            previous = layers;
        }
    }
    Ok(())
}

#[test]
fn prediction_rejects_out_of_range_speed() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let model = tiny_model(dir.path(), 2, 8)?;
    for speed in [-0.1, 1.5, f32::NAN] {
        assert!(matches!(
            model.predict("the movie", speed),
            Err(ModelError::InvalidSpeed(_))
        ));
    }
    Ok(())
}

#[test]
fn encode_batch_pads_short_sentences() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let model = tiny_model(dir.path(), 2, 4)?;

    let (ids, mask) = model.encode_batch(&["movie", "the movie was great fun"])?;
    assert_eq!(ids.dims(), &[2, 4]);
    assert_eq!(ids.to_vec2::<u32>()?, vec![vec![2, 5, 0, 0], vec![2, 4, 5, 6]]);
    assert_eq!(mask.to_vec2::<u32>()?, vec![vec![1, 1, 0, 0], vec![1, 1, 1, 1]]);
    Ok(())
}

#[test]
fn parameters_split_between_phases() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let model = tiny_model(dir.path(), 3, 8)?;

    let all = model.named_parameters()?;
    let finetuning = model.finetuning_parameters()?;
    let distillation = model.distillation_parameters()?;

    assert!(finetuning
        .iter()
        .all(|(name, _)| name.starts_with("backbone.") || name.starts_with("classifiers.2.")));
    assert!(finetuning.iter().any(|(name, _)| name.starts_with("classifiers.2.")));
    assert!(distillation
        .iter()
        .all(|(name, _)| name.starts_with("classifiers.0.") || name.starts_with("classifiers.1.")));
    assert_eq!(finetuning.len() + distillation.len(), all.len());

    let names: Vec<&str> = all.iter().map(|(name, _)| name.as_str()).collect();
    let mut sorted = names.clone();
    sorted.sort_unstable();
    assert_eq!(names, sorted);
    assert!(names.contains(&"backbone.encoder.layer.2.attention.self.query.weight"));
    assert!(names.contains(&"classifiers.0.self_attention.query.weight"));
    Ok(())
}

#[test]
fn save_and_load_restore_predictions() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let trained = tiny_model(dir.path(), 2, 8)?;
    let fresh = tiny_model(dir.path(), 2, 8)?;
    let checkpoint = dir.path().join("ckpt").join("model.safetensors");

    trained.save(&checkpoint)?;
    fresh.load(&checkpoint)?;

    let sentence = "the plot was fun";
    let expected = trained.infer(sentence, 0.0)?;
    let restored = fresh.infer(sentence, 0.0)?;
    assert_eq!(expected.label_id, restored.label_id);
    for (a, b) in expected.probabilities.iter().zip(&restored.probabilities) {
        assert!((a - b).abs() < 1e-6);
    }
    Ok(())
}

#[test]
fn loading_a_partial_checkpoint_fails() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let model = tiny_model(dir.path(), 2, 8)?;
    let path = dir.path().join("partial.safetensors");
    let tensors = HashMap::from([(
        "backbone.embeddings.word_embeddings.weight".to_string(),
        Tensor::zeros((16, 8), DType::F32, &Device::Cpu)?,
    )]);
    candle_core::safetensors::save(&tensors, &path)?;

    assert!(matches!(model.load(&path), Err(ModelError::Snapshot(_))));
    assert!(model.load(&dir.path().join("absent.safetensors")).is_err());
    Ok(())
}

#[test]
fn to_device_keeps_parameters() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut model = tiny_model(dir.path(), 2, 8)?;
    let before = first_values(&model, "classifiers.1.output_projection.weight")?;

    model.to_device("cpu")?;
    assert_eq!(first_values(&model, "classifiers.1.output_projection.weight")?, before);
    assert!(model.to_device("tpu").is_err());
    Ok(())
}

#[test]
fn sequence_longer_than_positions_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    assert!(tiny_model(dir.path(), 2, 32).is_err());
    Ok(())
}

#[test]
fn unknown_backbone_fails_before_provisioning() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let provisioner = LocalProvisioner::new(dir.path());

    let err = FastBertModel::from_pretrained("bert_tiny_klingon", vec!["a"], ModelOptions::default(), &provisioner)
        .err()
        .ok_or_else(|| anyhow::anyhow!("expected failure"))?;
    assert!(matches!(err, ModelError::UnknownBackbone { .. }));

    let err = FastBertModel::from_pretrained(
        "google_bert_base_en",
        Vec::<String>::new(),
        ModelOptions::default(),
        &provisioner,
    )
    .err()
    .ok_or_else(|| anyhow::anyhow!("expected failure"))?;
    assert!(matches!(err, ModelError::InvalidLabels(_)));
    Ok(())
}

fn write_pretrained(dir: &Path) -> Result<()> {
    write_vocab(dir)?;
    std::fs::write(
        dir.join("config.json"),
        r#"{
            "vocab_size": 16,
            "hidden_size": 8,
            "num_hidden_layers": 2,
            "num_attention_heads": 2,
            "intermediate_size": 16,
            "max_position_embeddings": 16,
            "hidden_act": "gelu",
            "hidden_dropout_prob": 0.1,
            "attention_probs_dropout_prob": 0.1
        }"#,
    )?;
    let device = Device::Cpu;
    let tensors = HashMap::from([
        (
            "bert.embeddings.word_embeddings.weight".to_string(),
            Tensor::ones((16, 8), DType::F32, &device)?,
        ),
        (
            "bert.embeddings.LayerNorm.gamma".to_string(),
            Tensor::full(2f32, 8, &device)?,
        ),
        (
            "bert.pooler.dense.weight".to_string(),
            Tensor::zeros((8, 8), DType::F32, &device)?,
        ),
        (
            "cls.predictions.bias".to_string(),
            Tensor::zeros(16, DType::F32, &device)?,
        ),
    ]);
    candle_core::safetensors::save(&tensors, dir.join("model.safetensors"))?;
    Ok(())
}

#[test]
fn pretrained_weights_are_remapped_into_the_backbone() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_pretrained(dir.path())?;
    let digest = sha256_file(&dir.path().join("model.safetensors"))?;
    let provisioner = LocalProvisioner::new(dir.path()).with_expected_sha256(digest);

    let model = FastBertModel::from_pretrained(
        "google_bert_base_en",
        vec!["pos", "neg"],
        options(8),
        &provisioner,
    )?;
    assert_eq!(model.backbone_name(), "google_bert_base_en");
    assert_eq!(model.num_layers(), 2);
    assert!(first_values(&model, "backbone.embeddings.word_embeddings.weight")?
        .iter()
        .all(|&v| v == 1.0));
    assert!(first_values(&model, "backbone.embeddings.LayerNorm.weight")?
        .iter()
        .all(|&v| v == 2.0));

    let (label, layers) = model.predict("the movie was fun", 0.0)?;
    assert!(label == "pos" || label == "neg");
    assert_eq!(layers, 2);
    Ok(())
}

#[test]
fn pinned_digest_mismatch_is_an_integrity_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_pretrained(dir.path())?;
    let provisioner = LocalProvisioner::new(dir.path()).with_expected_sha256("0".repeat(64));

    let err = FastBertModel::from_pretrained("google_bert_base_en", vec!["pos"], options(8), &provisioner)
        .err()
        .ok_or_else(|| anyhow::anyhow!("expected failure"))?;
    assert!(matches!(err, ModelError::Integrity { .. }));
    Ok(())
}

#[test]
fn local_weights_without_a_digest_are_refused() -> Result<()> {
    let dir = tempfile::tempdir()?;
    write_pretrained(dir.path())?;
    let provisioner = LocalProvisioner::new(dir.path());

    let err = FastBertModel::from_pretrained("google_bert_base_en", vec!["pos"], options(8), &provisioner)
        .err()
        .ok_or_else(|| anyhow::anyhow!("expected failure"))?;
    assert!(matches!(err, ModelError::UnpinnedWeights { .. }));
    Ok(())
}

/// Lays out `dir` the way hf-hub caches a download: content-addressed
/// blobs, a snapshot of links to them, and a ref naming the snapshot.
#[cfg(unix)]
fn write_hub_cache(cache: &Path, staging: &Path) -> Result<std::path::PathBuf> {
    let backbone = resolve_backbone("google_bert_base_en")?;
    let repo = cache.join(format!("models--{}", backbone.repo.replace('/', "--")));
    let commit = "0123456789abcdef0123456789abcdef01234567";
    let snapshot = repo.join("snapshots").join(commit);
    std::fs::create_dir_all(repo.join("blobs"))?;
    std::fs::create_dir_all(repo.join("refs"))?;
    std::fs::create_dir_all(&snapshot)?;
    std::fs::write(repo.join("refs").join(backbone.revision), commit)?;

    let mut weights_blob = None;
    for file in ["config.json", "vocab.txt", "model.safetensors"] {
        let source = staging.join(file);
        let blob = repo.join("blobs").join(sha256_file(&source)?);
        std::fs::copy(&source, &blob)?;
        std::os::unix::fs::symlink(&blob, snapshot.join(file))?;
        weights_blob = Some(blob);
    }
    weights_blob.ok_or_else(|| anyhow::anyhow!("no weights blob"))
}

#[cfg(unix)]
#[test]
fn hub_weights_are_verified_against_their_published_digest() -> Result<()> {
    let staging = tempfile::tempdir()?;
    write_pretrained(staging.path())?;
    let cache = tempfile::tempdir()?;
    let weights_blob = write_hub_cache(cache.path(), staging.path())?;
    let provisioner = HubProvisioner::new().with_cache_dir(cache.path());

    let model = FastBertModel::from_pretrained(
        "google_bert_base_en",
        vec!["pos", "neg"],
        options(8),
        &provisioner,
    )?;
    assert!(first_values(&model, "backbone.embeddings.LayerNorm.weight")?
        .iter()
        .all(|&v| v == 2.0));

    let mut bytes = std::fs::read(&weights_blob)?;
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    std::fs::write(&weights_blob, bytes)?;

    let err = FastBertModel::from_pretrained("google_bert_base_en", vec!["pos"], options(8), &provisioner)
        .err()
        .ok_or_else(|| anyhow::anyhow!("expected failure"))?;
    assert!(matches!(err, ModelError::Integrity { .. }));
    Ok(())
}
