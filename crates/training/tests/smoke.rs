use std::{collections::BTreeMap, fs, io::Write, path::Path, sync::Arc};

use anyhow::Result;
use model::{BackboneConfig, FastBertModel, LabelSpace, ModelError, ModelOptions};
use tempfile::tempdir;
use tokenizer::{Config, WordPieceTokenizer};
use training::{
    evaluate, load_checkpoint, read_manifest, Dataset, FitOptions, Trainer, TrainingError,
    TrainingPhase,
};

const VOCAB: &[&str] = &[
    "[PAD]", "[UNK]", "[CLS]", "[SEP]", "the", "movie", "was", "great", "terrible", "boring",
    "fun", "plot", "!",
];

fn tiny_model(dir: &Path, num_layers: usize) -> Result<FastBertModel> {
    let vocab = dir.join("vocab.txt");
    let mut file = fs::File::create(&vocab)?;
    for token in VOCAB {
        writeln!(file, "{token}")?;
    }
    let tokenizer = WordPieceTokenizer::from_config(&Config::new(vocab, true))?;
    let config = BackboneConfig {
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
    };
    let options = ModelOptions {
        seq_length: 8,
        dropout: Some(0.0),
        ..ModelOptions::default()
    };
    Ok(FastBertModel::from_parts(
        config,
        Arc::new(tokenizer),
        LabelSpace::new(["pos", "neg"])?,
        options,
    )?)
}

fn reviews() -> Result<Dataset> {
    let rows = [
        ("pos", "the movie was great !"),
        ("neg", "the movie was terrible"),
        ("pos", "great fun"),
        ("neg", "boring plot"),
        ("pos", "the plot was fun !"),
        ("neg", "terrible movie"),
        ("pos", "fun movie"),
        ("neg", "the plot was boring"),
    ];
    Ok(Dataset::new(
        rows.iter().map(|(_, s)| s.to_string()).collect(),
        rows.iter().map(|(l, _)| l.to_string()).collect(),
    )?)
}

fn fit_options(dir: &Path) -> FitOptions {
    FitOptions {
        batch_size: 4,
        learning_rate: 1e-3,
        finetuning_epochs: 2,
        distillation_epochs: 2,
        report_every: 1,
        checkpoint_path: dir.join("out").join("fastbert.safetensors"),
        ..FitOptions::default()
    }
}

/// Parameter values copied out of the model, keyed by name.
fn values<F: Fn(&str) -> bool>(model: &FastBertModel, keep: F) -> Result<BTreeMap<String, Vec<f32>>> {
    let mut out = BTreeMap::new();
    for (name, var) in model.named_parameters()? {
        if keep(&name) {
            out.insert(name, var.as_tensor().flatten_all()?.to_vec1::<f32>()?);
        }
    }
    Ok(out)
}

fn is_student(name: &str, layers: usize) -> bool {
    (0..layers - 1).any(|i| name.starts_with(&FastBertModel::head_prefix(i)))
}

#[test]
fn fit_runs_both_phases_and_writes_checkpoint() -> Result<()> {
    let tmp = tempdir()?;
    let mut model = tiny_model(tmp.path(), 3)?;
    let train = reviews()?;
    let mut options = fit_options(tmp.path());
    options.tensorboard_dir = Some(tmp.path().join("tb"));

    let mut trainer = Trainer::new(options.clone())?;
    let report = trainer.fit(&mut model, &train)?;

    assert_eq!(report.finetuning.epochs.len(), 2);
    assert_eq!(report.distillation.epochs.len(), 2);
    assert_eq!(report.finetuning.steps, 4);
    assert!(report.finetuning.epochs[0].checkpoint_saved);
    assert!(report.distillation.epochs.iter().all(|e| e.checkpoint_saved));
    for epoch in report.distillation.epochs.iter() {
        let summary = &epoch.evaluation;
        assert!((0.0..=1.0).contains(&summary.accuracy));
        assert!((1.0..=3.0).contains(&summary.average_exec_layers));
        assert_eq!(summary.examples, 8);
    }

    assert!(report.checkpoint.is_file());
    let manifest = read_manifest(&report.checkpoint)?.expect("manifest written");
    assert_eq!(manifest.phase, TrainingPhase::Final);
    assert_eq!(manifest.weights.filename, "fastbert.safetensors");

    let events: Vec<_> = fs::read_dir(tmp.path().join("tb"))?.collect();
    assert_eq!(events.len(), 1);

    let restored = tiny_model(tmp.path(), 3)?;
    load_checkpoint(&restored, &report.checkpoint)?;
    assert_eq!(values(&restored, |_| true)?, values(&model, |_| true)?);
    Ok(())
}

#[test]
fn fine_tuning_leaves_students_untouched() -> Result<()> {
    let tmp = tempdir()?;
    let model = tiny_model(tmp.path(), 3)?;
    let train = reviews()?;

    let students_before = values(&model, |n| is_student(n, 3))?;
    let rest_before = values(&model, |n| !is_student(n, 3))?;

    let mut trainer = Trainer::new(fit_options(tmp.path()))?;
    let report = trainer.fine_tune_backbone(&model, &train, &train)?;
    assert_eq!(report.phase, TrainingPhase::Finetuning);

    assert_eq!(values(&model, |n| is_student(n, 3))?, students_before);
    assert_ne!(values(&model, |n| !is_student(n, 3))?, rest_before);
    Ok(())
}

#[test]
fn fine_tuning_ends_on_its_best_epoch() -> Result<()> {
    let tmp = tempdir()?;
    let model = tiny_model(tmp.path(), 2)?;
    let train = reviews()?;
    let options = FitOptions {
        learning_rate: 0.05,
        finetuning_epochs: 5,
        ..fit_options(tmp.path())
    };

    let mut trainer = Trainer::new(options.clone())?;
    let report = trainer.fine_tune_backbone(&model, &train, &train)?;
    assert_eq!(report.epochs.len(), 5);

    let accuracies: Vec<f64> = report.epochs.iter().map(|e| e.evaluation.accuracy).collect();
    let best = accuracies.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let best_epoch = report
        .epochs
        .iter()
        .find(|e| e.evaluation.accuracy == best)
        .map(|e| e.epoch);

    let manifest = read_manifest(&options.checkpoint_path)?.expect("manifest written");
    assert_eq!(manifest.phase, TrainingPhase::Finetuning);
    assert_eq!(manifest.epoch, best_epoch);
    assert_eq!(manifest.accuracy, Some(best));

    let saved = candle_core::safetensors::load(&options.checkpoint_path, &candle_core::Device::Cpu)?;
    let mut on_disk = BTreeMap::new();
    for (name, tensor) in saved {
        on_disk.insert(name, tensor.flatten_all()?.to_vec1::<f32>()?);
    }
    assert_eq!(values(&model, |_| true)?, on_disk);

    assert_eq!(evaluate(&model, &train, 0.0)?.accuracy, best);
    Ok(())
}

#[test]
fn distillation_moves_only_student_heads() -> Result<()> {
    let tmp = tempdir()?;
    let model = tiny_model(tmp.path(), 3)?;
    let train = reviews()?;

    let students_before = values(&model, |n| is_student(n, 3))?;
    let frozen_before = values(&model, |n| !is_student(n, 3))?;

    let mut trainer = Trainer::new(fit_options(tmp.path()))?;
    let report = trainer.self_distill(&model, &train, &train)?;
    assert!(!report.skipped);
    assert_eq!(report.steps, 4);

    assert_eq!(values(&model, |n| !is_student(n, 3))?, frozen_before);
    assert_ne!(values(&model, |n| is_student(n, 3))?, students_before);
    Ok(())
}

#[test]
fn single_layer_backbone_skips_distillation() -> Result<()> {
    let tmp = tempdir()?;
    let model = tiny_model(tmp.path(), 1)?;
    let mut trainer = Trainer::new(fit_options(tmp.path()))?;
    let report = trainer.self_distill(&model, &reviews()?, &reviews()?)?;
    assert!(report.skipped);
    assert!(report.epochs.is_empty());
    Ok(())
}

#[test]
fn speed_zero_evaluation_runs_every_layer() -> Result<()> {
    let tmp = tempdir()?;
    let model = tiny_model(tmp.path(), 3)?;
    let summary = evaluate(&model, &reviews()?, 0.0)?;
    assert_eq!(summary.average_exec_layers, 3.0);

    let empty = Dataset::default();
    assert!(matches!(
        evaluate(&model, &empty, 0.0),
        Err(TrainingError::EmptyEvaluationSet)
    ));
    Ok(())
}

#[test]
fn unknown_training_labels_fail_before_training() -> Result<()> {
    let tmp = tempdir()?;
    let mut model = tiny_model(tmp.path(), 2)?;
    let train = Dataset::new(vec!["great fun".into()], vec!["neutral".into()])?;
    let mut trainer = Trainer::new(fit_options(tmp.path()))?;
    assert!(matches!(
        trainer.fit(&mut model, &train),
        Err(TrainingError::Model(ModelError::UnknownLabel(_)))
    ));
    assert!(!tmp.path().join("out").exists());
    Ok(())
}

#[test]
fn tampered_checkpoint_fails_integrity_check() -> Result<()> {
    let tmp = tempdir()?;
    let model = tiny_model(tmp.path(), 2)?;
    let path = tmp.path().join("model.safetensors");
    training::save_checkpoint(
        &model,
        &path,
        training::CheckpointInfo {
            phase: TrainingPhase::Distillation,
            epoch: Some(1),
            accuracy: Some(0.5),
        },
    )?;
    assert!(load_checkpoint(&model, &path)?.is_some());

    let mut bytes = fs::read(&path)?;
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&path, bytes)?;

    assert!(matches!(
        load_checkpoint(&model, &path),
        Err(TrainingError::Model(ModelError::Integrity { .. }))
    ));
    Ok(())
}
