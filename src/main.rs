use std::{path::PathBuf, str::FromStr};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fastbert::{Dataset, FastBert, RunConfig};
use serde_json::{Number, Value};

#[derive(Parser, Debug)]
#[command(author, version, about = "Adaptive-depth BERT classifier", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fine-tune the backbone, then self-distill the student heads.
    Train {
        #[arg(short, long, value_name = "PATH", help = "Run configuration (.toml or .json)")]
        config: PathBuf,

        #[arg(
            long = "override",
            value_name = "KEY=VALUE",
            help = "Override a configuration value using a dot-separated path"
        )]
        overrides: Vec<OverrideArg>,
    },
    /// Classify sentences with early exit.
    Predict {
        #[arg(short, long, value_name = "PATH")]
        config: PathBuf,

        #[arg(long, value_name = "PATH", help = "Defaults to fit.checkpoint_path")]
        checkpoint: Option<PathBuf>,

        #[arg(long, default_value_t = 0.0)]
        speed: f32,

        #[arg(required = true)]
        sentences: Vec<String>,
    },
    /// Accuracy and mean executed layers over a labelled file.
    Evaluate {
        #[arg(short, long, value_name = "PATH")]
        config: PathBuf,

        #[arg(long, value_name = "PATH", help = "Defaults to fit.checkpoint_path")]
        checkpoint: Option<PathBuf>,

        #[arg(long, default_value_t = 0.0)]
        speed: f32,

        #[arg(long, value_name = "PATH", help = "Defaults to data.test, then data.dev")]
        data: Option<PathBuf>,
    },
}

#[derive(Debug, Clone)]
struct OverrideArg {
    path: String,
    value: String,
}

impl FromStr for OverrideArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, value) = s
            .split_once('=')
            .ok_or_else(|| "override must be in the form key=value".to_string())?;
        if path.trim().is_empty() {
            return Err("override key must not be empty".into());
        }
        Ok(Self {
            path: path.trim().to_string(),
            value: value.trim().to_string(),
        })
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Train { config, overrides } => train(config, &overrides),
        Command::Predict {
            config,
            checkpoint,
            speed,
            sentences,
        } => predict(config, checkpoint, speed, &sentences),
        Command::Evaluate {
            config,
            checkpoint,
            speed,
            data,
        } => evaluate(config, checkpoint, speed, data),
    }
}

fn train(config_path: PathBuf, overrides: &[OverrideArg]) -> Result<()> {
    let mut config = RunConfig::from_path(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if !overrides.is_empty() {
        config = apply_overrides(config, overrides)?;
        config.validate()?;
    }

    let Some(train_path) = config.data.train.clone() else {
        bail!("data.train must name a label<TAB>sentence file");
    };
    let train = Dataset::from_tsv(&train_path)?;
    let mut options = config.fit.clone();
    if let Some(dev_path) = &config.data.dev {
        let dev = Dataset::from_tsv(dev_path)?;
        options.dev_sentences = dev.sentences().to_vec();
        options.dev_labels = dev.labels().to_vec();
    }

    let mut classifier = FastBert::from_section(&config.model)?;
    let (sentences, labels) = (train.sentences().to_vec(), train.labels().to_vec());
    let report = classifier.fit(sentences, labels, options)?;

    if let Some(summary) = report.distillation.last_evaluation() {
        log::info!(
            "distilled accuracy {:.4} with {:.2} layers on average",
            summary.accuracy,
            summary.average_exec_layers
        );
    }
    println!("{}", report.checkpoint.display());
    Ok(())
}

fn predict(
    config_path: PathBuf,
    checkpoint: Option<PathBuf>,
    speed: f32,
    sentences: &[String],
) -> Result<()> {
    let config = RunConfig::from_path(&config_path)?;
    let classifier = FastBert::from_section(&config.model)?;
    classifier.load(checkpoint.unwrap_or(config.fit.checkpoint_path))?;

    for sentence in sentences {
        let (label, layers) = classifier.predict(sentence, speed)?;
        println!("{label}\t{layers}\t{sentence}");
    }
    Ok(())
}

fn evaluate(
    config_path: PathBuf,
    checkpoint: Option<PathBuf>,
    speed: f32,
    data: Option<PathBuf>,
) -> Result<()> {
    let config = RunConfig::from_path(&config_path)?;
    let Some(data_path) = data.or(config.data.test.clone()).or(config.data.dev.clone()) else {
        bail!("no evaluation file: pass --data or set data.test");
    };
    let dataset = Dataset::from_tsv(&data_path)?;

    let classifier = FastBert::from_section(&config.model)?;
    classifier.load(checkpoint.unwrap_or(config.fit.checkpoint_path))?;
    let summary = classifier.evaluate(&dataset, speed)?;
    println!(
        "accuracy={:.4} average_exec_layers={:.2} examples={}",
        summary.accuracy, summary.average_exec_layers, summary.examples
    );
    Ok(())
}

fn apply_overrides(config: RunConfig, overrides: &[OverrideArg]) -> Result<RunConfig> {
    let mut value =
        serde_json::to_value(config).context("failed to serialize config for overrides")?;
    for override_arg in overrides {
        let new_value = parse_override_value(&override_arg.value);
        set_value_at_path(&mut value, &override_arg.path, new_value)?;
    }
    serde_json::from_value(value).context("failed to deserialize config after overrides")
}

fn parse_override_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if trimmed.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Ok(int_val) = trimmed.parse::<i64>() {
        return Value::Number(Number::from(int_val));
    }
    if let Ok(float_val) = trimmed.parse::<f64>() {
        if let Some(number) = Number::from_f64(float_val) {
            return Value::Number(number);
        }
    }
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        if let Ok(json_val) = serde_json::from_str::<Value>(trimmed) {
            return json_val;
        }
    }
    Value::String(trimmed.to_string())
}

/// Sets `a.b.c` inside nested objects, creating missing objects on the way.
fn set_value_at_path(target: &mut Value, path: &str, new_value: Value) -> Result<()> {
    let segments: Vec<&str> = path.split('.').map(str::trim).collect();
    if segments.iter().any(|s| s.is_empty()) {
        bail!("invalid override path '{path}'");
    }

    let mut current = target;
    for (idx, segment) in segments.iter().enumerate() {
        if current.is_null() {
            *current = Value::Object(serde_json::Map::new());
        }
        let Some(map) = current.as_object_mut() else {
            bail!("override path segment '{segment}' points to a non-object value");
        };
        if idx + 1 == segments.len() {
            map.insert(segment.to_string(), new_value);
            return Ok(());
        }
        current = map.entry(segment.to_string()).or_insert(Value::Null);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_values_are_typed() {
        assert_eq!(parse_override_value("8"), Value::from(8));
        assert_eq!(parse_override_value("0.5"), Value::from(0.5));
        assert_eq!(parse_override_value("true"), Value::Bool(true));
        assert_eq!(
            parse_override_value(r#"["pos","neg"]"#),
            serde_json::json!(["pos", "neg"])
        );
        assert_eq!(parse_override_value("cuda:0"), Value::from("cuda:0"));
    }

    #[test]
    fn nested_paths_are_created() -> Result<()> {
        let mut value = serde_json::json!({ "fit": { "batch_size": 16 } });
        set_value_at_path(&mut value, "fit.batch_size", Value::from(4))?;
        set_value_at_path(&mut value, "data.dev", Value::from("dev.tsv"))?;
        assert_eq!(value["fit"]["batch_size"], 4);
        assert_eq!(value["data"]["dev"], "dev.tsv");
        assert!(set_value_at_path(&mut value, "fit.batch_size.x", Value::Null).is_err());
        assert!(set_value_at_path(&mut value, "fit..x", Value::Null).is_err());
        Ok(())
    }

    #[test]
    fn override_argument_requires_a_key() {
        assert!("fit.seed=3".parse::<OverrideArg>().is_ok());
        assert!("=3".parse::<OverrideArg>().is_err());
        assert!("fit.seed".parse::<OverrideArg>().is_err());
    }
}
