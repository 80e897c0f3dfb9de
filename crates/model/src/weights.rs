//! Pretrained weight provisioning and loading.
//!
//! A [`WeightProvisioner`] makes `config.json`, `vocab.txt` and
//! `model.safetensors` available locally. The weights file is always verified
//! before anything reads it, against the first digest available: the
//! provisioner's own pin, the registry's pin, then the SHA-256 the Hub
//! published for the file. Weights with none of these are refused.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use hf_hub::api::sync::ApiBuilder;
use hf_hub::{Repo, RepoType};
use sha2::{Digest, Sha256};

use crate::error::{ModelError, Result};
use crate::registry::PretrainedBackbone;

pub const CONFIG_FILE: &str = "config.json";
pub const VOCAB_FILE: &str = "vocab.txt";
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// Prefix under which backbone parameters are registered.
pub const BACKBONE_PREFIX: &str = "backbone";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedFiles {
    pub config: PathBuf,
    pub vocab: PathBuf,
    pub weights: PathBuf,
}

pub trait WeightProvisioner {
    fn provision(&self, backbone: &PretrainedBackbone) -> Result<ProvisionedFiles>;
}

/// Downloads from the Hugging Face Hub into the local cache.
#[derive(Debug, Clone, Default)]
pub struct HubProvisioner {
    cache_dir: Option<PathBuf>,
    expected_sha256: Option<String>,
}

impl HubProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_expected_sha256(mut self, digest: impl Into<String>) -> Self {
        self.expected_sha256 = Some(digest.into());
        self
    }
}

impl WeightProvisioner for HubProvisioner {
    fn provision(&self, backbone: &PretrainedBackbone) -> Result<ProvisionedFiles> {
        let mut builder = ApiBuilder::new();
        if let Some(dir) = &self.cache_dir {
            builder = builder.with_cache_dir(dir.clone());
        }
        let api = builder
            .build()
            .map_err(|e| ModelError::Provision(format!("failed to create hub client: {e}")))?;
        let repo = api.repo(Repo::with_revision(
            backbone.repo.to_string(),
            RepoType::Model,
            backbone.revision.to_string(),
        ));

        let fetch = |file: &str| {
            repo.get(file).map_err(|e| {
                ModelError::Provision(format!("failed to download {file} from {}: {e}", backbone.repo))
            })
        };
        log::info!("provisioning {} from {}", backbone.name, backbone.repo);
        let files = ProvisionedFiles {
            config: fetch(CONFIG_FILE)?,
            vocab: fetch(VOCAB_FILE)?,
            weights: fetch(WEIGHTS_FILE)?,
        };
        verify_weights(&files.weights, self.expected_sha256.as_deref(), backbone)?;
        Ok(files)
    }
}

/// Uses files already present in a directory.
#[derive(Debug, Clone)]
pub struct LocalProvisioner {
    dir: PathBuf,
    expected_sha256: Option<String>,
}

impl LocalProvisioner {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            expected_sha256: None,
        }
    }

    pub fn with_expected_sha256(mut self, digest: impl Into<String>) -> Self {
        self.expected_sha256 = Some(digest.into());
        self
    }
}

impl WeightProvisioner for LocalProvisioner {
    fn provision(&self, backbone: &PretrainedBackbone) -> Result<ProvisionedFiles> {
        let files = ProvisionedFiles {
            config: self.dir.join(CONFIG_FILE),
            vocab: self.dir.join(VOCAB_FILE),
            weights: self.dir.join(WEIGHTS_FILE),
        };
        for path in [&files.config, &files.vocab, &files.weights] {
            if !path.is_file() {
                return Err(ModelError::Provision(format!(
                    "{} is missing {}",
                    backbone.name,
                    path.display()
                )));
            }
        }
        verify_weights(&files.weights, self.expected_sha256.as_deref(), backbone)?;
        Ok(files)
    }
}

fn verify_weights(path: &Path, pinned: Option<&str>, backbone: &PretrainedBackbone) -> Result<()> {
    let expected = match pinned.or(backbone.weights_sha256) {
        Some(digest) => digest.to_string(),
        None => hub_content_digest(path).ok_or_else(|| ModelError::UnpinnedWeights {
            path: path.to_path_buf(),
        })?,
    };
    verify_sha256(path, &expected)?;
    log::debug!("verified {} (sha256 {expected})", path.display());
    Ok(())
}

/// Digest the Hub published for a cached LFS file.
///
/// The hf-hub cache stores each download as `blobs/<etag>` and links the
/// snapshot entry to it. For LFS files the etag is the content's SHA-256.
pub fn hub_content_digest(path: &Path) -> Option<String> {
    let target = std::fs::read_link(path).ok()?;
    let name = target.file_name()?.to_str()?;
    (name.len() == 64 && name.bytes().all(|b| b.is_ascii_hexdigit()))
        .then(|| name.to_ascii_lowercase())
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 1024 * 1024];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    let actual = sha256_file(path)?;
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(ModelError::Integrity {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Maps a Hugging Face BERT tensor name onto this crate's parameter names.
///
/// Only encoder tensors (`bert.*`) are kept; pretraining heads are dropped.
/// Legacy `gamma`/`beta` LayerNorm names become `weight`/`bias`.
pub fn remap_pretrained_name(name: &str) -> Option<String> {
    let rest = name.strip_prefix("bert.")?;
    if rest.starts_with("pooler.") {
        return None;
    }
    let rest = if let Some(stem) = rest.strip_suffix(".gamma") {
        format!("{stem}.weight")
    } else if let Some(stem) = rest.strip_suffix(".beta") {
        format!("{stem}.bias")
    } else {
        rest.to_string()
    };
    Some(format!("{BACKBONE_PREFIX}.{rest}"))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    /// Checkpoint tensors with no matching parameter.
    pub skipped: Vec<String>,
    /// Backbone parameters the checkpoint did not provide.
    pub missing: Vec<String>,
}

/// Copies matching tensors from a pretrained safetensors file into `varmap`.
///
/// Loading is lenient: unmatched or mis-shaped tensors are skipped and
/// backbone parameters without a counterpart keep their initialisation.
pub fn load_pretrained(varmap: &VarMap, path: &Path, device: &Device) -> Result<LoadReport> {
    let tensors = candle_core::safetensors::load(path, device)?;
    apply_pretrained(varmap, tensors)
}

pub(crate) fn apply_pretrained(
    varmap: &VarMap,
    tensors: HashMap<String, Tensor>,
) -> Result<LoadReport> {
    let vars = varmap
        .data()
        .lock()
        .map_err(|_| ModelError::Config("parameter store lock poisoned".into()))?;

    let mut report = LoadReport::default();
    let mut seen = std::collections::HashSet::new();
    for (name, tensor) in tensors {
        let Some(target) = remap_pretrained_name(&name) else {
            report.skipped.push(name);
            continue;
        };
        match vars.get(&target) {
            Some(var) if var.dims() == tensor.dims() => {
                var.set(&tensor.to_dtype(var.dtype())?)?;
                seen.insert(target);
                report.loaded += 1;
            }
            Some(var) => {
                log::warn!(
                    "skipping {name}: checkpoint shape {:?} != parameter shape {:?}",
                    tensor.dims(),
                    var.dims()
                );
                report.skipped.push(name);
            }
            None => report.skipped.push(name),
        }
    }

    let prefix = format!("{BACKBONE_PREFIX}.");
    report.missing = vars
        .keys()
        .filter(|name| name.starts_with(&prefix) && !seen.contains(*name))
        .cloned()
        .collect();
    report.missing.sort();
    report.skipped.sort();

    log::info!(
        "loaded {} pretrained tensors ({} skipped, {} backbone parameters left at initialisation)",
        report.loaded,
        report.skipped.len(),
        report.missing.len()
    );
    for name in &report.missing {
        log::debug!("not in checkpoint: {name}");
    }
    Ok(report)
}
