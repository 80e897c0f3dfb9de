use std::{
    ffi::OsString,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use model::{sha256_file, verify_sha256, FastBertModel};
use serde::{Deserialize, Serialize};

use crate::TrainingError;

pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingPhase {
    Finetuning,
    Distillation,
    /// Written once after both phases complete.
    Final,
}

impl TrainingPhase {
    /// Prefix used for log lines and TensorBoard scalar names.
    pub fn tag(self) -> &'static str {
        match self {
            TrainingPhase::Finetuning => "finetune",
            TrainingPhase::Distillation => "distill",
            TrainingPhase::Final => "final",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    pub filename: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Sidecar describing a weights file, stored at `<checkpoint>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointManifest {
    pub version: u32,
    pub phase: TrainingPhase,
    pub epoch: Option<usize>,
    /// Evaluation accuracy that triggered the save, when one did.
    pub accuracy: Option<f64>,
    pub created_unix_timestamp: u64,
    pub weights: FileRecord,
}

#[derive(Debug, Clone, Copy)]
pub struct CheckpointInfo {
    pub phase: TrainingPhase,
    pub epoch: Option<usize>,
    pub accuracy: Option<f64>,
}

pub fn manifest_path(checkpoint: &Path) -> PathBuf {
    with_suffix(checkpoint, ".json")
}

/// Writes every model parameter to `path` and its manifest alongside.
///
/// Both files are written to a sibling temporary path first and renamed
/// into place, so an interrupted save leaves the previous checkpoint
/// intact.
pub fn save_checkpoint(
    model: &FastBertModel,
    path: &Path,
    info: CheckpointInfo,
) -> Result<CheckpointManifest, TrainingError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            TrainingError::runtime(format!(
                "failed to create checkpoint directory {}: {err}",
                parent.display()
            ))
        })?;
    }

    let staging = with_suffix(path, ".tmp");
    model.save(&staging)?;
    let weights = file_record(&staging, path)?;
    fs::rename(&staging, path).map_err(|err| {
        TrainingError::runtime(format!(
            "failed to move checkpoint into place at {}: {err}",
            path.display()
        ))
    })?;

    let manifest = CheckpointManifest {
        version: CHECKPOINT_VERSION,
        phase: info.phase,
        epoch: info.epoch,
        accuracy: info.accuracy,
        created_unix_timestamp: unix_timestamp(),
        weights,
    };
    let manifest_file = manifest_path(path);
    let manifest_staging = with_suffix(&manifest_file, ".tmp");
    write_json(&manifest_staging, &manifest)?;
    fs::rename(&manifest_staging, &manifest_file).map_err(|err| {
        TrainingError::runtime(format!(
            "failed to move manifest into place at {}: {err}",
            manifest_file.display()
        ))
    })?;

    log::debug!(
        "saved {:?} checkpoint to {} ({} bytes)",
        manifest.phase,
        path.display(),
        manifest.weights.bytes
    );
    Ok(manifest)
}

/// Restores `model` from `path`, verifying the manifest when one exists.
pub fn load_checkpoint(
    model: &FastBertModel,
    path: &Path,
) -> Result<Option<CheckpointManifest>, TrainingError> {
    let manifest = read_manifest(path)?;
    if let Some(manifest) = &manifest {
        ensure_version_supported(manifest.version)?;
        verify_sha256(path, &manifest.weights.sha256)?;
    }
    model.load(path)?;
    Ok(manifest)
}

/// Reads `<path>.json`; `None` when no manifest was written.
pub fn read_manifest(path: &Path) -> Result<Option<CheckpointManifest>, TrainingError> {
    let manifest_file = manifest_path(path);
    if !manifest_file.is_file() {
        return Ok(None);
    }
    let file = File::open(&manifest_file).map_err(|err| {
        TrainingError::runtime(format!("failed to open {}: {err}", manifest_file.display()))
    })?;
    let manifest = serde_json::from_reader(file).map_err(|err| {
        TrainingError::runtime(format!(
            "failed to parse JSON {}: {err}",
            manifest_file.display()
        ))
    })?;
    Ok(Some(manifest))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Digest of `written`, recorded under the file name of `target`.
fn file_record(written: &Path, target: &Path) -> Result<FileRecord, TrainingError> {
    let sha256 = sha256_file(written)?;
    let bytes = written
        .metadata()
        .map_err(|err| {
            TrainingError::runtime(format!(
                "failed to stat checkpoint file {}: {err}",
                written.display()
            ))
        })?
        .len();
    let filename = target
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            TrainingError::runtime(format!(
                "checkpoint file name is not valid UTF-8: {}",
                target.display()
            ))
        })?
        .to_string();
    Ok(FileRecord {
        filename,
        sha256,
        bytes,
    })
}

fn ensure_version_supported(version: u32) -> Result<(), TrainingError> {
    if version != CHECKPOINT_VERSION {
        return Err(TrainingError::runtime(format!(
            "unsupported checkpoint version {} (expected {})",
            version, CHECKPOINT_VERSION
        )));
    }
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), TrainingError> {
    let mut file = File::create(path).map_err(|err| {
        TrainingError::runtime(format!("failed to create {}: {err}", path.display()))
    })?;
    let data = serde_json::to_vec_pretty(value)
        .map_err(|err| TrainingError::runtime(format!("failed to serialize JSON: {err}")))?;
    file.write_all(&data).map_err(|err| {
        TrainingError::runtime(format!("failed to write {}: {err}", path.display()))
    })?;
    file.write_all(b"\n")
        .map_err(|err| TrainingError::runtime(format!("failed to write {}: {err}", path.display())))
}
