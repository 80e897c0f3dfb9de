use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use bytes::{BufMut, Bytes, BytesMut};
use crc32fast::Hasher as Crc32;
use prost::Message;

use crate::{
    checkpoint::TrainingPhase,
    metrics::{EvaluationSummary, StepSnapshot},
    TrainingError,
};

#[derive(Clone, Debug)]
pub struct LoggingSettings {
    pub tensorboard_dir: Option<PathBuf>,
    pub tensorboard_flush_every_n: usize,
}

impl LoggingSettings {
    pub fn new(tensorboard_dir: Option<PathBuf>, flush_every: usize) -> Self {
        Self {
            tensorboard_dir,
            tensorboard_flush_every_n: flush_every.max(1),
        }
    }
}

/// Progress sink for both training phases: the `log` facade plus an
/// optional TensorBoard event file.
pub struct Logger {
    tensorboard: Option<TensorBoardWriter>,
}

impl Logger {
    pub fn new(settings: LoggingSettings) -> Result<Self, TrainingError> {
        let tensorboard = match settings.tensorboard_dir.as_ref() {
            Some(dir) => Some(TensorBoardWriter::create(
                dir,
                settings.tensorboard_flush_every_n,
            )?),
            None => None,
        };
        Ok(Self { tensorboard })
    }

    pub fn event_file(&self) -> Option<&Path> {
        self.tensorboard.as_ref().map(|writer| writer.path.as_path())
    }

    pub fn log_step(
        &mut self,
        phase: TrainingPhase,
        epoch: usize,
        step: usize,
        lr: f64,
        snapshot: &StepSnapshot,
    ) {
        log::info!(
            "{} epoch={} step={} loss={:.4} lr={:.3e} ex/s={:.1}",
            phase.tag(),
            epoch,
            step,
            snapshot.loss,
            lr,
            snapshot.examples_per_sec
        );

        if let Some(writer) = self.tensorboard.as_mut() {
            let step = step as i64;
            let tag = phase.tag();
            writer.record(&format!("{tag}/loss"), step, snapshot.loss);
            writer.record(&format!("{tag}/learning_rate"), step, lr);
        }
    }

    pub fn log_evaluation(
        &mut self,
        phase: TrainingPhase,
        epoch: usize,
        speed: f32,
        summary: &EvaluationSummary,
    ) {
        log::info!(
            "{} epoch={} speed={} acc={:.2}% avg_layers={:.2} examples={}",
            phase.tag(),
            epoch,
            speed,
            summary.accuracy * 100.0,
            summary.average_exec_layers,
            summary.examples
        );

        if let Some(writer) = self.tensorboard.as_mut() {
            let step = epoch as i64;
            let tag = phase.tag();
            writer.record(&format!("{tag}/accuracy"), step, summary.accuracy);
            if phase == TrainingPhase::Distillation {
                writer.record(
                    &format!("{tag}/average_exec_layers"),
                    step,
                    summary.average_exec_layers,
                );
            }
        }
    }

    pub fn flush(&mut self) {
        if let Some(writer) = self.tensorboard.as_mut() {
            if let Err(err) = writer.flush() {
                log::warn!("{err}");
            }
        }
    }
}

struct TensorBoardWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    flush_every: usize,
    pending: usize,
}

impl TensorBoardWriter {
    fn create(dir: &Path, flush_every: usize) -> Result<Self, TrainingError> {
        fs::create_dir_all(dir).map_err(|err| {
            TrainingError::runtime(format!(
                "failed to create tensorboard directory {}: {err}",
                dir.display()
            ))
        })?;
        let filename = format!(
            "events.out.tfevents.{}.{}",
            current_unix_timestamp(),
            hostname()
        );
        let path = dir.join(filename);
        let file = File::create(&path).map_err(|err| {
            TrainingError::runtime(format!(
                "failed to create tensorboard file {}: {err}",
                path.display()
            ))
        })?;
        log::debug!("writing tensorboard events to {}", path.display());
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            flush_every: flush_every.max(1),
            pending: 0,
        })
    }

    /// Scalar writes never abort training; failures are logged.
    fn record(&mut self, tag: &str, step: i64, value: f64) {
        if let Err(err) = self.write_scalar(tag, step, value) {
            log::warn!("{err}");
        }
    }

    fn write_scalar(&mut self, tag: &str, step: i64, value: f64) -> Result<(), TrainingError> {
        let event = Event {
            wall_time: current_wall_time(),
            step,
            summary: Some(Summary {
                value: vec![summary::Value {
                    tag: tag.to_string(),
                    simple_value: Some(value as f32),
                }],
            }),
        };
        let mut payload = BytesMut::with_capacity(event.encoded_len());
        event.encode(&mut payload).map_err(|err| {
            TrainingError::runtime(format!("failed to encode tensorboard event: {err}"))
        })?;

        self.writer
            .write_all(&frame_record(&payload.freeze()))
            .map_err(|err| {
                TrainingError::runtime(format!("failed to write tensorboard event: {err}"))
            })?;

        self.pending += 1;
        if self.pending >= self.flush_every {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TrainingError> {
        self.writer.flush().map_err(|err| {
            TrainingError::runtime(format!("failed to flush tensorboard file: {err}"))
        })?;
        self.pending = 0;
        Ok(())
    }
}

impl Drop for TensorBoardWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// TFRecord framing: `len | crc(len) | data | crc(data)`, little endian.
fn frame_record(data: &Bytes) -> Bytes {
    let len_bytes = (data.len() as u64).to_le_bytes();
    let mut framed = BytesMut::with_capacity(data.len() + 16);
    framed.put_slice(&len_bytes);
    framed.put_u32_le(masked_crc32(&len_bytes));
    framed.put_slice(data);
    framed.put_u32_le(masked_crc32(data));
    framed.freeze()
}

fn masked_crc32(data: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(data);
    let crc = hasher.finalize();
    ((crc >> 15) | (crc << 17)).wrapping_add(0xa282_ead8)
}

fn current_unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn current_wall_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_secs_f64())
        .unwrap_or(0.0)
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}

#[derive(Clone, PartialEq, Message)]
struct Event {
    #[prost(double, tag = "1")]
    wall_time: f64,
    #[prost(int64, tag = "2")]
    step: i64,
    #[prost(message, optional, tag = "5")]
    summary: Option<Summary>,
}

#[derive(Clone, PartialEq, Message)]
struct Summary {
    #[prost(message, repeated, tag = "1")]
    value: Vec<summary::Value>,
}

mod summary {
    use prost::Message;

    #[derive(Clone, PartialEq, Message)]
    pub struct Value {
        #[prost(string, tag = "1")]
        pub tag: String,
        #[prost(float, optional, tag = "2")]
        pub simple_value: Option<f32>,
    }
}
