pub mod checkpoint;
pub mod config;
pub mod data;
pub mod logging;
pub mod loss;
pub mod metrics;
pub mod optimizer;
pub mod scheduler;
pub mod trainer;

pub use checkpoint::{
    load_checkpoint, read_manifest, save_checkpoint, CheckpointInfo, CheckpointManifest,
    TrainingPhase,
};
pub use config::{DataConfig, FitOptions, ModelSection, RunConfig, ScheduleKind, TrainingError};
pub use data::{batches_per_epoch, Dataset, ShuffledBatches};
pub use logging::{Logger, LoggingSettings};
pub use loss::{CrossEntropyLoss, DistillationLoss, LossMetrics, LossOutput};
pub use metrics::{EvaluationMetrics, EvaluationSummary, LossWindow};
pub use optimizer::{AdamWConfig, TrainerOptimizer, TrainerOptimizerOptions};
pub use scheduler::{training_steps, ConstantWithWarmup, LRScheduler, WarmupLinear};
pub use trainer::{
    evaluate, CheckpointPolicy, EpochReport, FitReport, ImprovementGate, PhaseReport, Trainer,
};
