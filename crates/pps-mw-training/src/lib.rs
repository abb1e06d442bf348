//! pps-mw-training
//!
//! Training and evaluation pipelines for quantile-regression retrievals:
//! dataset loading and batching, the training loop, the persisted model
//! artifact, retrieval statistics and the per-pipeline settings driven by the
//! `pps-mw-training` binary.

pub mod artifact;
pub mod common;
pub mod dataset;
pub mod error;
pub mod evaluation;
pub mod pipelines;
pub mod trainer;

pub use error::{ArtifactError, ConfigError, DatasetError, TrainingError, TrainingResult};

/// CPU backend used for evaluation and inference
pub type InferenceBackend = burn::backend::NdArray<f32>;
/// Autodiff backend used for training
pub type TrainingBackend = burn::backend::Autodiff<InferenceBackend>;
