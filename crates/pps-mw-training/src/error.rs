//! Error types for dataset loading, configuration and model artifacts

use pps_mw_core::{AugmentationError, CoreError, ModelError, ScalerError};
use std::path::PathBuf;

/// Training data loading / validation errors
#[derive(thiserror::Error, Debug)]
pub enum DatasetError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// Flat data length disagrees with the declared shape
    #[error("{path}:{line}: {field} has {actual} values but shape {shape:?} needs {expected}")]
    ShapeMismatch {
        path: PathBuf,
        line: usize,
        field: &'static str,
        shape: [usize; 3],
        expected: usize,
        actual: usize,
    },

    #[error("{path}:{line}: missing parameter {name}")]
    MissingParameter {
        path: PathBuf,
        line: usize,
        name: String,
    },

    #[error("No training data found in {0}")]
    Empty(PathBuf),

    /// Records that cannot be batched together
    #[error("Inconsistent records: {0}")]
    Inconsistent(String),
}

/// Invalid pipeline configuration
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{name} fraction {value} outside [0, 1]")]
    InvalidFraction { name: &'static str, value: f32 },

    #[error("Train, validation and test fractions sum to {0}, which exceeds 1")]
    FractionSum(f32),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Model artifact persistence errors
#[derive(thiserror::Error, Debug)]
pub enum ArtifactError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed model config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// burn recorder failure (save or load of weights)
    #[error("Weight file {path}: {message}")]
    Recorder { path: PathBuf, message: String },

    #[error("Model config holds a {found} model, expected {expected}")]
    ModelType {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Weight file {0} does not exist")]
    MissingWeights(PathBuf),

    /// Hyperparameters of the config cannot build the network
    #[error("Invalid model config: {0}")]
    Model(#[from] ModelError),

    #[error("Model was trained with {field} {stored:?}, settings give {configured:?}")]
    NameMismatch {
        field: &'static str,
        stored: Vec<String>,
        configured: Vec<String>,
    },

    #[error("Model config has no {0} scaler")]
    MissingScaler(&'static str),
}

/// Umbrella error of the training crate
#[derive(thiserror::Error, Debug)]
pub enum TrainingError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Tensor data could not be read back to the host
    #[error("Tensor readback failed: {0}")]
    Tensor(String),
}

impl From<ModelError> for TrainingError {
    fn from(e: ModelError) -> Self {
        Self::Core(e.into())
    }
}

impl From<ScalerError> for TrainingError {
    fn from(e: ScalerError) -> Self {
        Self::Core(e.into())
    }
}

impl From<AugmentationError> for TrainingError {
    fn from(e: AugmentationError) -> Self {
        Self::Core(e.into())
    }
}

/// Result type for training operations
pub type TrainingResult<T> = Result<T, TrainingError>;
