//! Error types for the retrieval building blocks

/// Scaler construction errors
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ScalerError {
    /// Per-channel parameter vectors must have length 1 or agree with each other
    #[error("Scaler parameter length mismatch: {name} has {actual} values, expected 1 or {expected}")]
    LengthMismatch {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Configured min and max collapse to the same point
    #[error("Parameter {0} has an empty value range")]
    EmptyRange(String),

    /// Channel index outside the configured channels
    #[error("Channel {idx} out of range for scaler with {channels} channels")]
    ChannelOutOfRange { idx: usize, channels: usize },
}

/// Data augmentation errors
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum AugmentationError {
    /// Crop window does not fit into the input grid
    #[error("Crop size {size} does not fit into input grid of {height}x{width}")]
    CropTooLarge {
        size: usize,
        height: usize,
        width: usize,
    },

    /// Crop size of zero
    #[error("Crop size must be positive")]
    EmptyCrop,

    /// Label grid is not an integer multiple of the input grid
    #[error(
        "Label grid {label_height}x{label_width} is not an integer multiple of input grid {height}x{width}"
    )]
    ResolutionRatio {
        height: usize,
        width: usize,
        label_height: usize,
        label_width: usize,
    },

    /// Rotation (transpose) needs square grids
    #[error("Rotation requires square grids, got {height}x{width}")]
    NotSquare { height: usize, width: usize },

    /// Missing-data probability outside [0, 1]
    #[error("Missing fraction {0} outside [0, 1]")]
    InvalidFraction(f32),
}

/// Network construction / shape errors
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ModelError {
    /// Input tensor does not satisfy the architecture's shape constraints
    #[error("Invalid input shape {shape:?}: {reason}")]
    InvalidInputShape { shape: Vec<usize>, reason: String },

    /// Prediction channels are not `n_labels * n_quantiles`
    #[error(
        "Prediction has {prediction_channels} channels, expected {label_channels} labels x {quantiles} quantiles"
    )]
    ChannelMismatch {
        prediction_channels: usize,
        label_channels: usize,
        quantiles: usize,
    },

    /// Prediction and label disagree outside the channel axis
    #[error("Prediction shape {prediction:?} does not match label shape {label:?}")]
    ShapeMismatch {
        prediction: Vec<usize>,
        label: Vec<usize>,
    },

    /// Hyperparameter that cannot produce a network
    #[error("Invalid hyperparameter: {0}")]
    InvalidHyperparameter(String),

    /// Unknown activation function name
    #[error("Unknown activation function: {0}")]
    UnknownActivation(String),
}

/// Umbrella error for the core crate
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Scaler(#[from] ScalerError),

    #[error(transparent)]
    Augmentation(#[from] AugmentationError),

    #[error(transparent)]
    Model(#[from] ModelError),

    /// ndarray shape construction failure
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;
