//! pps-mw-core
//!
//! Building blocks for quantile-regression retrievals from microwave and
//! imager observations: parameter scaling, geometric data augmentation,
//! the quantile (pinball) loss and the UNet / QRNN network architectures.
//!
//! Everything that touches gradients is expressed on top of `burn`, so the
//! same code runs on the CPU `ndarray` backend in tests and on whatever
//! backend the training binary selects.

pub mod augmentation;
pub mod error;
pub mod grid;
pub mod loss;
pub mod model;
pub mod scaler;

pub use augmentation::{CropMode, FlipMode};
pub use error::{AugmentationError, CoreError, CoreResult, ModelError, ScalerError};
pub use grid::{Grid, LabelGrid};
pub use loss::quantile_loss;
pub use model::{Activation, Qrnn, QrnnConfig, QuantileModel, UNet, UNetConfig};
pub use scaler::{FEATURE_RANGE, MIN_VALUE, ParamSpec, Scale, Scaler};
