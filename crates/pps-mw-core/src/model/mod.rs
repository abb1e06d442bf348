//! Quantile-regression network architectures
//!
//! - [`UNet`]: fully convolutional encoder/decoder for gridded retrievals
//! - [`Qrnn`]: fully connected network for per-sample retrievals

mod blocks;
mod qrnn;
mod unet;

pub use blocks::{ConvolutionBlock, DownsamplingBlock, Mlp, UpsamplingBlock};
pub use qrnn::{Qrnn, QrnnConfig};
pub use unet::{UNet, UNetConfig};

use crate::error::ModelError;
use burn::module::Module;
use burn::tensor::{Tensor, activation, backend::Backend};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A network mapping a rank-`D` input to quantile predictions with the
/// channel on axis 1.
pub trait QuantileModel<B: Backend, const D: usize>: Module<B> {
    /// Rejects inputs the architecture cannot process.
    fn check_input(&self, dims: [usize; D]) -> Result<(), ModelError>;

    fn forward(&self, input: Tensor<B, D>) -> Tensor<B, D>;

    /// [`QuantileModel::forward`] after [`QuantileModel::check_input`].
    fn forward_checked(&self, input: Tensor<B, D>) -> Result<Tensor<B, D>, ModelError> {
        self.check_input(input.dims())?;
        Ok(self.forward(input))
    }
}

/// Hidden-layer activation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Relu,
    LeakyRelu,
    Gelu,
    Tanh,
    Sigmoid,
}

impl Activation {
    pub fn apply<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Relu => activation::relu(x),
            Activation::LeakyRelu => activation::leaky_relu(x, 0.01),
            Activation::Gelu => activation::gelu(x),
            Activation::Tanh => activation::tanh(x),
            Activation::Sigmoid => activation::sigmoid(x),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Activation::Relu => "relu",
            Activation::LeakyRelu => "leaky_relu",
            Activation::Gelu => "gelu",
            Activation::Tanh => "tanh",
            Activation::Sigmoid => "sigmoid",
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Activation {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "relu" => Ok(Activation::Relu),
            "leaky_relu" | "leakyrelu" => Ok(Activation::LeakyRelu),
            "gelu" => Ok(Activation::Gelu),
            "tanh" => Ok(Activation::Tanh),
            "sigmoid" => Ok(Activation::Sigmoid),
            _ => Err(ModelError::UnknownActivation(s.to_string())),
        }
    }
}
