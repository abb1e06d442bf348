use super::{Activation, QuantileModel};
use crate::error::ModelError;
use burn::module::{Ignored, Module};
use burn::nn::{Linear, LinearConfig};
use burn::tensor::{Tensor, backend::Backend};
use serde::{Deserialize, Serialize};

/// Fully connected quantile regression network hyperparameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QrnnConfig {
    pub n_inputs: usize,
    /// `n_quantities * n_quantiles`
    pub n_outputs: usize,
    pub n_hidden_layers: usize,
    pub n_neurons: usize,
    pub activation: Activation,
}

impl QrnnConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Qrnn<B>, ModelError> {
        if self.n_inputs == 0 || self.n_outputs == 0 {
            return Err(ModelError::InvalidHyperparameter(
                "QRNN needs at least one input and one output".to_string(),
            ));
        }
        if self.n_hidden_layers > 0 && self.n_neurons == 0 {
            return Err(ModelError::InvalidHyperparameter(
                "hidden layers need at least one neuron".to_string(),
            ));
        }
        log::debug!(
            "QRNN: {} inputs, {} outputs, {}x{} {}",
            self.n_inputs,
            self.n_outputs,
            self.n_hidden_layers,
            self.n_neurons,
            self.activation
        );
        let mut hidden = Vec::with_capacity(self.n_hidden_layers);
        let mut width = self.n_inputs;
        for _ in 0..self.n_hidden_layers {
            hidden.push(LinearConfig::new(width, self.n_neurons).init(device));
            width = self.n_neurons;
        }
        Ok(Qrnn {
            hidden,
            output: LinearConfig::new(width, self.n_outputs).init(device),
            activation: Ignored(self.activation),
            n_inputs: Ignored(self.n_inputs),
        })
    }
}

/// Dense layers with a shared activation and a linear output layer.
#[derive(Module, Debug)]
pub struct Qrnn<B: Backend> {
    hidden: Vec<Linear<B>>,
    output: Linear<B>,
    activation: Ignored<Activation>,
    n_inputs: Ignored<usize>,
}

impl<B: Backend> Qrnn<B> {
    /// `[batch, n_inputs]` to `[batch, n_outputs]`
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self
            .hidden
            .iter()
            .fold(x, |x, layer| self.activation.apply(layer.forward(x)));
        self.output.forward(x)
    }
}

impl<B: Backend> QuantileModel<B, 2> for Qrnn<B> {
    fn check_input(&self, dims: [usize; 2]) -> Result<(), ModelError> {
        if dims[1] != *self.n_inputs {
            return Err(ModelError::InvalidInputShape {
                shape: dims.to_vec(),
                reason: format!("expected {} input features", *self.n_inputs),
            });
        }
        Ok(())
    }

    fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        Qrnn::forward(self, input)
    }
}
