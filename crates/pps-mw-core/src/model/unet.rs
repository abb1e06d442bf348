use super::QuantileModel;
use super::blocks::{ConvolutionBlock, DownsamplingBlock, Mlp, UpsamplingBlock};
use crate::error::ModelError;
use burn::module::{Ignored, Module};
use burn::tensor::{Tensor, backend::Backend};
use serde::{Deserialize, Serialize};

/// Spatial sizes must be divisible by this (four 2x2 poolings)
pub const SIZE_MULTIPLE: usize = 16;

/// UNet hyperparameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UNetConfig {
    /// Input channels
    pub n_inputs: usize,
    /// Output channels (`n_quantities * n_quantiles`)
    pub n_outputs: usize,
    /// Channels after the input block; doubled by every downsampling block
    pub n_unet_base: usize,
    /// Hidden width of the output MLP
    pub n_features: usize,
    /// Layers of the output MLP
    pub n_layers: usize,
}

impl UNetConfig {
    pub fn validate(&self) -> Result<(), ModelError> {
        let fields = [
            ("n_inputs", self.n_inputs),
            ("n_outputs", self.n_outputs),
            ("n_unet_base", self.n_unet_base),
            ("n_features", self.n_features),
            ("n_layers", self.n_layers),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(ModelError::InvalidHyperparameter(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<UNet<B>, ModelError> {
        self.validate()?;
        let n = self.n_unet_base;
        log::debug!(
            "UNet: {} inputs, {} outputs, base {n}, MLP {}x{}",
            self.n_inputs,
            self.n_outputs,
            self.n_layers,
            self.n_features
        );
        Ok(UNet {
            in_block: ConvolutionBlock::new(self.n_inputs, n, device),
            down_1: DownsamplingBlock::new(n, 2 * n, device),
            down_2: DownsamplingBlock::new(2 * n, 4 * n, device),
            down_3: DownsamplingBlock::new(4 * n, 8 * n, device),
            down_4: DownsamplingBlock::new(8 * n, 16 * n, device),
            up_1: UpsamplingBlock::new(16 * n, 8 * n, device),
            up_2: UpsamplingBlock::new(8 * n, 4 * n, device),
            up_3: UpsamplingBlock::new(4 * n, 2 * n, device),
            up_4: UpsamplingBlock::new(2 * n, n, device),
            out_block: Mlp::new(n, self.n_outputs, self.n_features, self.n_layers, device)?,
            n_inputs: Ignored(self.n_inputs),
        })
    }
}

/// Input block, four encoder and four decoder blocks with skip connections
/// and a per-pixel MLP head.
#[derive(Module, Debug)]
pub struct UNet<B: Backend> {
    in_block: ConvolutionBlock<B>,
    down_1: DownsamplingBlock<B>,
    down_2: DownsamplingBlock<B>,
    down_3: DownsamplingBlock<B>,
    down_4: DownsamplingBlock<B>,
    up_1: UpsamplingBlock<B>,
    up_2: UpsamplingBlock<B>,
    up_3: UpsamplingBlock<B>,
    up_4: UpsamplingBlock<B>,
    out_block: Mlp<B>,
    n_inputs: Ignored<usize>,
}

impl<B: Backend> UNet<B> {
    /// `[batch, n_inputs, h, w]` to `[batch, n_outputs, h, w]`.
    ///
    /// `h` and `w` must be multiples of [`SIZE_MULTIPLE`]; use
    /// [`QuantileModel::forward_checked`] for untrusted input.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let d_0 = self.in_block.forward(x);
        let d_1 = self.down_1.forward(d_0.clone());
        let d_2 = self.down_2.forward(d_1.clone());
        let d_3 = self.down_3.forward(d_2.clone());
        let d_4 = self.down_4.forward(d_3.clone());
        let u = self.up_1.forward(d_4, d_3);
        let u = self.up_2.forward(u, d_2);
        let u = self.up_3.forward(u, d_1);
        let u = self.up_4.forward(u, d_0);
        self.out_block.forward(u)
    }
}

impl<B: Backend> QuantileModel<B, 4> for UNet<B> {
    fn check_input(&self, dims: [usize; 4]) -> Result<(), ModelError> {
        let [_, channels, h, w] = dims;
        let reason = if channels != *self.n_inputs {
            Some(format!("expected {} input channels", *self.n_inputs))
        } else if h == 0 || w == 0 || h % SIZE_MULTIPLE != 0 || w % SIZE_MULTIPLE != 0 {
            Some(format!("spatial size must be a positive multiple of {SIZE_MULTIPLE}"))
        } else {
            None
        };
        match reason {
            Some(reason) => Err(ModelError::InvalidInputShape {
                shape: dims.to_vec(),
                reason,
            }),
            None => Ok(()),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        UNet::forward(self, input)
    }
}
