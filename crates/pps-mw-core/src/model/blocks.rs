//! UNet building blocks, all operating on `[batch, channel, h, w]` tensors

use crate::error::ModelError;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::tensor::{Tensor, activation::relu, backend::Backend};

/// Two 3x3 "same" convolutions, each followed by batch norm and ReLU.
#[derive(Module, Debug)]
pub struct ConvolutionBlock<B: Backend> {
    conv_1: Conv2d<B>,
    norm_1: BatchNorm<B, 2>,
    conv_2: Conv2d<B>,
    norm_2: BatchNorm<B, 2>,
}

impl<B: Backend> ConvolutionBlock<B> {
    pub fn new(n_in: usize, n_out: usize, device: &B::Device) -> Self {
        let conv = |i, o| {
            Conv2dConfig::new([i, o], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device)
        };
        Self {
            conv_1: conv(n_in, n_out),
            norm_1: BatchNormConfig::new(n_out).init(device),
            conv_2: conv(n_out, n_out),
            norm_2: BatchNormConfig::new(n_out).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.norm_1.forward(self.conv_1.forward(x)));
        relu(self.norm_2.forward(self.conv_2.forward(x)))
    }
}

/// 2x2 max pool (stride 2) followed by a [`ConvolutionBlock`].
#[derive(Module, Debug)]
pub struct DownsamplingBlock<B: Backend> {
    pool: MaxPool2d,
    conv: ConvolutionBlock<B>,
}

impl<B: Backend> DownsamplingBlock<B> {
    pub fn new(n_in: usize, n_out: usize, device: &B::Device) -> Self {
        Self {
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            conv: ConvolutionBlock::new(n_in, n_out, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.conv.forward(self.pool.forward(x))
    }
}

/// Stride-2 transposed convolution, concatenation with the skip tensor and a
/// [`ConvolutionBlock`] back down to `n_out` channels.
#[derive(Module, Debug)]
pub struct UpsamplingBlock<B: Backend> {
    up: ConvTranspose2d<B>,
    conv: ConvolutionBlock<B>,
}

impl<B: Backend> UpsamplingBlock<B> {
    pub fn new(n_in: usize, n_out: usize, device: &B::Device) -> Self {
        Self {
            up: ConvTranspose2dConfig::new([n_in, n_out], [2, 2])
                .with_stride([2, 2])
                .init(device),
            conv: ConvolutionBlock::new(2 * n_out, n_out, device),
        }
    }

    /// `skip` must have `n_out` channels and twice the spatial size of `x`.
    pub fn forward(&self, x: Tensor<B, 4>, skip: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.up.forward(x);
        self.conv.forward(Tensor::cat(vec![x, skip], 1))
    }
}

/// Per-pixel MLP made of 1x1 convolutions.
///
/// `n_layers - 1` hidden layers of width `n_features` with ReLU, then a
/// linear output layer of width `n_outputs`.
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    layers: Vec<Conv2d<B>>,
}

impl<B: Backend> Mlp<B> {
    pub fn new(
        n_in: usize,
        n_outputs: usize,
        n_features: usize,
        n_layers: usize,
        device: &B::Device,
    ) -> Result<Self, ModelError> {
        if n_layers == 0 {
            return Err(ModelError::InvalidHyperparameter(
                "MLP needs at least one layer".to_string(),
            ));
        }
        let mut layers = Vec::with_capacity(n_layers);
        let mut width = n_in;
        for _ in 1..n_layers {
            layers.push(Conv2dConfig::new([width, n_features], [1, 1]).init(device));
            width = n_features;
        }
        layers.push(Conv2dConfig::new([width, n_outputs], [1, 1]).init(device));
        Ok(Self { layers })
    }

    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let last = self.layers.len().saturating_sub(1);
        self.layers.iter().enumerate().fold(x, |x, (i, layer)| {
            let y = layer.forward(x);
            if i < last { relu(y) } else { y }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_convolution_block_keeps_spatial_size() {
        let device = Default::default();
        let block = ConvolutionBlock::<B>::new(3, 8, &device);
        let out = block.forward(Tensor::zeros([2, 3, 10, 12], &device));
        assert_eq!(out.dims(), [2, 8, 10, 12]);
    }

    #[test]
    fn test_down_and_up_sampling_shapes() {
        let device = Default::default();
        let down = DownsamplingBlock::<B>::new(4, 8, &device);
        let skip = Tensor::<B, 4>::ones([1, 4, 16, 16], &device);
        let coarse = down.forward(skip.clone());
        assert_eq!(coarse.dims(), [1, 8, 8, 8]);

        let up = UpsamplingBlock::<B>::new(8, 4, &device);
        let fine = up.forward(coarse, skip);
        assert_eq!(fine.dims(), [1, 4, 16, 16]);
    }

    #[test]
    fn test_mlp_layers() {
        let device = Default::default();
        let mlp = Mlp::<B>::new(4, 9, 16, 3, &device).unwrap();
        assert_eq!(mlp.n_layers(), 3);
        let out = mlp.forward(Tensor::ones([1, 4, 5, 5], &device));
        assert_eq!(out.dims(), [1, 9, 5, 5]);

        let single = Mlp::<B>::new(4, 2, 16, 1, &device).unwrap();
        assert_eq!(single.n_layers(), 1);
        assert!(Mlp::<B>::new(4, 2, 16, 0, &device).is_err());
    }
}
