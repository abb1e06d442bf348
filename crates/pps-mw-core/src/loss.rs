//! Quantile (pinball) loss
//!
//! Prediction channel `k * n_quantiles + q` is compared with label channel
//! `k` at quantile level `quantiles[q]`. The pinball loss of each pair is
//! averaged over the label positions that are not `fill_value` and the
//! averages are summed.

use crate::error::ModelError;
use burn::tensor::{Tensor, backend::Backend};

/// Checks that `prediction` and `label` only differ along the channel axis
/// and that the prediction has one channel per label channel and quantile.
///
/// Returns the number of label channels.
pub fn check_shapes(
    prediction: &[usize],
    label: &[usize],
    n_quantiles: usize,
) -> Result<usize, ModelError> {
    let mismatch = || ModelError::ShapeMismatch {
        prediction: prediction.to_vec(),
        label: label.to_vec(),
    };
    if prediction.len() != label.len() || prediction.len() < 2 {
        return Err(mismatch());
    }
    let outside_channel = prediction
        .iter()
        .zip(label)
        .enumerate()
        .any(|(axis, (p, l))| axis != 1 && p != l);
    if outside_channel {
        return Err(mismatch());
    }
    let label_channels = label[1];
    if n_quantiles == 0 || prediction[1] != label_channels * n_quantiles {
        return Err(ModelError::ChannelMismatch {
            prediction_channels: prediction[1],
            label_channels,
            quantiles: n_quantiles,
        });
    }
    Ok(label_channels)
}

/// Composite pinball loss for tensors with the channel on axis 1.
///
/// Works for `[batch, channel]` as well as `[batch, channel, h, w]` tensors.
/// A label channel without any valid position contributes zero.
pub fn quantile_loss<B: Backend, const D: usize>(
    prediction: Tensor<B, D>,
    label: Tensor<B, D>,
    quantiles: &[f32],
    fill_value: f32,
) -> Result<Tensor<B, 1>, ModelError> {
    let n_quantiles = quantiles.len();
    let label_channels = check_shapes(&prediction.dims(), &label.dims(), n_quantiles)?;

    let mut total = Tensor::<B, 1>::zeros([1], &prediction.device());
    for k in 0..label_channels {
        let y_true = label.clone().narrow(1, k, 1);
        let valid = y_true.clone().not_equal_elem(fill_value);
        let n_valid = valid.clone().float().sum().clamp_min(1.0);
        let invalid = valid.bool_not();

        for (q, &tau) in quantiles.iter().enumerate() {
            let y_pred = prediction.clone().narrow(1, k * n_quantiles + q, 1);
            let error = y_true.clone() - y_pred;
            let pinball = (error.clone() * tau).max_pair(error * (tau - 1.0));
            let pinball = pinball.mask_fill(invalid.clone(), 0.0);
            total = total + pinball.sum() / n_valid.clone();
        }
    }
    Ok(total)
}

/// Pinball loss of a single value.
pub fn pinball(tau: f32, y_true: f32, y_pred: f32) -> f32 {
    let error = y_true - y_pred;
    (tau * error).max((tau - 1.0) * error)
}
