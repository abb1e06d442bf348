//! Retrieval statistics on the held-out test split
//!
//! The median-quantile prediction of every output quantity is compared with
//! the label over valid positions (neither value is the fill value and both
//! are finite),
//! after reversing the label scaling where the pipeline applies one.

use crate::common::io::write_json;
use crate::dataset::BatchSource;
use crate::error::{TrainingError, TrainingResult};
use burn::tensor::backend::Backend;
use pps_mw_core::{QuantileModel, Scaler};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Statistics file written next to the model config
pub const STATS_FILE: &str = "retrieval_stats.json";

/// Error statistics of one retrieved quantity; `None` serializes as `null`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantityStats {
    pub rmse: Option<f32>,
    pub corr: Option<f32>,
    pub n_valid: usize,
}

/// Streaming accumulator for RMSE and Pearson correlation
#[derive(Clone, Debug, Default)]
pub struct RunningStats {
    n: usize,
    sum_p: f64,
    sum_l: f64,
    sum_pp: f64,
    sum_ll: f64,
    sum_pl: f64,
    sum_sq_err: f64,
}

impl RunningStats {
    pub fn push(&mut self, prediction: f32, label: f32) {
        let (p, l) = (f64::from(prediction), f64::from(label));
        self.n += 1;
        self.sum_p += p;
        self.sum_l += l;
        self.sum_pp += p * p;
        self.sum_ll += l * l;
        self.sum_pl += p * l;
        self.sum_sq_err += (p - l) * (p - l);
    }

    pub fn finish(&self) -> QuantityStats {
        if self.n == 0 {
            return QuantityStats {
                rmse: None,
                corr: None,
                n_valid: 0,
            };
        }
        let n = self.n as f64;
        let rmse = (self.sum_sq_err / n).sqrt();
        let cov = self.sum_pl - self.sum_p * self.sum_l / n;
        let var_p = self.sum_pp - self.sum_p * self.sum_p / n;
        let var_l = self.sum_ll - self.sum_l * self.sum_l / n;
        let corr = if self.n >= 2 && var_p > 0.0 && var_l > 0.0 {
            Some((cov / (var_p * var_l).sqrt()).clamp(-1.0, 1.0) as f32)
        } else {
            None
        };
        QuantityStats {
            rmse: Some(rmse as f32),
            corr,
            n_valid: self.n,
        }
    }
}

fn is_valid(prediction: f32, label: f32, fill_value: f32) -> bool {
    label != fill_value && prediction != fill_value && label.is_finite() && prediction.is_finite()
}

/// Statistics of `predictions` against `labels`, skipping fill values.
pub fn compute_stats(predictions: &[f32], labels: &[f32], fill_value: f32) -> QuantityStats {
    let mut stats = RunningStats::default();
    for (&p, &l) in predictions.iter().zip(labels) {
        if is_valid(p, l, fill_value) {
            stats.push(p, l);
        }
    }
    stats.finish()
}

/// What to compare during evaluation
pub struct EvaluationSetup<'a> {
    pub quantiles: &'a [f32],
    pub label_names: &'a [String],
    /// Reverses the label scaling before comparing, when labels are scaled
    pub label_scaler: Option<&'a Scaler>,
    pub fill_value: f32,
    pub batch_size: usize,
}

/// Runs `model` over the `test` samples (no augmentation) and returns the
/// statistics per output quantity.
pub fn evaluate<B, M, S, const D: usize>(
    model: &M,
    source: &S,
    test: &[usize],
    setup: &EvaluationSetup<'_>,
    device: &B::Device,
) -> TrainingResult<BTreeMap<String, QuantityStats>>
where
    B: Backend,
    M: QuantileModel<B, D>,
    S: BatchSource<D>,
{
    let n_quantiles = setup.quantiles.len();
    let median = n_quantiles / 2;
    let n_labels = setup.label_names.len();
    let mut running = vec![RunningStats::default(); n_labels];
    // unused by non-augmented batches, required by the batch interface
    let mut rng = ChaCha8Rng::seed_from_u64(0);

    for chunk in test.chunks(setup.batch_size.max(1)) {
        let batch = source.batch(chunk, false, &mut rng)?;
        let label_shape = batch.label_shape;
        let (input, _) = batch.clone().into_tensors::<B>(device);
        let output = model.forward_checked(input)?;
        let output_shape = output.dims();
        pps_mw_core::loss::check_shapes(&output_shape, &label_shape, n_quantiles)?;
        if label_shape[1] != n_labels {
            return Err(TrainingError::Tensor(format!(
                "label has {} channels, {} quantity names configured",
                label_shape[1], n_labels
            )));
        }
        let prediction = output
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| TrainingError::Tensor(format!("{e:?}")))?;

        let n_batch = label_shape[0];
        let plane = label_shape[2..].iter().product::<usize>();
        let out_channels = output_shape[1];
        for i in 0..n_batch {
            for (k, stats) in running.iter_mut().enumerate() {
                let label_base = (i * n_labels + k) * plane;
                let pred_base = (i * out_channels + k * n_quantiles + median) * plane;
                for p in 0..plane {
                    let mut l = batch.label[label_base + p];
                    let mut y = prediction[pred_base + p];
                    if !is_valid(y, l, setup.fill_value) {
                        continue;
                    }
                    if let Some(scaler) = setup.label_scaler {
                        l = scaler.reverse(l, k)?;
                        y = scaler.reverse(y, k)?;
                    }
                    stats.push(y, l);
                }
            }
        }
    }

    let stats = setup
        .label_names
        .iter()
        .cloned()
        .zip(running.iter().map(RunningStats::finish))
        .collect::<BTreeMap<_, _>>();
    for (name, s) in &stats {
        log::info!(
            "{name}: rmse={}, corr={}, n_valid={}",
            s.rmse.map_or("null".to_string(), |v| format!("{v:.4}")),
            s.corr.map_or("null".to_string(), |v| format!("{v:.4}")),
            s.n_valid
        );
    }
    Ok(stats)
}

/// Writes the statistics to `<dir>/retrieval_stats.json`.
pub fn write_stats(dir: &Path, stats: &BTreeMap<String, QuantityStats>) -> TrainingResult<PathBuf> {
    let path = dir.join(STATS_FILE);
    write_json(&path, stats).map_err(|source| TrainingError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}
