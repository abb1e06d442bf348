//! Training loop
//!
//! Epoch-based training with Adam, a per-step cosine-decay-with-restarts
//! learning rate and best-weights checkpointing.

mod schedule;

pub use schedule::CosineDecayRestarts;

use crate::common::io::write_json;
use crate::dataset::BatchSource;
use crate::error::{ArtifactError, ConfigError, TrainingError, TrainingResult};
use burn::module::{AutodiffModule, Module};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::ElementConversion;
use burn::tensor::backend::{AutodiffBackend, Backend};
use indicatif::{ProgressBar, ProgressStyle};
use pps_mw_core::{QuantileModel, quantile_loss};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Best weights of a training run
pub const WEIGHTS_FILE: &str = "weights.mpk";
/// Per-epoch loss history
pub const HISTORY_FILE: &str = "fit_history.json";

/// Training settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Batch size
    pub batch_size: usize,
    /// Epochs
    pub epochs: usize,
    /// Seed for shuffling and augmentation
    pub seed: u64,
    /// Quantile levels predicted per output quantity
    pub quantiles: Vec<f32>,
    /// Label fill value excluded from the loss
    pub fill_value: f32,
    /// Learning rate schedule
    pub schedule: CosineDecayRestarts,
    /// Output directory for weights and history
    pub output_dir: PathBuf,
}

impl TrainConfig {
    pub fn weights_path(&self) -> PathBuf {
        self.output_dir.join(WEIGHTS_FILE)
    }
}

/// Loss per epoch; `val_loss` stays empty without validation data
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FitHistory {
    pub loss: Vec<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub val_loss: Vec<f32>,
}

/// Tracks the best monitored loss
#[derive(Clone, Debug)]
pub struct BestTracker {
    best_loss: f32,
    best_epoch: Option<usize>,
}

impl Default for BestTracker {
    fn default() -> Self {
        Self {
            best_loss: f32::INFINITY,
            best_epoch: None,
        }
    }
}

impl BestTracker {
    /// Returns true when `loss` improves on the best so far. NaN never does.
    pub fn update(&mut self, epoch: usize, loss: f32) -> bool {
        if loss < self.best_loss {
            self.best_loss = loss;
            self.best_epoch = Some(epoch);
            true
        } else {
            false
        }
    }

    pub fn best(&self) -> Option<(usize, f32)> {
        self.best_epoch.map(|e| (e, self.best_loss))
    }
}

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

/// Saves module weights (full precision named MessagePack).
pub fn save_weights<B: Backend, M: Module<B>>(model: &M, path: &Path) -> Result<(), ArtifactError> {
    model
        .clone()
        .save_file(path, &recorder())
        .map_err(|e| ArtifactError::Recorder {
            path: path.to_path_buf(),
            message: format!("{e:?}"),
        })
}

/// Loads weights saved by [`save_weights`] into `model`.
pub fn load_weights<B: Backend, M: Module<B>>(
    model: M,
    path: &Path,
    device: &B::Device,
) -> Result<M, ArtifactError> {
    if !path.exists() {
        return Err(ArtifactError::MissingWeights(path.to_path_buf()));
    }
    model
        .load_file(path, &recorder(), device)
        .map_err(|e| ArtifactError::Recorder {
            path: path.to_path_buf(),
            message: format!("{e:?}"),
        })
}

fn scalar<B: Backend>(loss: burn::tensor::Tensor<B, 1>) -> f32 {
    loss.into_scalar().elem::<f32>()
}

/// Trainer
pub struct Trainer {
    config: TrainConfig,
    rng: ChaCha8Rng,
    step: u64,
}

impl Trainer {
    pub fn new(config: TrainConfig) -> TrainingResult<Self> {
        if config.batch_size == 0 {
            return Err(ConfigError::Invalid("batch size must be positive".into()).into());
        }
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            rng,
            step: 0,
        })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Runs the training and returns the model holding the best weights.
    ///
    /// The monitored value is the validation loss when `validation` is not
    /// empty, the training loss otherwise. Improving epochs write
    /// [`WEIGHTS_FILE`]; if no epoch improves, the final weights are written
    /// instead so the file always exists afterwards.
    pub fn fit<B, M, S, const D: usize>(
        &mut self,
        mut model: M,
        source: &S,
        train: &[usize],
        validation: &[usize],
        device: &B::Device,
    ) -> TrainingResult<(M, FitHistory)>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + QuantileModel<B, D>,
        M::InnerModule: QuantileModel<B::InnerBackend, D>,
        S: BatchSource<D>,
    {
        if train.is_empty() {
            return Err(ConfigError::Invalid("no training samples".into()).into());
        }
        std::fs::create_dir_all(&self.config.output_dir).map_err(|source| TrainingError::Io {
            path: self.config.output_dir.clone(),
            source,
        })?;

        log::info!("Training with {} samples", train.len());
        log::info!("Validation with {} samples", validation.len());
        log::info!("  Batch size: {}", self.config.batch_size);
        log::info!("  Epochs: {}", self.config.epochs);
        log::info!("  Parameters: {}", model.num_params());

        let weights_path = self.config.weights_path();
        let mut optim = AdamConfig::new().init::<B, M>();
        let mut history = FitHistory::default();
        let mut tracker = BestTracker::default();
        let mut train_indices = train.to_vec();

        for epoch in 0..self.config.epochs {
            train_indices.shuffle(&mut self.rng);

            let num_batches = train_indices.len().div_ceil(self.config.batch_size);
            let progress = ProgressBar::new(num_batches as u64);
            progress.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} loss:{msg}")
                    .expect("valid template"),
            );

            let mut total_loss = 0.0;
            let mut total_samples = 0;
            let mut lr = self.config.schedule.learning_rate(self.step);
            for chunk in train_indices.chunks(self.config.batch_size) {
                let batch = source.batch(chunk, true, &mut self.rng)?;
                let n = batch.len();
                let (input, label) = batch.into_tensors::<B>(device);
                let output = model.forward_checked(input)?;
                let loss = quantile_loss(output, label, &self.config.quantiles, self.config.fill_value)?;
                let batch_loss = scalar(loss.clone());

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                lr = self.config.schedule.learning_rate(self.step);
                model = optim.step(lr, model, grads);
                self.step += 1;

                total_loss += batch_loss * n as f32;
                total_samples += n;
                progress.set_message(format!("{:.6}", total_loss / total_samples as f32));
                progress.inc(1);
            }
            progress.finish_and_clear();

            let train_loss = total_loss / total_samples.max(1) as f32;
            history.loss.push(train_loss);

            let monitored = if validation.is_empty() {
                log::info!(
                    "Epoch {}/{}: lr={:.3e}, loss={:.6}",
                    epoch + 1,
                    self.config.epochs,
                    lr,
                    train_loss
                );
                train_loss
            } else {
                let val_loss = self.validation_loss(&model.valid(), source, validation, device)?;
                history.val_loss.push(val_loss);
                log::info!(
                    "Epoch {}/{}: lr={:.3e}, loss={:.6}, val_loss={:.6}",
                    epoch + 1,
                    self.config.epochs,
                    lr,
                    train_loss,
                    val_loss
                );
                val_loss
            };

            if tracker.update(epoch, monitored) {
                save_weights(&model, &weights_path)?;
                log::info!("  Saved best weights: {}", weights_path.display());
            }
        }

        match tracker.best() {
            Some((epoch, loss)) => {
                log::info!("Best epoch {} with monitored loss {loss:.6}", epoch + 1);
                model = load_weights(model, &weights_path, device)?;
            }
            None => {
                log::warn!("Monitored loss never improved, keeping final weights");
                save_weights(&model, &weights_path)?;
            }
        }

        let history_path = self.config.output_dir.join(HISTORY_FILE);
        write_json(&history_path, &history).map_err(|source| TrainingError::Io {
            path: history_path.clone(),
            source,
        })?;

        Ok((model, history))
    }

    /// Mean quantile loss over the validation batches.
    fn validation_loss<B, M, S, const D: usize>(
        &mut self,
        model: &M,
        source: &S,
        validation: &[usize],
        device: &B::Device,
    ) -> TrainingResult<f32>
    where
        B: Backend,
        M: QuantileModel<B, D>,
        S: BatchSource<D>,
    {
        let mut total_loss = 0.0;
        let mut total_samples = 0;
        for chunk in validation.chunks(self.config.batch_size) {
            let batch = source.batch(chunk, true, &mut self.rng)?;
            let n = batch.len();
            let (input, label) = batch.into_tensors::<B>(device);
            let output = model.forward_checked(input)?;
            let loss = quantile_loss(output, label, &self.config.quantiles, self.config.fill_value)?;
            total_loss += scalar(loss) * n as f32;
            total_samples += n;
        }
        Ok(total_loss / total_samples.max(1) as f32)
    }
}
