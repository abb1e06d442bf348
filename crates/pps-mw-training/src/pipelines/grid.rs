//! Shared runner of the UNet pipelines

use super::settings::{GridPreprocessing, UNetPipelineSettings};
use super::{PipelineType, RunSummary};
use crate::artifact::{CONFIG_FILE, ModelArchitecture, NetworkConfig};
use crate::common::io::list_data_files;
use crate::dataset::{BatchSource, GridBatchSource, GridSample, load_grid_records, split_indices};
use crate::error::{ConfigError, DatasetError, TrainingResult};
use crate::evaluation::{EvaluationSetup, evaluate, write_stats};
use crate::trainer::{Trainer, WEIGHTS_FILE};
use crate::{InferenceBackend, TrainingBackend};
use burn::module::AutodiffModule;
use burn::tensor::backend::Backend;
use ndarray::Axis;
use pps_mw_core::grid::resolution_ratio;
use pps_mw_core::{Grid, ParamSpec, Scaler, UNetConfig};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;

/// Channel selection, scaling and fill handling of raw grid records
pub(crate) struct Preprocessor {
    channels: Option<Vec<usize>>,
    input_scaler: Option<Scaler>,
    label_scaler: Option<Scaler>,
    fill_value: f32,
}

impl Preprocessor {
    pub(crate) fn new(prep: &GridPreprocessing, fill_value: f32) -> TrainingResult<Self> {
        let scaler = |params: &Option<Vec<ParamSpec>>| {
            params
                .as_deref()
                .map(|p| Scaler::from_params(p, prep.feature_range))
                .transpose()
        };
        Ok(Self {
            channels: prep.channels.clone(),
            input_scaler: scaler(&prep.input_params)?,
            label_scaler: scaler(&prep.label_params)?,
            fill_value,
        })
    }

    /// Preprocessing of a trained model. Scalers and fill value are taken
    /// from the artifact, the channel selection from the settings.
    pub(crate) fn from_artifact(channels: Option<Vec<usize>>, config: &NetworkConfig) -> Self {
        Self {
            channels,
            input_scaler: config.input_scaler.clone(),
            label_scaler: config.label_scaler.clone(),
            fill_value: config.fill_value,
        }
    }

    fn same_scaling(&self, other: &Preprocessor) -> bool {
        self.input_scaler == other.input_scaler
            && self.label_scaler == other.label_scaler
            && self.fill_value == other.fill_value
    }

    pub(crate) fn apply(&self, sample: GridSample) -> TrainingResult<GridSample> {
        let GridSample { mut input, mut label } = sample;
        if let Some(channels) = &self.channels {
            let available = input.dim().2;
            if let Some(c) = channels.iter().find(|&&c| c >= available) {
                return Err(ConfigError::Invalid(format!(
                    "input channel {c} requested but records hold {available} channels"
                ))
                .into());
            }
            input = input.select(Axis(2), channels);
        }
        fill_or_scale(&mut input, self.input_scaler.as_ref(), self.fill_value, "input")?;
        fill_or_scale(&mut label, self.label_scaler.as_ref(), self.fill_value, "label")?;

        let ratio = resolution_ratio(&input, &label)?;
        if ratio != (1, 1) {
            return Err(ConfigError::Invalid(format!(
                "label grid has {}x{} the input resolution, the UNet predicts at input resolution",
                ratio.0, ratio.1
            ))
            .into());
        }
        Ok(GridSample { input, label })
    }
}

fn fill_or_scale(
    grid: &mut Grid,
    scaler: Option<&Scaler>,
    fill_value: f32,
    field: &str,
) -> TrainingResult<()> {
    match scaler {
        Some(scaler) => {
            let channels = grid.dim().2;
            if scaler.n_channels() != 1 && scaler.n_channels() != channels {
                return Err(ConfigError::Invalid(format!(
                    "{field} scaler has {} channels, records hold {channels}",
                    scaler.n_channels()
                ))
                .into());
            }
            scaler.apply_channels(grid, Some(fill_value))?;
        }
        None => grid.mapv_inplace(|v| if v.is_nan() { fill_value } else { v }),
    }
    Ok(())
}

fn load_source(
    settings: &UNetPipelineSettings,
    preprocessor: &Preprocessor,
) -> TrainingResult<GridBatchSource> {
    let dir = &settings.training_data_path;
    let files = list_data_files(dir, settings.file_limit).map_err(|source| DatasetError::Io {
        path: dir.clone(),
        source,
    })?;
    if files.is_empty() {
        return Err(DatasetError::Empty(dir.clone()).into());
    }
    log::info!("Loading {} data files from {}", files.len(), dir.display());

    let samples = load_grid_records(&files)?
        .into_iter()
        .map(|s| preprocessor.apply(s))
        .collect::<TrainingResult<Vec<_>>>()?;
    if samples.is_empty() {
        return Err(DatasetError::Empty(dir.clone()).into());
    }
    let source = GridBatchSource::new(samples, settings.augmentation.clone())?;

    if source.n_inputs() != settings.input_names.len() {
        return Err(ConfigError::Invalid(format!(
            "{} input channels but {} input names",
            source.n_inputs(),
            settings.input_names.len()
        ))
        .into());
    }
    if source.n_labels() != settings.label_names.len() {
        return Err(ConfigError::Invalid(format!(
            "{} label channels but {} label names",
            source.n_labels(),
            settings.label_names.len()
        ))
        .into());
    }
    Ok(source)
}

pub(crate) fn run(pipeline: PipelineType, settings: &UNetPipelineSettings) -> TrainingResult<RunSummary> {
    let training = &settings.training;
    training.fractions.validate()?;
    if settings.augmentation.fill_value != training.fill_value {
        return Err(ConfigError::Invalid(format!(
            "augmentation fill value {} differs from label fill value {}",
            settings.augmentation.fill_value, training.fill_value
        ))
        .into());
    }

    let configured = Preprocessor::new(&settings.preprocessing, training.fill_value)?;
    let artifact = if training.only_evaluate {
        let config = NetworkConfig::load_from_dir(&training.model_config_path)?;
        config.check_names(&settings.input_names, &settings.label_names)?;
        log::info!("Evaluating model trained at {}", config.trained_at);
        Some(config)
    } else {
        None
    };
    let preprocessor = match &artifact {
        Some(config) => {
            let stored = Preprocessor::from_artifact(settings.preprocessing.channels.clone(), config);
            if !stored.same_scaling(&configured) {
                log::warn!("Scaling of the settings differs from {CONFIG_FILE}, using the stored scaling");
            }
            stored
        }
        None => configured,
    };
    let source = load_source(settings, &preprocessor)?;

    let mut rng = ChaCha8Rng::seed_from_u64(training.seed);
    let split = split_indices(source.len(), &training.fractions, &mut rng)?;
    log::info!(
        "{pipeline}: {} samples, {} train / {} validation / {} test",
        source.len(),
        split.train.len(),
        split.validation.len(),
        split.test.len()
    );

    let device: <InferenceBackend as Backend>::Device = Default::default();
    let (model, history, quantiles) = if let Some(config) = artifact {
        let model = config.load_unet::<InferenceBackend>(&device)?;
        (model, None, config.quantiles)
    } else {
        let unet = UNetConfig {
            n_inputs: source.n_inputs(),
            n_outputs: settings.label_names.len() * training.quantiles.len(),
            n_unet_base: settings.n_unet_base,
            n_features: settings.n_features,
            n_layers: settings.n_layers,
        };
        let model = unet.init::<TrainingBackend>(&device)?;
        let mut trainer = Trainer::new(training.train_config())?;
        let (model, history) = trainer.fit(model, &source, &split.train, &split.validation, &device)?;

        NetworkConfig {
            architecture: ModelArchitecture::Unet(unet),
            quantiles: training.quantiles.clone(),
            model_weights: PathBuf::from(WEIGHTS_FILE),
            input_names: settings.input_names.clone(),
            label_names: settings.label_names.clone(),
            input_scaler: preprocessor.input_scaler.clone(),
            label_scaler: preprocessor.label_scaler.clone(),
            fill_value: preprocessor.fill_value,
            trained_at: String::new(),
        }
        .stamped()
        .save(&training.model_config_path)?;
        (model.valid(), Some(history), training.quantiles.clone())
    };

    let setup = EvaluationSetup {
        quantiles: &quantiles,
        label_names: &settings.label_names,
        label_scaler: preprocessor.label_scaler.as_ref(),
        fill_value: preprocessor.fill_value,
        batch_size: training.batch_size,
    };
    let stats = evaluate::<InferenceBackend, _, _, 4>(&model, &source, &split.test, &setup, &device)?;
    write_stats(&training.model_config_path, &stats)?;

    Ok(RunSummary {
        pipeline,
        output_dir: training.model_config_path.clone(),
        history,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TrainingError;
    use pps_mw_core::{FEATURE_RANGE, LabelGrid};

    fn prep(channels: Option<Vec<usize>>, scaled: bool) -> GridPreprocessing {
        GridPreprocessing {
            channels,
            input_params: scaled.then(|| vec![ParamSpec::linear("a", 0.0, 10.0)]),
            label_params: scaled.then(|| vec![ParamSpec::linear("y", 0.0, 100.0)]),
            feature_range: FEATURE_RANGE,
        }
    }

    #[test]
    fn test_channel_selection_and_fill() {
        let mut input = Grid::zeros((4, 4, 3));
        input[[0, 0, 2]] = f32::NAN;
        input[[1, 1, 1]] = 7.0;
        let mut label = LabelGrid::zeros((4, 4, 1));
        label[[2, 2, 0]] = f32::NAN;

        let p = Preprocessor::new(&prep(Some(vec![2, 1]), false), -1.1).unwrap();
        let out = p.apply(GridSample { input, label }).unwrap();
        assert_eq!(out.input.dim(), (4, 4, 2));
        assert_eq!(out.input[[0, 0, 0]], -1.1);
        assert_eq!(out.input[[1, 1, 1]], 7.0);
        assert_eq!(out.label[[2, 2, 0]], -1.1);
    }

    #[test]
    fn test_missing_channel_rejected() {
        let sample = GridSample {
            input: Grid::zeros((4, 4, 3)),
            label: LabelGrid::zeros((4, 4, 1)),
        };
        let p = Preprocessor::new(&prep(Some(vec![0, 5]), false), -1.1).unwrap();
        assert!(matches!(p.apply(sample), Err(TrainingError::Config(_))));
    }

    #[test]
    fn test_scaling_with_fill() {
        let mut input = Grid::from_elem((4, 4, 1), 5.0);
        input[[3, 3, 0]] = f32::NAN;
        let label = LabelGrid::from_elem((4, 4, 1), 100.0);
        let p = Preprocessor::new(&prep(None, true), -1.1).unwrap();
        let out = p.apply(GridSample { input, label }).unwrap();
        assert!(out.input[[0, 0, 0]].abs() < 1e-6);
        assert_eq!(out.input[[3, 3, 0]], -1.1);
        assert!((out.label[[0, 0, 0]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_upsampled_labels_rejected() {
        let sample = GridSample {
            input: Grid::zeros((4, 4, 1)),
            label: LabelGrid::zeros((8, 8, 1)),
        };
        let p = Preprocessor::new(&prep(None, false), -1.1).unwrap();
        assert!(matches!(p.apply(sample), Err(TrainingError::Config(_))));
    }
}
