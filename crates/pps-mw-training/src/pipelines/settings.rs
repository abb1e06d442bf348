//! Per-pipeline default settings
//!
//! Each pipeline has one constructor returning its compiled defaults. Paths
//! are taken from the environment when the settings are built; the binary
//! then applies command line overrides on top.

use crate::dataset::{GridAugmentation, SplitFractions};
use crate::trainer::{CosineDecayRestarts, TrainConfig};
use pps_mw_core::{Activation, CropMode, FEATURE_RANGE, FlipMode, ParamSpec};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Quantile levels shared by all pipelines
pub const QUANTILES: [f32; 9] = [0.005, 0.025, 0.165, 0.250, 0.500, 0.750, 0.835, 0.975, 0.995];

/// Default RNG seed
pub const DEFAULT_SEED: u64 = 42;

pub const DEFAULT_FRACTIONS: SplitFractions = SplitFractions {
    train: 0.7,
    validation: 0.15,
    test: 0.15,
};

/// Microwave sounder channels used by `pr_nordic`
pub const PR_NORDIC_CHANNELS: [usize; 5] = [14, 15, 16, 17, 18];

fn env_path(name: &str, default: &str) -> PathBuf {
    std::env::var_os(name)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

fn default_schedule() -> CosineDecayRestarts {
    CosineDecayRestarts {
        initial_learning_rate: 1e-4,
        first_decay_steps: 1000,
        t_mul: 2.0,
        m_mul: 1.0,
        alpha: 0.0,
    }
}

/// Settings shared by every pipeline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingSettings {
    pub batch_size: usize,
    pub epochs: usize,
    pub seed: u64,
    pub fractions: SplitFractions,
    pub quantiles: Vec<f32>,
    pub fill_value: f32,
    pub schedule: CosineDecayRestarts,
    /// Directory receiving (or, when only evaluating, holding) the model
    pub model_config_path: PathBuf,
    pub only_evaluate: bool,
}

impl TrainingSettings {
    fn new(batch_size: usize, epochs: usize, fill_value: f32, model_config_path: PathBuf) -> Self {
        Self {
            batch_size,
            epochs,
            seed: DEFAULT_SEED,
            fractions: DEFAULT_FRACTIONS,
            quantiles: QUANTILES.to_vec(),
            fill_value,
            schedule: default_schedule(),
            model_config_path,
            only_evaluate: false,
        }
    }

    pub fn train_config(&self) -> TrainConfig {
        TrainConfig {
            batch_size: self.batch_size,
            epochs: self.epochs,
            seed: self.seed,
            quantiles: self.quantiles.clone(),
            fill_value: self.fill_value,
            schedule: self.schedule.clone(),
            output_dir: self.model_config_path.clone(),
        }
    }
}

/// Preparation of grid records before batching
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridPreprocessing {
    /// Input channels kept from each record, in this order; all when `None`
    pub channels: Option<Vec<usize>>,
    /// Input scaling; `None` for records that are already normalized
    pub input_params: Option<Vec<ParamSpec>>,
    /// Label scaling; `None` keeps labels in physical units
    pub label_params: Option<Vec<ParamSpec>>,
    pub feature_range: (f32, f32),
}

/// Settings of the UNet (grid) pipelines
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UNetPipelineSettings {
    pub training: TrainingSettings,
    /// Directory of `.jsonl` / `.jsonl.gz` record files
    pub training_data_path: PathBuf,
    pub file_limit: Option<usize>,
    pub input_names: Vec<String>,
    pub label_names: Vec<String>,
    pub preprocessing: GridPreprocessing,
    pub augmentation: GridAugmentation,
    pub n_unet_base: usize,
    pub n_features: usize,
    pub n_layers: usize,
}

/// Settings of the per-sample QRNN pipeline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QrnnPipelineSettings {
    pub training: TrainingSettings,
    /// Retrieval database, one JSON object per line
    pub db_file: PathBuf,
    pub input_params: Vec<ParamSpec>,
    pub output_params: Vec<ParamSpec>,
    pub feature_range: (f32, f32),
    pub n_hidden_layers: usize,
    pub n_neurons: usize,
    pub activation: Activation,
    /// Standard deviation of the noise added to brightness temperatures
    pub noise: f32,
    pub missing_fraction: f32,
}

impl QrnnPipelineSettings {
    pub fn input_names(&self) -> Vec<String> {
        self.input_params.iter().map(|p| p.name.clone()).collect()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.output_params.iter().map(|p| p.name.clone()).collect()
    }

    /// Noise level per input column: `noise` for brightness temperature
    /// differences (`DTB*`), zero for surface parameters.
    pub fn noise_levels(&self) -> Vec<f32> {
        self.input_params
            .iter()
            .map(|p| if p.name.starts_with("DTB") { self.noise } else { 0.0 })
            .collect()
    }
}

/// Nordic precipitation: MW sounder grids to radar reflectivity.
pub fn pr_nordic() -> UNetPipelineSettings {
    let fill_value = -1.1;
    UNetPipelineSettings {
        training: TrainingSettings::new(16, 8, fill_value, env_path("MODEL_CONFIG_PR_NORDIC", "/tmp")),
        training_data_path: env_path("TRAINING_DATA_PATH_PR_NORDIC", "/tmp"),
        file_limit: None,
        input_names: PR_NORDIC_CHANNELS.iter().map(|c| format!("channel_{c}")).collect(),
        label_names: vec!["reflectivity".to_string()],
        preprocessing: GridPreprocessing {
            channels: Some(PR_NORDIC_CHANNELS.to_vec()),
            input_params: None,
            label_params: None,
            feature_range: FEATURE_RANGE,
        },
        augmentation: GridAugmentation {
            image_size: 128,
            crop: CropMode::Random,
            flip: FlipMode::Flip,
            missing_fraction: 0.0,
            fill_value,
        },
        n_unet_base: 16,
        n_features: 128,
        n_layers: 4,
    }
}

/// Cloud base height from VGAC imager grids.
pub fn cloud_base() -> UNetPipelineSettings {
    let fill_value = -1.1;
    let input_params = vec![
        ParamSpec::linear("M05", 0.0, 1.2),
        ParamSpec::linear("M07", 0.0, 1.2),
        ParamSpec::linear("M12", 180.0, 330.0),
        ParamSpec::linear("M15", 180.0, 330.0),
        ParamSpec::linear("M16", 180.0, 330.0),
    ];
    let label_params = vec![ParamSpec::linear("cloud_base", 0.0, 12000.0)];
    UNetPipelineSettings {
        training: TrainingSettings::new(16, 8, fill_value, env_path("MODEL_CONFIG_CLOUD_BASE", "/tmp")),
        training_data_path: env_path("TRAINING_DATA_PATH_CLOUD_BASE", "/tmp"),
        file_limit: None,
        input_names: input_params.iter().map(|p| p.name.clone()).collect(),
        label_names: label_params.iter().map(|p| p.name.clone()).collect(),
        preprocessing: GridPreprocessing {
            channels: None,
            input_params: Some(input_params),
            label_params: Some(label_params),
            feature_range: FEATURE_RANGE,
        },
        augmentation: GridAugmentation {
            image_size: 64,
            crop: CropMode::SwathCentered,
            flip: FlipMode::RotateAndFlip,
            missing_fraction: 0.0,
            fill_value,
        },
        n_unet_base: 16,
        n_features: 128,
        n_layers: 4,
    }
}

/// Ice water path and related quantities from ICI brightness temperatures.
pub fn iwp_ici() -> QrnnPipelineSettings {
    let dtb = |channel: &str, min: f32, max: f32| {
        ParamSpec::linear(format!("DTB_ICI_DB_ICI_{channel}"), min, max)
    };
    QrnnPipelineSettings {
        training: TrainingSettings::new(4096, 256, -2.0, env_path("MODEL_CONFIG_IWP_ICI", "/tmp")),
        db_file: env_path("ICI_RETRIEVAL_DB_FILE", "/tmp/ici_retrieval_database.jsonl"),
        input_params: vec![
            dtb("01V", -170.0, 30.0),
            dtb("02V", -155.0, 35.0),
            dtb("03V", -145.0, 35.0),
            dtb("04V", -195.0, 40.0),
            dtb("04H", -195.0, 50.0),
            dtb("05V", -185.0, 30.0),
            dtb("06V", -180.0, 30.0),
            dtb("07V", -165.0, 35.0),
            dtb("08V", -165.0, 35.0),
            dtb("09V", -155.0, 35.0),
            dtb("10V", -135.0, 25.0),
            dtb("11V", -160.0, 30.0),
            dtb("11H", -160.0, 30.0),
            ParamSpec::linear("SurfType", 0.0, 4.0),
            ParamSpec::linear("SurfPres", 50000.0, 106000.0),
            ParamSpec::linear("SurfTemp", 210.0, 320.0),
            ParamSpec::linear("SurfWind", 0.0, 35.0),
        ],
        output_params: vec![
            ParamSpec::log("TCWV", 0.0, 80.0),
            ParamSpec::log("LWP", 0.0, 2.0),
            ParamSpec::log("RWP", 0.0, 4.0),
            ParamSpec::log("IWP", 0.0, 35.0),
            ParamSpec::linear("Zmean", 0.0, 19000.0),
            ParamSpec::linear("Dmean", 0.0, 0.0017),
        ],
        feature_range: FEATURE_RANGE,
        n_hidden_layers: 4,
        n_neurons: 128,
        activation: Activation::Relu,
        noise: 1.0,
        missing_fraction: 0.1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        for settings in [pr_nordic(), cloud_base()] {
            settings.training.fractions.validate().unwrap();
            assert_eq!(settings.input_names.len(), 5);
            assert_eq!(settings.augmentation.image_size % 16, 0);
            assert_eq!(settings.augmentation.fill_value, settings.training.fill_value);
        }
        let ici = iwp_ici();
        ici.training.fractions.validate().unwrap();
        assert_eq!(ici.input_names().len(), 17);
        assert_eq!(ici.output_names(), vec!["TCWV", "LWP", "RWP", "IWP", "Zmean", "Dmean"]);
        assert_eq!(ici.training.quantiles.len() / 2, 4);
        assert_eq!(ici.training.quantiles[4], 0.5);
    }

    #[test]
    fn test_noise_only_on_brightness_temperatures() {
        let noise = iwp_ici().noise_levels();
        assert_eq!(noise.len(), 17);
        assert!(noise[..13].iter().all(|n| *n == 1.0));
        assert!(noise[13..].iter().all(|n| *n == 0.0));
    }

    #[test]
    fn test_train_config() {
        let settings = pr_nordic();
        let config = settings.training.train_config();
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.epochs, 8);
        assert_eq!(config.output_dir, settings.training.model_config_path);
        assert_eq!(config.schedule.first_decay_steps, 1000);
    }
}
