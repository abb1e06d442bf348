//! Persisted model artifact
//!
//! `network_config.json` records the architecture, the quantile levels, the
//! scalers applied to inputs and labels and the location of the trained
//! weights, so that a model can be rebuilt for evaluation or inference.

use crate::common::io::{open_reader, write_json};
use crate::error::ArtifactError;
use crate::trainer::load_weights;
use burn::tensor::backend::Backend;
use pps_mw_core::{Qrnn, QrnnConfig, Scaler, UNet, UNetConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Model config file written to the output directory
pub const CONFIG_FILE: &str = "network_config.json";

/// Network architecture and its hyperparameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model_type", rename_all = "snake_case")]
pub enum ModelArchitecture {
    Unet(UNetConfig),
    Qrnn(QrnnConfig),
}

impl ModelArchitecture {
    pub fn name(&self) -> &'static str {
        match self {
            ModelArchitecture::Unet(_) => "unet",
            ModelArchitecture::Qrnn(_) => "qrnn",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(flatten)]
    pub architecture: ModelArchitecture,
    pub quantiles: Vec<f32>,
    /// Relative paths are resolved against the directory of the config file
    pub model_weights: PathBuf,
    pub input_names: Vec<String>,
    pub label_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_scaler: Option<Scaler>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_scaler: Option<Scaler>,
    pub fill_value: f32,
    /// RFC 3339 time stamp of the training run
    #[serde(default)]
    pub trained_at: String,
}

impl NetworkConfig {
    /// Writes `<dir>/network_config.json` and returns its path.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, ArtifactError> {
        std::fs::create_dir_all(dir).map_err(|source| ArtifactError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(CONFIG_FILE);
        write_json(&path, self).map_err(|source| ArtifactError::Io {
            path: path.clone(),
            source,
        })?;
        log::info!("Wrote model config {}", path.display());
        Ok(path)
    }

    /// Reads a config written by [`NetworkConfig::save`]. Relative weight
    /// paths are made absolute with respect to the config location.
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let reader = open_reader(path).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: NetworkConfig =
            serde_json::from_reader(reader).map_err(|source| ArtifactError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        if config.model_weights.is_relative() {
            if let Some(dir) = path.parent() {
                config.model_weights = dir.join(&config.model_weights);
            }
        }
        Ok(config)
    }

    /// Loads `<dir>/network_config.json`.
    pub fn load_from_dir(dir: &Path) -> Result<Self, ArtifactError> {
        Self::load(&dir.join(CONFIG_FILE))
    }

    /// Stamps the config with the current UTC time.
    pub fn stamped(mut self) -> Self {
        self.trained_at = chrono::Utc::now().to_rfc3339();
        self
    }

    /// Rebuilds the UNet and loads its trained weights.
    pub fn load_unet<B: Backend>(&self, device: &B::Device) -> Result<UNet<B>, ArtifactError> {
        let ModelArchitecture::Unet(config) = &self.architecture else {
            return Err(ArtifactError::ModelType {
                expected: "unet",
                found: self.architecture.name(),
            });
        };
        let model = config.init::<B>(device)?;
        load_weights(model, &self.model_weights, device)
    }

    /// Rebuilds the QRNN and loads its trained weights.
    pub fn load_qrnn<B: Backend>(&self, device: &B::Device) -> Result<Qrnn<B>, ArtifactError> {
        let ModelArchitecture::Qrnn(config) = &self.architecture else {
            return Err(ArtifactError::ModelType {
                expected: "qrnn",
                found: self.architecture.name(),
            });
        };
        let model = config.init::<B>(device)?;
        load_weights(model, &self.model_weights, device)
    }

    /// Fails unless the model was trained on the given inputs and labels.
    pub fn check_names(&self, input_names: &[String], label_names: &[String]) -> Result<(), ArtifactError> {
        for (field, stored, configured) in [
            ("inputs", &self.input_names, input_names),
            ("labels", &self.label_names, label_names),
        ] {
            if stored.as_slice() != configured {
                return Err(ArtifactError::NameMismatch {
                    field,
                    stored: stored.clone(),
                    configured: configured.to_vec(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InferenceBackend;
    use crate::trainer::save_weights;
    use pps_mw_core::{Activation, ModelError, ParamSpec};

    fn qrnn_config(weights: PathBuf) -> NetworkConfig {
        NetworkConfig {
            architecture: ModelArchitecture::Qrnn(QrnnConfig {
                n_inputs: 2,
                n_outputs: 3,
                n_hidden_layers: 1,
                n_neurons: 4,
                activation: Activation::LeakyRelu,
            }),
            quantiles: vec![0.1, 0.5, 0.9],
            model_weights: weights,
            input_names: vec!["a".into(), "b".into()],
            label_names: vec!["y".into()],
            input_scaler: Some(
                Scaler::from_params(
                    &[ParamSpec::linear("a", 0.0, 1.0), ParamSpec::log("b", 0.0, 10.0)],
                    (-1.0, 1.0),
                )
                .unwrap(),
            ),
            label_scaler: None,
            fill_value: -2.0,
            trained_at: String::new(),
        }
        .stamped()
    }

    #[test]
    fn test_json_layout() {
        let config = qrnn_config(PathBuf::from("weights.mpk"));
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["model_type"], "qrnn");
        assert_eq!(value["n_neurons"], 4);
        assert_eq!(value["activation"], "leaky_relu");
        assert_eq!(value["model_weights"], "weights.mpk");
        assert!(value.get("label_scaler").is_none());
        assert!(!config.trained_at.is_empty());
    }

    #[test]
    fn test_save_load_and_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let config = qrnn_config(PathBuf::from(crate::trainer::WEIGHTS_FILE));
        let ModelArchitecture::Qrnn(qrnn) = &config.architecture else {
            unreachable!()
        };
        let model = qrnn.init::<InferenceBackend>(&device).unwrap();
        save_weights(&model, &dir.path().join(crate::trainer::WEIGHTS_FILE)).unwrap();
        config.save(dir.path()).unwrap();

        let loaded = NetworkConfig::load_from_dir(dir.path()).unwrap();
        assert_eq!(loaded.architecture, config.architecture);
        assert_eq!(loaded.input_scaler, config.input_scaler);
        assert_eq!(loaded.model_weights, dir.path().join(crate::trainer::WEIGHTS_FILE));
        assert!(loaded.load_qrnn::<InferenceBackend>(&device).is_ok());
        assert!(matches!(
            loaded.load_unet::<InferenceBackend>(&device),
            Err(ArtifactError::ModelType {
                expected: "unet",
                found: "qrnn"
            })
        ));
    }

    #[test]
    fn test_missing_weights() {
        let dir = tempfile::tempdir().unwrap();
        let config = qrnn_config(dir.path().join("absent.mpk"));
        assert!(matches!(
            config.load_qrnn::<InferenceBackend>(&Default::default()),
            Err(ArtifactError::MissingWeights(_))
        ));
    }

    #[test]
    fn test_invalid_hyperparameters() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = qrnn_config(dir.path().join("absent.mpk"));
        if let ModelArchitecture::Qrnn(qrnn) = &mut config.architecture {
            qrnn.n_inputs = 0;
        }
        assert!(matches!(
            config.load_qrnn::<InferenceBackend>(&Default::default()),
            Err(ArtifactError::Model(ModelError::InvalidHyperparameter(_)))
        ));
    }

    #[test]
    fn test_check_names() {
        let config = qrnn_config(PathBuf::from("weights.mpk"));
        let inputs = vec!["a".to_string(), "b".to_string()];
        assert!(config.check_names(&inputs, &["y".to_string()]).is_ok());
        match config.check_names(&inputs, &["z".to_string()]) {
            Err(ArtifactError::NameMismatch { field, stored, configured }) => {
                assert_eq!(field, "labels");
                assert_eq!(stored, vec!["y"]);
                assert_eq!(configured, vec!["z"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_malformed_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{\"model_type\": \"unet\"}").unwrap();
        assert!(matches!(
            NetworkConfig::load_from_dir(dir.path()),
            Err(ArtifactError::Json { .. })
        ));
        let empty = tempfile::tempdir().unwrap();
        assert!(matches!(
            NetworkConfig::load_from_dir(empty.path()),
            Err(ArtifactError::Io { .. })
        ));
    }
}
