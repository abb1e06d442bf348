//! Ice water path pipeline
//!
//! Trains a fully connected QRNN on the ICI retrieval database. Brightness
//! temperature differences receive Gaussian noise in physical units before
//! scaling, and a fraction of the scaled inputs is replaced by the fill
//! value so the network learns to handle missing channels.

use super::settings::QrnnPipelineSettings;
use super::{PipelineType, RunSummary};
use crate::artifact::{CONFIG_FILE, ModelArchitecture, NetworkConfig};
use crate::dataset::{BatchSource, ProfileBatchSource, load_profile_table, split_indices};
use crate::error::{ArtifactError, TrainingResult};
use crate::evaluation::{EvaluationSetup, evaluate, write_stats};
use crate::trainer::{Trainer, WEIGHTS_FILE};
use crate::{InferenceBackend, TrainingBackend};
use burn::module::AutodiffModule;
use burn::tensor::backend::Backend;
use pps_mw_core::{QrnnConfig, Scaler};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;

pub fn run(settings: &QrnnPipelineSettings) -> TrainingResult<RunSummary> {
    let training = &settings.training;
    training.fractions.validate()?;
    let input_names = settings.input_names();
    let label_names = settings.output_names();

    let artifact = if training.only_evaluate {
        let config = NetworkConfig::load_from_dir(&training.model_config_path)?;
        config.check_names(&input_names, &label_names)?;
        log::info!("Evaluating model trained at {}", config.trained_at);
        Some(config)
    } else {
        None
    };

    log::info!("Loading retrieval database {}", settings.db_file.display());
    let table = load_profile_table(&settings.db_file, &input_names, &label_names)?;
    let mut input_scaler = Scaler::from_params(&settings.input_params, settings.feature_range)?;
    let mut label_scaler = Scaler::from_params(&settings.output_params, settings.feature_range)?;
    let mut fill_value = training.fill_value;
    if let Some(config) = &artifact {
        let stored_input = config.input_scaler.clone().ok_or(ArtifactError::MissingScaler("input"))?;
        let stored_label = config.label_scaler.clone().ok_or(ArtifactError::MissingScaler("label"))?;
        if stored_input != input_scaler || stored_label != label_scaler || config.fill_value != fill_value {
            log::warn!("Scaling of the settings differs from {CONFIG_FILE}, using the stored scaling");
        }
        input_scaler = stored_input;
        label_scaler = stored_label;
        fill_value = config.fill_value;
    }
    let mut label = table.label;
    label_scaler.apply_channels(&mut label, Some(fill_value))?;
    let source = ProfileBatchSource::new(
        table.input,
        label,
        input_scaler.clone(),
        &settings.noise_levels(),
        settings.missing_fraction,
        fill_value,
    )?;

    let mut rng = ChaCha8Rng::seed_from_u64(training.seed);
    let split = split_indices(source.len(), &training.fractions, &mut rng)?;
    log::info!(
        "{}: {} samples, {} train / {} validation / {} test",
        PipelineType::IwpIci,
        source.len(),
        split.train.len(),
        split.validation.len(),
        split.test.len()
    );

    let device: <InferenceBackend as Backend>::Device = Default::default();
    let (model, history, quantiles) = if let Some(config) = artifact {
        let model = config.load_qrnn::<InferenceBackend>(&device)?;
        (model, None, config.quantiles)
    } else {
        let qrnn = QrnnConfig {
            n_inputs: source.n_inputs(),
            n_outputs: source.n_labels() * training.quantiles.len(),
            n_hidden_layers: settings.n_hidden_layers,
            n_neurons: settings.n_neurons,
            activation: settings.activation,
        };
        let model = qrnn.init::<TrainingBackend>(&device)?;
        let mut trainer = Trainer::new(training.train_config())?;
        let (model, history) = trainer.fit(model, &source, &split.train, &split.validation, &device)?;

        NetworkConfig {
            architecture: ModelArchitecture::Qrnn(qrnn),
            quantiles: training.quantiles.clone(),
            model_weights: PathBuf::from(WEIGHTS_FILE),
            input_names,
            label_names: label_names.clone(),
            input_scaler: Some(input_scaler),
            label_scaler: Some(label_scaler.clone()),
            fill_value,
            trained_at: String::new(),
        }
        .stamped()
        .save(&training.model_config_path)?;
        (model.valid(), Some(history), training.quantiles.clone())
    };

    let setup = EvaluationSetup {
        quantiles: &quantiles,
        label_names: &label_names,
        label_scaler: Some(&label_scaler),
        fill_value,
        batch_size: training.batch_size,
    };
    let stats = evaluate::<InferenceBackend, _, _, 2>(&model, &source, &split.test, &setup, &device)?;
    write_stats(&training.model_config_path, &stats)?;

    Ok(RunSummary {
        pipeline: PipelineType::IwpIci,
        output_dir: training.model_config_path.clone(),
        history,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::SplitFractions;
    use crate::evaluation::STATS_FILE;
    use crate::pipelines::settings;
    use crate::{DatasetError, TrainingError};
    use std::path::Path;

    fn write_database(path: &Path, settings: &QrnnPipelineSettings, rows: usize, skip: Option<&str>) {
        let mut lines = Vec::new();
        for i in 0..rows {
            let mut object = serde_json::Map::new();
            for (k, p) in settings.input_params.iter().chain(&settings.output_params).enumerate() {
                if Some(p.name.as_str()) == skip {
                    continue;
                }
                let t = ((i * 7 + k * 3) % 10) as f32 / 10.0;
                let value = if i == 3 && k == 0 {
                    serde_json::Value::Null
                } else {
                    serde_json::json!(p.min + t * (p.max - p.min))
                };
                object.insert(p.name.clone(), value);
            }
            lines.push(serde_json::Value::Object(object).to_string());
        }
        std::fs::write(path, lines.join("\n")).unwrap();
    }

    fn small_settings(db: &Path, out: &Path) -> QrnnPipelineSettings {
        let mut s = settings::iwp_ici();
        s.db_file = db.to_path_buf();
        s.training.model_config_path = out.to_path_buf();
        s.training.batch_size = 8;
        s.training.epochs = 2;
        s.training.fractions = SplitFractions {
            train: 0.6,
            validation: 0.2,
            test: 0.2,
        };
        s.n_hidden_layers = 2;
        s.n_neurons = 8;
        s
    }

    #[test]
    fn test_train_then_evaluate() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let db = dir.path().join("db.jsonl");
        let mut s = small_settings(&db, out.path());
        write_database(&db, &s, 40, None);

        let summary = run(&s).unwrap();
        let history = summary.history.unwrap();
        assert_eq!(history.loss.len(), 2);
        assert_eq!(history.val_loss.len(), 2);
        assert_eq!(
            summary.stats.keys().collect::<Vec<_>>(),
            vec!["Dmean", "IWP", "LWP", "RWP", "TCWV", "Zmean"]
        );
        assert!(summary.stats.values().all(|s| s.n_valid == 8));
        assert!(out.path().join(STATS_FILE).exists());

        s.training.only_evaluate = true;
        let evaluated = run(&s).unwrap();
        assert!(evaluated.history.is_none());
        assert_eq!(evaluated.stats["IWP"].n_valid, 8);
        assert!((evaluated.stats["IWP"].rmse.unwrap() - summary.stats["IWP"].rmse.unwrap()).abs() < 1e-4);

        // edited ranges do not change the scaling of a trained model
        for p in s.input_params.iter_mut().chain(s.output_params.iter_mut()) {
            p.max *= 10.0;
        }
        let rescaled = run(&s).unwrap();
        for (name, trained) in &summary.stats {
            let stats = &rescaled.stats[name];
            assert_eq!(stats.n_valid, trained.n_valid);
            let rmse = trained.rmse.unwrap();
            assert!((stats.rmse.unwrap() - rmse).abs() <= 1e-3 * rmse.max(1e-3), "{name}");
        }
    }

    #[test]
    fn test_missing_parameter() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let db = dir.path().join("db.jsonl");
        let s = small_settings(&db, out.path());
        write_database(&db, &s, 5, Some("SurfWind"));
        match run(&s) {
            Err(TrainingError::Dataset(DatasetError::MissingParameter { name, line, .. })) => {
                assert_eq!((name.as_str(), line), ("SurfWind", 1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_only_evaluate_without_model() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let db = dir.path().join("db.jsonl");
        let mut s = small_settings(&db, out.path());
        write_database(&db, &s, 10, None);
        s.training.only_evaluate = true;
        assert!(matches!(run(&s), Err(TrainingError::Artifact(_))));
    }
}
