//! Cloud base height pipeline
//!
//! Trains a UNet on VGAC imager grids in physical units. Inputs and labels
//! are scaled with the parameter ranges of the settings; crops stay centred
//! on the swath across track and are randomly rotated and flipped.

use super::settings::UNetPipelineSettings;
use super::{PipelineType, RunSummary, grid};
use crate::error::TrainingResult;

pub fn run(settings: &UNetPipelineSettings) -> TrainingResult<RunSummary> {
    grid::run(PipelineType::CloudBase, settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::NetworkConfig;
    use crate::dataset::{GridRecord, SplitFractions};
    use crate::pipelines::settings;
    use pps_mw_core::ParamSpec;
    use std::path::Path;

    const HEIGHT: usize = 16;
    const WIDTH: usize = 24;

    fn write_records(path: &Path, n: usize) {
        let lines: Vec<String> = (0..n)
            .map(|i| {
                let input = (0..HEIGHT * WIDTH * 5)
                    .map(|j| {
                        let value = match j % 5 {
                            0 | 1 => (j % 10) as f32 / 10.0,
                            _ => 200.0 + (j % 100) as f32,
                        };
                        Some(value)
                    })
                    .collect();
                let label = (0..HEIGHT * WIDTH)
                    .map(|j| if (i + j) % 4 == 0 { None } else { Some(((i + j) % 12) as f32 * 1000.0) })
                    .collect();
                let record = GridRecord {
                    input_shape: [HEIGHT, WIDTH, 5],
                    input,
                    label_shape: [HEIGHT, WIDTH, 1],
                    label,
                };
                serde_json::to_string(&record).unwrap()
            })
            .collect();
        std::fs::write(path, lines.join("\n")).unwrap();
    }

    #[test]
    fn test_train_with_file_limit() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_records(&data.path().join("a.jsonl"), 2);
        // skipped by the file limit; malformed on purpose
        std::fs::write(data.path().join("b.jsonl"), "not json").unwrap();

        let mut s = settings::cloud_base();
        s.training_data_path = data.path().to_path_buf();
        s.file_limit = Some(1);
        s.training.model_config_path = out.path().to_path_buf();
        s.training.batch_size = 1;
        s.training.epochs = 1;
        s.training.quantiles = vec![0.25, 0.5, 0.75];
        s.training.fractions = SplitFractions {
            train: 0.5,
            validation: 0.0,
            test: 0.5,
        };
        s.augmentation.image_size = 16;
        s.n_unet_base = 2;
        s.n_features = 4;
        s.n_layers = 1;

        let summary = run(&s).unwrap();
        let history = summary.history.unwrap();
        assert_eq!(history.loss.len(), 1);
        assert!(history.val_loss.is_empty());
        assert!(summary.stats["cloud_base"].n_valid > 0);

        let config = NetworkConfig::load_from_dir(out.path()).unwrap();
        assert_eq!(config.input_names, vec!["M05", "M07", "M12", "M15", "M16"]);
        assert_eq!(config.label_scaler.unwrap().n_channels(), 1);
        assert_eq!(config.input_scaler.unwrap().n_channels(), 5);

        // the stored scaling wins over edited settings
        s.training.only_evaluate = true;
        s.preprocessing.label_params = Some(vec![ParamSpec::linear("cloud_base", 0.0, 120000.0)]);
        let evaluated = run(&s).unwrap();
        let (trained, stored) = (&summary.stats["cloud_base"], &evaluated.stats["cloud_base"]);
        assert_eq!(stored.n_valid, trained.n_valid);
        let rmse = trained.rmse.unwrap();
        assert!((stored.rmse.unwrap() - rmse).abs() <= 1e-3 * rmse.max(1.0));

        s.input_names[0] = "M06".to_string();
        assert!(matches!(
            run(&s),
            Err(crate::TrainingError::Artifact(crate::ArtifactError::NameMismatch { field: "inputs", .. }))
        ));

        s.training.only_evaluate = false;
        s.file_limit = None;
        assert!(matches!(
            run(&s),
            Err(crate::TrainingError::Dataset(crate::DatasetError::Parse { line: 1, .. }))
        ));
    }
}
