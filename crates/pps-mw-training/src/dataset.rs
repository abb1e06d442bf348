//! Training datasets
//!
//! Loads the line-oriented JSON training records, splits them into
//! train / validation / test subsets and assembles (optionally augmented)
//! host batches that are handed to the network as tensors.

use crate::common::io::open_reader;
use crate::error::{ConfigError, DatasetError, TrainingError, TrainingResult};
use burn::tensor::{Tensor, TensorData, backend::Backend};
use ndarray::{Array2, Axis};
use pps_mw_core::augmentation::{augment, center_crop, set_missing_data, set_missing_values};
use pps_mw_core::grid::{grid_from_vec, stack_nchw};
use pps_mw_core::{CropMode, FlipMode, Grid, LabelGrid, Scaler};
use rand::Rng;
use rand::seq::SliceRandom;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::path::{Path, PathBuf};

/// One line of a gridded training data file.
///
/// Data are flattened row-major `H x W x C`; `null` entries mark missing
/// values and load as NaN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridRecord {
    pub input_shape: [usize; 3],
    pub input: Vec<Option<f32>>,
    pub label_shape: [usize; 3],
    pub label: Vec<Option<f32>>,
}

/// Paired observation and label grid
#[derive(Debug, Clone, PartialEq)]
pub struct GridSample {
    pub input: Grid,
    pub label: LabelGrid,
}

fn to_grid(
    path: &Path,
    line: usize,
    field: &'static str,
    shape: [usize; 3],
    values: Vec<Option<f32>>,
) -> Result<Grid, DatasetError> {
    let expected = shape.iter().product::<usize>();
    if values.len() != expected {
        return Err(DatasetError::ShapeMismatch {
            path: path.to_path_buf(),
            line,
            field,
            shape,
            expected,
            actual: values.len(),
        });
    }
    let data = values.into_iter().map(|v| v.unwrap_or(f32::NAN)).collect();
    grid_from_vec(shape, data).map_err(|e| DatasetError::Parse {
        path: path.to_path_buf(),
        line,
        message: e.to_string(),
    })
}

fn read_lines(path: &Path) -> Result<impl Iterator<Item = (usize, std::io::Result<String>)>, DatasetError> {
    let reader = open_reader(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(reader.lines().enumerate().map(|(i, l)| (i + 1, l)))
}

/// Loads every record of the given files, in order.
pub fn load_grid_records(files: &[PathBuf]) -> Result<Vec<GridSample>, DatasetError> {
    let mut samples = Vec::new();
    for path in files {
        let before = samples.len();
        for (line_no, line) in read_lines(path)? {
            let line = line.map_err(|source| DatasetError::Io {
                path: path.clone(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let record: GridRecord =
                serde_json::from_str(&line).map_err(|e| DatasetError::Parse {
                    path: path.clone(),
                    line: line_no,
                    message: e.to_string(),
                })?;
            samples.push(GridSample {
                input: to_grid(path, line_no, "input", record.input_shape, record.input)?,
                label: to_grid(path, line_no, "label", record.label_shape, record.label)?,
            });
        }
        log::debug!("{}: {} records", path.display(), samples.len() - before);
    }
    Ok(samples)
}

/// Per-sample inputs and labels of the retrieval database, one row per
/// sample and one column per parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileTable {
    pub input: Array2<f32>,
    pub label: Array2<f32>,
}

fn lookup(
    object: &serde_json::Map<String, serde_json::Value>,
    name: &str,
    path: &Path,
    line: usize,
) -> Result<f32, DatasetError> {
    match object.get(name) {
        None => Err(DatasetError::MissingParameter {
            path: path.to_path_buf(),
            line,
            name: name.to_string(),
        }),
        Some(serde_json::Value::Null) => Ok(f32::NAN),
        Some(value) => value.as_f64().map(|v| v as f32).ok_or_else(|| DatasetError::Parse {
            path: path.to_path_buf(),
            line,
            message: format!("parameter {name} is not a number: {value}"),
        }),
    }
}

/// Loads the named input and label parameters from a database file with one
/// flat JSON object per line.
pub fn load_profile_table(
    path: &Path,
    input_names: &[String],
    label_names: &[String],
) -> Result<ProfileTable, DatasetError> {
    let mut input = Vec::new();
    let mut label = Vec::new();
    let mut rows = 0;
    for (line_no, line) in read_lines(path)? {
        let line = line.map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&line)
            .map_err(|e| DatasetError::Parse {
                path: path.to_path_buf(),
                line: line_no,
                message: e.to_string(),
            })?;
        for name in input_names {
            input.push(lookup(&object, name, path, line_no)?);
        }
        for name in label_names {
            label.push(lookup(&object, name, path, line_no)?);
        }
        rows += 1;
    }
    if rows == 0 {
        return Err(DatasetError::Empty(path.to_path_buf()));
    }
    let shape_err = |e: ndarray::ShapeError| DatasetError::Inconsistent(e.to_string());
    Ok(ProfileTable {
        input: Array2::from_shape_vec((rows, input_names.len()), input).map_err(shape_err)?,
        label: Array2::from_shape_vec((rows, label_names.len()), label).map_err(shape_err)?,
    })
}

/// Fractions of the dataset used for training, validation and testing
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitFractions {
    pub train: f32,
    pub validation: f32,
    pub test: f32,
}

impl SplitFractions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("train", self.train),
            ("validation", self.validation),
            ("test", self.test),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidFraction { name, value });
            }
        }
        let sum = self.train + self.validation + self.test;
        if sum > 1.0 + 1e-6 {
            return Err(ConfigError::FractionSum(sum));
        }
        Ok(())
    }
}

/// Sample indices of each subset
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Split {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
    pub test: Vec<usize>,
}

fn subset_len(n: usize, fraction: f32, remaining: usize) -> usize {
    let len = (n as f64 * f64::from(fraction) * (1.0 + 1e-6)).floor() as usize;
    len.min(remaining)
}

/// Shuffles `0..n` and cuts it into contiguous train / validation / test
/// ranges.
pub fn split_indices<R: Rng + ?Sized>(
    n: usize,
    fractions: &SplitFractions,
    rng: &mut R,
) -> Result<Split, ConfigError> {
    fractions.validate()?;
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);

    let n_train = subset_len(n, fractions.train, n);
    let n_validation = subset_len(n, fractions.validation, n - n_train);
    let n_test = subset_len(n, fractions.test, n - n_train - n_validation);

    let mut rest = indices.into_iter();
    let train = rest.by_ref().take(n_train).collect();
    let validation = rest.by_ref().take(n_validation).collect();
    let test = rest.take(n_test).collect();
    Ok(Split {
        train,
        validation,
        test,
    })
}

/// Flattened batch in `[batch, channel, ...]` order, ready for upload
#[derive(Debug, Clone, PartialEq)]
pub struct HostBatch<const D: usize> {
    pub input: Vec<f32>,
    pub input_shape: [usize; D],
    pub label: Vec<f32>,
    pub label_shape: [usize; D],
}

impl<const D: usize> HostBatch<D> {
    pub fn len(&self) -> usize {
        self.input_shape[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_tensors<B: Backend>(self, device: &B::Device) -> (Tensor<B, D>, Tensor<B, D>) {
        let input = Tensor::from_data(TensorData::new(self.input, self.input_shape), device);
        let label = Tensor::from_data(TensorData::new(self.label, self.label_shape), device);
        (input, label)
    }
}

/// Indexed collection of samples that can be assembled into batches.
pub trait BatchSource<const D: usize> {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Builds the batch of the given sample indices. Training and validation
    /// batches are augmented; evaluation batches are not.
    fn batch<R: Rng + ?Sized>(
        &self,
        indices: &[usize],
        augmented: bool,
        rng: &mut R,
    ) -> TrainingResult<HostBatch<D>>;
}

/// Augmentation applied to gridded training batches
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridAugmentation {
    /// Edge length of the square input crop
    pub image_size: usize,
    pub crop: CropMode,
    pub flip: FlipMode,
    /// Probability of blanking an input pixel across all channels
    pub missing_fraction: f32,
    pub fill_value: f32,
}

/// Batches of cropped, flipped and optionally masked grid samples
pub struct GridBatchSource {
    samples: Vec<GridSample>,
    augmentation: GridAugmentation,
}

impl GridBatchSource {
    pub fn new(samples: Vec<GridSample>, augmentation: GridAugmentation) -> Result<Self, DatasetError> {
        if let Some(first) = samples.first() {
            let channels = (first.input.dim().2, first.label.dim().2);
            if let Some(odd) = samples
                .iter()
                .position(|s| (s.input.dim().2, s.label.dim().2) != channels)
            {
                return Err(DatasetError::Inconsistent(format!(
                    "sample {odd} has {} input / {} label channels, expected {} / {}",
                    samples[odd].input.dim().2,
                    samples[odd].label.dim().2,
                    channels.0,
                    channels.1
                )));
            }
        }
        Ok(Self {
            samples,
            augmentation,
        })
    }

    pub fn samples(&self) -> &[GridSample] {
        &self.samples
    }

    pub fn n_inputs(&self) -> usize {
        self.samples.first().map_or(0, |s| s.input.dim().2)
    }

    pub fn n_labels(&self) -> usize {
        self.samples.first().map_or(0, |s| s.label.dim().2)
    }

    pub fn augmentation(&self) -> &GridAugmentation {
        &self.augmentation
    }
}

impl BatchSource<4> for GridBatchSource {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn batch<R: Rng + ?Sized>(
        &self,
        indices: &[usize],
        augmented: bool,
        rng: &mut R,
    ) -> TrainingResult<HostBatch<4>> {
        let aug = &self.augmentation;
        let mut inputs = Vec::with_capacity(indices.len());
        let mut labels = Vec::with_capacity(indices.len());
        for &idx in indices {
            let sample = &self.samples[idx];
            let (mut x, y) = if augmented {
                augment(&sample.input, &sample.label, aug.image_size, aug.crop, aug.flip, rng)?
            } else {
                center_crop(&sample.input, &sample.label, aug.image_size)?
            };
            if augmented && aug.missing_fraction > 0.0 {
                set_missing_data(&mut x, aug.missing_fraction, aug.fill_value, rng)?;
            }
            inputs.push(x);
            labels.push(y);
        }
        let inconsistent = || {
            TrainingError::from(DatasetError::Inconsistent(
                "samples of one batch differ in grid size".to_string(),
            ))
        };
        let (input, input_shape) = stack_nchw(&inputs).ok_or_else(inconsistent)?;
        let (label, label_shape) = stack_nchw(&labels).ok_or_else(inconsistent)?;
        Ok(HostBatch {
            input,
            input_shape,
            label,
            label_shape,
        })
    }
}

/// Batches of database rows with measurement noise and missing-value
/// augmentation.
///
/// Inputs are kept in physical units so that noise is added before scaling;
/// labels are stored already scaled.
pub struct ProfileBatchSource {
    input: Array2<f32>,
    label: Array2<f32>,
    input_scaler: Scaler,
    noise: Vec<Option<Normal<f32>>>,
    missing_fraction: f32,
    fill_value: f32,
}

impl ProfileBatchSource {
    /// `noise` holds the standard deviation per input column (0 for none).
    pub fn new(
        input: Array2<f32>,
        scaled_label: Array2<f32>,
        input_scaler: Scaler,
        noise: &[f32],
        missing_fraction: f32,
        fill_value: f32,
    ) -> Result<Self, ConfigError> {
        if input.nrows() != scaled_label.nrows() {
            return Err(ConfigError::Invalid(format!(
                "{} input rows but {} label rows",
                input.nrows(),
                scaled_label.nrows()
            )));
        }
        if noise.len() != input.ncols() {
            return Err(ConfigError::Invalid(format!(
                "{} noise levels for {} input columns",
                noise.len(),
                input.ncols()
            )));
        }
        if !(0.0..=1.0).contains(&missing_fraction) {
            return Err(ConfigError::InvalidFraction {
                name: "missing",
                value: missing_fraction,
            });
        }
        let noise = noise
            .iter()
            .map(|&sigma| {
                if sigma > 0.0 {
                    Normal::new(0.0, sigma)
                        .map(Some)
                        .map_err(|e| ConfigError::Invalid(format!("noise {sigma}: {e}")))
                } else {
                    Ok(None)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            input,
            label: scaled_label,
            input_scaler,
            noise,
            missing_fraction,
            fill_value,
        })
    }

    pub fn n_inputs(&self) -> usize {
        self.input.ncols()
    }

    pub fn n_labels(&self) -> usize {
        self.label.ncols()
    }
}

impl BatchSource<2> for ProfileBatchSource {
    fn len(&self) -> usize {
        self.input.nrows()
    }

    fn batch<R: Rng + ?Sized>(
        &self,
        indices: &[usize],
        augmented: bool,
        rng: &mut R,
    ) -> TrainingResult<HostBatch<2>> {
        let mut x = self.input.select(Axis(0), indices);
        if augmented {
            for (mut column, noise) in x.axis_iter_mut(Axis(1)).zip(&self.noise) {
                if let Some(noise) = noise {
                    column.iter_mut().for_each(|v| *v += noise.sample(rng));
                }
            }
        }
        self.input_scaler.apply_channels(&mut x, Some(self.fill_value))?;
        if augmented && self.missing_fraction > 0.0 {
            set_missing_values(&mut x, self.missing_fraction, self.fill_value, rng)?;
        }
        let y = self.label.select(Axis(0), indices);
        Ok(HostBatch {
            input: x.iter().copied().collect(),
            input_shape: [indices.len(), x.ncols()],
            label: y.iter().copied().collect(),
            label_shape: [indices.len(), y.ncols()],
        })
    }
}
