//! Parameter scaling between physical units and the training range
//!
//! Each channel is mapped linearly (optionally after a logarithm) from its
//! configured physical range onto `feature_range`, `(-1, 1)` by default:
//!
//! ```text
//! y = ymin + gain * (f(x) - xoffset)      f = id | ln
//! ```
//!
//! The same scaler must be used when preparing training data and when
//! applying a trained network; the parameters are therefore serialized into
//! the model artifact.

use crate::error::ScalerError;
use ndarray::{Array, Axis, Dimension};
use serde::{Deserialize, Serialize};

/// Floor applied to non-positive values of log-scaled channels
pub const MIN_VALUE: f32 = 1e-6;

/// Default training range
pub const FEATURE_RANGE: (f32, f32) = (-1.0, 1.0);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    Linear,
    Log,
}

/// Physical range of one retrieval input or output parameter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub scale: Scale,
    pub min: f32,
    pub max: f32,
}

impl ParamSpec {
    pub fn linear(name: impl Into<String>, min: f32, max: f32) -> Self {
        Self {
            name: name.into(),
            scale: Scale::Linear,
            min,
            max,
        }
    }

    pub fn log(name: impl Into<String>, min: f32, max: f32) -> Self {
        Self {
            name: name.into(),
            scale: Scale::Log,
            min,
            max,
        }
    }

    fn min_value(&self) -> f32 {
        match self.scale {
            Scale::Log => (self.min + MIN_VALUE).ln(),
            Scale::Linear => self.min,
        }
    }

    fn max_value(&self) -> f32 {
        match self.scale {
            Scale::Log => self.max.ln(),
            Scale::Linear => self.max,
        }
    }
}

/// Per-channel affine (optionally logarithmic) scaler.
///
/// Parameter vectors of length 1 are broadcast to every channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    xoffset: Vec<f32>,
    gain: Vec<f32>,
    ymin: Vec<f32>,
    #[serde(default)]
    apply_log_scale: Vec<bool>,
}

impl Scaler {
    /// Creates a scaler from raw parameter vectors.
    ///
    /// An empty `apply_log_scale` disables the logarithm on all channels.
    pub fn new(
        xoffset: Vec<f32>,
        gain: Vec<f32>,
        ymin: Vec<f32>,
        apply_log_scale: Vec<bool>,
    ) -> Result<Self, ScalerError> {
        let channels = [xoffset.len(), gain.len(), ymin.len(), apply_log_scale.len()]
            .into_iter()
            .max()
            .unwrap_or(0);
        for (name, len) in [
            ("xoffset", xoffset.len()),
            ("gain", gain.len()),
            ("ymin", ymin.len()),
        ] {
            if len != 1 && len != channels {
                return Err(ScalerError::LengthMismatch {
                    name,
                    expected: channels,
                    actual: len,
                });
            }
        }
        if !apply_log_scale.is_empty() && apply_log_scale.len() != channels {
            return Err(ScalerError::LengthMismatch {
                name: "apply_log_scale",
                expected: channels,
                actual: apply_log_scale.len(),
            });
        }
        Ok(Self {
            xoffset,
            gain,
            ymin,
            apply_log_scale,
        })
    }

    /// Derives scaler parameters from the configured physical ranges.
    pub fn from_params(
        params: &[ParamSpec],
        feature_range: (f32, f32),
    ) -> Result<Self, ScalerError> {
        let (y_min, y_max) = feature_range;
        let mut xoffset = Vec::with_capacity(params.len());
        let mut gain = Vec::with_capacity(params.len());
        for p in params {
            let lo = p.min_value();
            let hi = p.max_value();
            if hi == lo || !(hi - lo).is_finite() {
                return Err(ScalerError::EmptyRange(p.name.clone()));
            }
            xoffset.push(lo);
            gain.push((y_max - y_min) / (hi - lo));
        }
        Self::new(
            xoffset,
            gain,
            vec![y_min; params.len()],
            params.iter().map(|p| p.scale == Scale::Log).collect(),
        )
    }

    /// Number of configured channels; 1 for a fully broadcast scaler.
    pub fn n_channels(&self) -> usize {
        self.xoffset
            .len()
            .max(self.gain.len())
            .max(self.ymin.len())
            .max(self.apply_log_scale.len())
    }

    fn is_broadcast(&self) -> bool {
        self.n_channels() == 1
    }

    fn check_channel(&self, idx: usize) -> Result<(), ScalerError> {
        if self.is_broadcast() || idx < self.n_channels() {
            Ok(())
        } else {
            Err(ScalerError::ChannelOutOfRange {
                idx,
                channels: self.n_channels(),
            })
        }
    }

    #[inline]
    fn pick(values: &[f32], idx: usize) -> f32 {
        if values.len() == 1 { values[0] } else { values[idx] }
    }

    #[inline]
    fn log_scaled(&self, idx: usize) -> bool {
        match self.apply_log_scale.len() {
            0 => false,
            1 => self.apply_log_scale[0],
            _ => self.apply_log_scale[idx],
        }
    }

    #[inline]
    fn apply_unchecked(&self, x: f32, idx: usize) -> f32 {
        let x = if self.log_scaled(idx) {
            if x <= 0.0 { MIN_VALUE.ln() } else { x.ln() }
        } else {
            x
        };
        let xoffset = Self::pick(&self.xoffset, idx);
        Self::pick(&self.ymin, idx) + Self::pick(&self.gain, idx) * (x - xoffset)
    }

    #[inline]
    fn reverse_unchecked(&self, y: f32, idx: usize) -> f32 {
        let ymin = Self::pick(&self.ymin, idx);
        let x = Self::pick(&self.xoffset, idx) + (y - ymin) / Self::pick(&self.gain, idx);
        if self.log_scaled(idx) { x.exp() } else { x }
    }

    /// Forward scaling of a single value of channel `idx`.
    pub fn apply(&self, x: f32, idx: usize) -> Result<f32, ScalerError> {
        self.check_channel(idx)?;
        Ok(self.apply_unchecked(x, idx))
    }

    /// Reverse scaling of a single value of channel `idx`.
    pub fn reverse(&self, y: f32, idx: usize) -> Result<f32, ScalerError> {
        self.check_channel(idx)?;
        Ok(self.reverse_unchecked(y, idx))
    }

    /// Scales a column of values belonging to channel `idx` in place.
    pub fn apply_column(&self, values: &mut [f32], idx: usize) -> Result<(), ScalerError> {
        self.check_channel(idx)?;
        for v in values.iter_mut() {
            *v = self.apply_unchecked(*v, idx);
        }
        Ok(())
    }

    /// Reverse-scales a column of values belonging to channel `idx` in place.
    pub fn reverse_column(&self, values: &mut [f32], idx: usize) -> Result<(), ScalerError> {
        self.check_channel(idx)?;
        for v in values.iter_mut() {
            *v = self.reverse_unchecked(*v, idx);
        }
        Ok(())
    }

    /// Scales every channel (last axis) of `data` in place.
    ///
    /// With `fill_value` set, NaN and fill entries are written as the fill
    /// value instead of being scaled.
    pub fn apply_channels<D: Dimension>(
        &self,
        data: &mut Array<f32, D>,
        fill_value: Option<f32>,
    ) -> Result<(), ScalerError> {
        self.map_channels(data, |v, idx| match fill_value {
            Some(fill) if v.is_nan() || v == fill => fill,
            _ => self.apply_unchecked(v, idx),
        })
    }

    /// Reverse-scales every channel (last axis) of `data` in place, keeping
    /// fill values untouched.
    pub fn reverse_channels<D: Dimension>(
        &self,
        data: &mut Array<f32, D>,
        fill_value: Option<f32>,
    ) -> Result<(), ScalerError> {
        self.map_channels(data, |v, idx| match fill_value {
            Some(fill) if v == fill => fill,
            _ => self.reverse_unchecked(v, idx),
        })
    }

    fn map_channels<D, F>(&self, data: &mut Array<f32, D>, f: F) -> Result<(), ScalerError>
    where
        D: Dimension,
        F: Fn(f32, usize) -> f32,
    {
        if data.ndim() == 0 {
            return Ok(());
        }
        let axis = Axis(data.ndim() - 1);
        let channels = data.len_of(axis);
        if channels > 0 {
            self.check_channel(channels - 1)?;
        }
        for mut lane in data.lanes_mut(axis) {
            for (idx, v) in lane.iter_mut().enumerate() {
                *v = f(*v, idx);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn ici_like_params() -> Vec<ParamSpec> {
        vec![
            ParamSpec::linear("DTB_ICI_DB_ICI_01V", -170.0, 30.0),
            ParamSpec::log("IWP", 0.0, 35.0),
            ParamSpec::linear("Zmean", 0.0, 19000.0),
        ]
    }

    #[test]
    fn test_round_trip_within_domain() {
        let scaler = Scaler::from_params(&ici_like_params(), FEATURE_RANGE).unwrap();
        let samples = [
            (0, [-170.0, -80.0, 0.0, 30.0]),
            (1, [1e-3, 0.5, 10.0, 35.0]),
            (2, [0.0, 250.0, 9000.0, 19000.0]),
        ];
        for (idx, values) in samples {
            for x in values {
                let y = scaler.apply(x, idx).unwrap();
                let back = scaler.reverse(y, idx).unwrap();
                let tol = 1e-4 * x.abs().max(1.0);
                assert!((back - x).abs() < tol, "channel {idx}: {x} -> {y} -> {back}");
            }
        }
    }

    #[test]
    fn test_range_endpoints_map_to_feature_range() {
        let scaler = Scaler::from_params(&ici_like_params(), FEATURE_RANGE).unwrap();
        assert!((scaler.apply(-170.0, 0).unwrap() + 1.0).abs() < 1e-6);
        assert!((scaler.apply(30.0, 0).unwrap() - 1.0).abs() < 1e-6);
        assert!((scaler.apply(35.0, 1).unwrap() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_log_channel_floors_non_positive_values() {
        let scaler = Scaler::from_params(&ici_like_params(), FEATURE_RANGE).unwrap();
        let zero = scaler.apply(0.0, 1).unwrap();
        let negative = scaler.apply(-5.0, 1).unwrap();
        assert!(zero.is_finite());
        assert_eq!(zero, negative);
        let back = scaler.reverse(zero, 1).unwrap();
        assert!((back - MIN_VALUE).abs() < 1e-7);
    }

    #[test]
    fn test_broadcast_single_parameter() {
        let scaler = Scaler::new(vec![10.0], vec![0.5], vec![-1.0], vec![]).unwrap();
        assert_eq!(scaler.apply(10.0, 0).unwrap(), -1.0);
        assert_eq!(scaler.apply(14.0, 7).unwrap(), 1.0);
        assert_eq!(scaler.reverse(1.0, 3).unwrap(), 14.0);
    }

    #[test]
    fn test_broadcast_with_per_channel_log_scale() {
        let scaler = Scaler::new(vec![0.0], vec![1.0], vec![2.0], vec![false, true]).unwrap();
        assert_eq!(scaler.n_channels(), 2);
        assert_eq!(scaler.apply(0.0, 0), Ok(2.0));
        assert_eq!(scaler.apply(1.0, 1), Ok(2.0));
        assert_eq!(
            scaler.apply(1.0, 2),
            Err(ScalerError::ChannelOutOfRange { idx: 2, channels: 2 })
        );
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let err = Scaler::new(vec![0.0, 1.0], vec![1.0, 1.0, 1.0], vec![0.0], vec![]).unwrap_err();
        assert!(matches!(err, ScalerError::LengthMismatch { name: "xoffset", .. }));
    }

    #[test]
    fn test_channel_out_of_range() {
        let scaler = Scaler::from_params(&ici_like_params(), FEATURE_RANGE).unwrap();
        assert_eq!(
            scaler.apply(1.0, 3),
            Err(ScalerError::ChannelOutOfRange { idx: 3, channels: 3 })
        );
    }

    #[test]
    fn test_empty_range_rejected() {
        let err = Scaler::from_params(&[ParamSpec::linear("flat", 2.0, 2.0)], FEATURE_RANGE)
            .unwrap_err();
        assert_eq!(err, ScalerError::EmptyRange("flat".to_string()));
    }

    #[test]
    fn test_apply_channels_keeps_fill_values() {
        let scaler = Scaler::from_params(
            &[ParamSpec::linear("a", 0.0, 10.0), ParamSpec::linear("b", 0.0, 100.0)],
            FEATURE_RANGE,
        )
        .unwrap();
        let mut data: Array2<f32> = array![[5.0, 50.0], [-2.0, f32::NAN]];
        scaler.apply_channels(&mut data, Some(-2.0)).unwrap();
        assert_eq!(data, array![[0.0, 0.0], [-2.0, -2.0]]);
        scaler.reverse_channels(&mut data, Some(-2.0)).unwrap();
        assert_eq!(data, array![[5.0, 50.0], [-2.0, -2.0]]);
    }
}
