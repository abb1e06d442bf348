//! Geometric data augmentation for paired input / label grids
//!
//! Input and label grids may differ in resolution by an integer ratio
//! `(n1, n2)`. Every operation here keeps that ratio: a crop of `size x size`
//! input pixels cuts the matching `(n1 * size) x (n2 * size)` label window,
//! and flips / transposes are applied to both grids alike.
//!
//! All functions are pure apart from the caller-supplied RNG, so batches can
//! be prepared independently.

use crate::error::AugmentationError;
use crate::grid::{Grid, LabelGrid, resolution_ratio};
use ndarray::{Array, Axis, Dimension, s};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How the crop window is positioned
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropMode {
    /// Uniformly random offset on both axes
    Random,
    /// Random along-track offset, cross-track window centred on the swath
    SwathCentered,
}

/// Which random orientation changes are drawn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlipMode {
    /// Horizontal and vertical flips only
    Flip,
    /// Transpose plus horizontal and vertical flips (8 orientations)
    RotateAndFlip,
}

fn check_crop(x: &Grid, size: usize) -> Result<(usize, usize), AugmentationError> {
    let (h, w, _) = x.dim();
    if size == 0 {
        return Err(AugmentationError::EmptyCrop);
    }
    if size > h || size > w {
        return Err(AugmentationError::CropTooLarge {
            size,
            height: h,
            width: w,
        });
    }
    Ok((h, w))
}

fn crop_at(
    x: &Grid,
    y: &LabelGrid,
    s1: usize,
    s2: usize,
    size: usize,
    (n1, n2): (usize, usize),
) -> (Grid, LabelGrid) {
    let xc = x.slice(s![s1..s1 + size, s2..s2 + size, ..]).to_owned();
    let yc = y
        .slice(s![s1 * n1..(s1 + size) * n1, s2 * n2..(s2 + size) * n2, ..])
        .to_owned();
    (xc, yc)
}

/// Random crop of `size x size` input pixels and the matching label window.
pub fn random_crop<R: Rng + ?Sized>(
    x: &Grid,
    y: &LabelGrid,
    size: usize,
    rng: &mut R,
) -> Result<(Grid, LabelGrid), AugmentationError> {
    let (h, w) = check_crop(x, size)?;
    let ratio = resolution_ratio(x, y)?;
    let s1 = rng.random_range(0..=h - size);
    let s2 = rng.random_range(0..=w - size);
    Ok(crop_at(x, y, s1, s2, size, ratio))
}

/// Cross-track offset that centres a `size` window on a swath of `width`
/// pixels, clamped into `[0, width - size]`.
pub fn swath_offset(width: usize, size: usize) -> usize {
    (width / 2)
        .saturating_sub(size / 2)
        .min(width.saturating_sub(size))
}

/// Random crop whose second (cross-track) axis stays centred on the swath.
pub fn random_crop_swath_centered<R: Rng + ?Sized>(
    x: &Grid,
    y: &LabelGrid,
    size: usize,
    rng: &mut R,
) -> Result<(Grid, LabelGrid), AugmentationError> {
    let (h, w) = check_crop(x, size)?;
    let ratio = resolution_ratio(x, y)?;
    let s1 = rng.random_range(0..=h - size);
    let s2 = swath_offset(w, size);
    Ok(crop_at(x, y, s1, s2, size, ratio))
}

/// Deterministic crop centred on both axes.
pub fn center_crop(
    x: &Grid,
    y: &LabelGrid,
    size: usize,
) -> Result<(Grid, LabelGrid), AugmentationError> {
    let (h, w) = check_crop(x, size)?;
    let ratio = resolution_ratio(x, y)?;
    Ok(crop_at(x, y, swath_offset(h, size), swath_offset(w, size), size, ratio))
}

/// One of the eight axis-aligned orientations of a square grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Orientation {
    pub transpose: bool,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
}

impl Orientation {
    /// All orientations reachable with transposes enabled
    pub fn all() -> impl Iterator<Item = Orientation> {
        (0..8u8).map(|bits| Orientation {
            transpose: bits & 1 != 0,
            flip_horizontal: bits & 2 != 0,
            flip_vertical: bits & 4 != 0,
        })
    }

    /// Draws each change with an independent fair coin.
    pub fn random<R: Rng + ?Sized>(mode: FlipMode, rng: &mut R) -> Self {
        let transpose = match mode {
            FlipMode::RotateAndFlip => rng.random_bool(0.5),
            FlipMode::Flip => false,
        };
        Self {
            transpose,
            flip_horizontal: rng.random_bool(0.5),
            flip_vertical: rng.random_bool(0.5),
        }
    }

    /// Applies the orientation to both grids (transpose first, then flips).
    pub fn apply(&self, x: Grid, y: LabelGrid) -> Result<(Grid, LabelGrid), AugmentationError> {
        let (mut x, mut y) = (x, y);
        if self.transpose {
            for dims in [x.dim(), y.dim()] {
                if dims.0 != dims.1 {
                    return Err(AugmentationError::NotSquare {
                        height: dims.0,
                        width: dims.1,
                    });
                }
            }
            x = x.permuted_axes([1, 0, 2]);
            y = y.permuted_axes([1, 0, 2]);
        }
        if self.flip_horizontal {
            x.invert_axis(Axis(1));
            y.invert_axis(Axis(1));
        }
        if self.flip_vertical {
            x.invert_axis(Axis(0));
            y.invert_axis(Axis(0));
        }
        Ok((
            x.as_standard_layout().into_owned(),
            y.as_standard_layout().into_owned(),
        ))
    }
}

/// Random horizontal and vertical flips.
pub fn random_flip<R: Rng + ?Sized>(
    x: Grid,
    y: LabelGrid,
    rng: &mut R,
) -> Result<(Grid, LabelGrid), AugmentationError> {
    Orientation::random(FlipMode::Flip, rng).apply(x, y)
}

/// Random transpose plus horizontal and vertical flips.
pub fn random_rotate_and_flip<R: Rng + ?Sized>(
    x: Grid,
    y: LabelGrid,
    rng: &mut R,
) -> Result<(Grid, LabelGrid), AugmentationError> {
    Orientation::random(FlipMode::RotateAndFlip, rng).apply(x, y)
}

/// Crop followed by a random orientation, as used for every training batch.
pub fn augment<R: Rng + ?Sized>(
    x: &Grid,
    y: &LabelGrid,
    size: usize,
    crop: CropMode,
    flip: FlipMode,
    rng: &mut R,
) -> Result<(Grid, LabelGrid), AugmentationError> {
    let (xc, yc) = match crop {
        CropMode::Random => random_crop(x, y, size, rng)?,
        CropMode::SwathCentered => random_crop_swath_centered(x, y, size, rng)?,
    };
    Orientation::random(flip, rng).apply(xc, yc)
}

fn check_fraction(fraction: f32) -> Result<(), AugmentationError> {
    if (0.0..=1.0).contains(&fraction) {
        Ok(())
    } else {
        Err(AugmentationError::InvalidFraction(fraction))
    }
}

/// Replaces each spatial position, across all channels, by `fill_value`
/// with probability `fraction`.
pub fn set_missing_data<R: Rng + ?Sized>(
    x: &mut Grid,
    fraction: f32,
    fill_value: f32,
    rng: &mut R,
) -> Result<(), AugmentationError> {
    check_fraction(fraction)?;
    if fraction == 0.0 {
        return Ok(());
    }
    for mut pixel in x.lanes_mut(Axis(2)) {
        if rng.random::<f32>() < fraction {
            pixel.fill(fill_value);
        }
    }
    Ok(())
}

/// Replaces each element independently by `fill_value` with probability
/// `fraction` (flat per-sample inputs).
pub fn set_missing_values<R, D>(
    x: &mut Array<f32, D>,
    fraction: f32,
    fill_value: f32,
    rng: &mut R,
) -> Result<(), AugmentationError>
where
    R: Rng + ?Sized,
    D: Dimension,
{
    check_fraction(fraction)?;
    if fraction == 0.0 {
        return Ok(());
    }
    for v in x.iter_mut() {
        if rng.random::<f32>() < fraction {
            *v = fill_value;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// Input with `x[i, j, 0] = 1000 i + j` and a label whose every
    /// `n1 x n2` block repeats the value of the input pixel it covers.
    fn coded_pair(h: usize, w: usize, c: usize, n1: usize, n2: usize) -> (Grid, LabelGrid) {
        let x = Grid::from_shape_fn((h, w, c), |(i, j, k)| (1000 * i + j) as f32 + 0.1 * k as f32);
        let y = LabelGrid::from_shape_fn((h * n1, w * n2, 1), |(i, j, _)| {
            (1000 * (i / n1) + j / n2) as f32
        });
        (x, y)
    }

    fn assert_aligned(x: &Grid, y: &LabelGrid) {
        let (h, w, _) = x.dim();
        let (n1, n2) = resolution_ratio(x, y).unwrap();
        for i in 0..h * n1 {
            for j in 0..w * n2 {
                assert_eq!(y[[i, j, 0]], x[[i / n1, j / n2, 0]], "label ({i},{j}) misaligned");
            }
        }
    }

    #[test]
    fn test_random_crop_shapes_for_many_seeds() {
        let (x, y) = coded_pair(40, 48, 5, 2, 2);
        for seed in 0..64 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let (xc, yc) = random_crop(&x, &y, 32, &mut rng).unwrap();
            assert_eq!(xc.dim(), (32, 32, 5));
            assert_eq!(yc.dim(), (64, 64, 1));
            assert_aligned(&xc, &yc);
        }
    }

    #[test]
    fn test_random_crop_full_size() {
        let (x, y) = coded_pair(16, 16, 2, 3, 3);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let (xc, yc) = random_crop(&x, &y, 16, &mut rng).unwrap();
        assert_eq!(xc, x);
        assert_eq!(yc, y);
    }

    #[test]
    fn test_crop_errors() {
        let (x, y) = coded_pair(16, 12, 1, 1, 1);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(
            random_crop(&x, &y, 13, &mut rng),
            Err(AugmentationError::CropTooLarge {
                size: 13,
                height: 16,
                width: 12
            })
        );
        assert_eq!(random_crop(&x, &y, 0, &mut rng), Err(AugmentationError::EmptyCrop));

        let odd_label = LabelGrid::zeros((24, 12, 1));
        assert!(matches!(
            random_crop_swath_centered(&x, &odd_label, 8, &mut rng),
            Err(AugmentationError::ResolutionRatio { .. })
        ));
    }

    #[test]
    fn test_swath_offset_is_clamped() {
        assert_eq!(swath_offset(48, 32), 8);
        assert_eq!(swath_offset(32, 32), 0);
        assert_eq!(swath_offset(33, 32), 0);
        assert_eq!(swath_offset(34, 32), 1);
        assert_eq!(swath_offset(100, 10), 45);
        for width in 1..64 {
            for size in 1..=width {
                let s2 = swath_offset(width, size);
                assert!(s2 + size <= width, "width={width} size={size} s2={s2}");
            }
        }
    }

    #[test]
    fn test_swath_centered_crop_uses_centre_columns() {
        let (x, y) = coded_pair(40, 48, 3, 2, 2);
        for seed in 0..16 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let (xc, yc) = random_crop_swath_centered(&x, &y, 32, &mut rng).unwrap();
            assert_eq!(xc.dim(), (32, 32, 3));
            assert_eq!(yc.dim(), (64, 64, 1));
            // first cropped column is column 8 of the input
            assert_eq!(xc[[0, 0, 0]] as usize % 1000, 8);
            assert_aligned(&xc, &yc);
        }
    }

    #[test]
    fn test_swath_centered_crop_when_width_equals_size() {
        let (x, y) = coded_pair(20, 16, 1, 2, 2);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let (xc, yc) = random_crop_swath_centered(&x, &y, 16, &mut rng).unwrap();
        assert_eq!(xc.dim(), (16, 16, 1));
        assert_eq!(yc.dim(), (32, 32, 1));
        assert_eq!(xc[[0, 0, 0]] as usize % 1000, 0);
    }

    #[test]
    fn test_center_crop() {
        let (x, y) = coded_pair(40, 48, 1, 1, 1);
        let (xc, yc) = center_crop(&x, &y, 32).unwrap();
        assert_eq!(xc[[0, 0, 0]], (1000 * 4 + 8) as f32);
        assert_aligned(&xc, &yc);
    }

    #[test]
    fn test_orientations_keep_markers_co_located() {
        let mut x = Grid::zeros((8, 8, 2));
        let mut y = LabelGrid::zeros((16, 16, 1));
        x[[1, 5, 0]] = 1.0;
        x[[1, 5, 1]] = 1.0;
        y.slice_mut(s![2..4, 10..12, ..]).fill(1.0);

        let mut seen = Vec::new();
        for orientation in Orientation::all() {
            let (xo, yo) = orientation.apply(x.clone(), y.clone()).unwrap();
            let pos = xo
                .indexed_iter()
                .find(|(_, v)| **v == 1.0)
                .map(|((i, j, _), _)| (i, j))
                .unwrap();
            let block = yo.slice(s![2 * pos.0..2 * pos.0 + 2, 2 * pos.1..2 * pos.1 + 2, ..]);
            assert!(block.iter().all(|v| *v == 1.0), "{orientation:?}");
            assert_eq!(yo.sum(), 4.0);
            seen.push(pos);
        }
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 8);
    }

    #[test]
    fn test_random_rotate_and_flip_preserves_alignment() {
        let (x, y) = coded_pair(12, 12, 2, 2, 2);
        for seed in 0..32 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let (xo, yo) = random_rotate_and_flip(x.clone(), y.clone(), &mut rng).unwrap();
            assert_aligned(&xo, &yo);
        }
    }

    #[test]
    fn test_transpose_requires_square() {
        let (x, y) = coded_pair(4, 6, 1, 1, 1);
        let rotate = Orientation {
            transpose: true,
            ..Default::default()
        };
        assert_eq!(
            rotate.apply(x.clone(), y.clone()),
            Err(AugmentationError::NotSquare { height: 4, width: 6 })
        );
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(random_flip(x, y, &mut rng).is_ok());
    }

    #[test]
    fn test_set_missing_data() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let original = Grid::from_elem((64, 64, 3), 0.5);

        let mut untouched = original.clone();
        set_missing_data(&mut untouched, 0.0, -2.0, &mut rng).unwrap();
        assert_eq!(untouched, original);

        let mut all = original.clone();
        set_missing_data(&mut all, 1.0, -2.0, &mut rng).unwrap();
        assert!(all.iter().all(|v| *v == -2.0));

        let mut half = original.clone();
        set_missing_data(&mut half, 0.5, -2.0, &mut rng).unwrap();
        let mut missing = 0;
        for pixel in half.lanes(Axis(2)) {
            let filled = pixel.iter().filter(|v| **v == -2.0).count();
            assert!(filled == 0 || filled == 3, "partially filled pixel");
            if filled == 3 {
                missing += 1;
            }
        }
        let fraction = missing as f32 / (64.0 * 64.0);
        assert!((0.4..0.6).contains(&fraction), "fraction={fraction}");

        assert_eq!(
            set_missing_data(&mut half, 1.5, -2.0, &mut rng),
            Err(AugmentationError::InvalidFraction(1.5))
        );
    }

    #[test]
    fn test_set_missing_values_elementwise() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut x = ndarray::Array2::<f32>::ones((200, 10));
        set_missing_values(&mut x, 0.1, -2.0, &mut rng).unwrap();
        let filled = x.iter().filter(|v| **v == -2.0).count();
        assert!((100..300).contains(&filled), "filled={filled}");
    }
}
