//! Host-side grid types
//!
//! Observation and label grids are kept as `H x W x C` arrays on the host
//! (augmentation works there) and converted to `N x C x H x W` tensors only
//! when a batch is handed to the network.

use crate::error::{AugmentationError, CoreResult};
use ndarray::{Array3, Axis};

/// Observation grid, `height x width x channel`
pub type Grid = Array3<f32>;

/// Label grid, `(n1 * height) x (n2 * width) x quantity`
pub type LabelGrid = Array3<f32>;

/// Builds a grid from row-major `H x W x C` data.
pub fn grid_from_vec(shape: [usize; 3], data: Vec<f32>) -> CoreResult<Grid> {
    Ok(Array3::from_shape_vec((shape[0], shape[1], shape[2]), data)?)
}

/// Integer up-sampling ratio `(n1, n2)` between label and input grids.
pub fn resolution_ratio(x: &Grid, y: &LabelGrid) -> Result<(usize, usize), AugmentationError> {
    let (h, w, _) = x.dim();
    let (yh, yw, _) = y.dim();
    let err = AugmentationError::ResolutionRatio {
        height: h,
        width: w,
        label_height: yh,
        label_width: yw,
    };
    if h == 0 || w == 0 || yh % h != 0 || yw % w != 0 || yh < h || yw < w {
        return Err(err);
    }
    Ok((yh / h, yw / w))
}

/// Flattens a batch of equally shaped grids into `N x C x H x W` order.
///
/// Returns `None` for an empty batch or when the grids differ in shape.
pub fn stack_nchw(grids: &[Grid]) -> Option<(Vec<f32>, [usize; 4])> {
    let first = grids.first()?;
    let (h, w, c) = first.dim();
    let mut data = Vec::with_capacity(grids.len() * h * w * c);
    for grid in grids {
        if grid.dim() != (h, w, c) {
            return None;
        }
        for channel in grid.axis_iter(Axis(2)) {
            data.extend(channel.iter().copied());
        }
    }
    Some((data, [grids.len(), c, h, w]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_ratio() {
        let x = Grid::zeros((8, 6, 3));
        let y = LabelGrid::zeros((16, 18, 1));
        assert_eq!(resolution_ratio(&x, &y), Ok((2, 3)));

        let bad = LabelGrid::zeros((12, 6, 1));
        assert!(resolution_ratio(&Grid::zeros((8, 6, 1)), &bad).is_err());
    }

    #[test]
    fn test_stack_nchw() {
        let mut a = Grid::zeros((2, 3, 2));
        a[[1, 2, 0]] = 5.0;
        a[[0, 1, 1]] = 7.0;
        let (data, shape) = stack_nchw(&[a.clone(), a.clone()]).unwrap();
        assert_eq!(shape, [2, 2, 2, 3]);
        // channel 0, row 1, col 2
        assert_eq!(data[3 + 2], 5.0);
        // channel 1, row 0, col 1
        assert_eq!(data[6 + 1], 7.0);
        // second sample starts after C * H * W values
        assert_eq!(data[12 + 6 + 1], 7.0);
    }

    #[test]
    fn test_stack_rejects_mixed_shapes() {
        assert!(stack_nchw(&[Grid::zeros((2, 2, 1)), Grid::zeros((2, 3, 1))]).is_none());
        assert!(stack_nchw(&[]).is_none());
    }
}
