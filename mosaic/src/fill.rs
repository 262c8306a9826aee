//! Iterative median filling of masked regions.
//!
//! Every masked cell is replaced by the median of the finite values in its
//! radius-1 neighbourhood (3×3 for images, 3×3×3 for cubes), clamped at the
//! array bounds. Cells are updated in place in row-major order, so a cell filled
//! early in a pass already feeds its later neighbours. Passes repeat until every
//! masked cell holds a finite value.

use ndarray::{ArrayD, IxDyn, SliceInfoElem};
use thiserror::Error;
use tracing::debug;

use crate::stats::nan_median_f32_mut;

/// Pass limit used by [`fill_mask`].
pub const DEFAULT_MAX_PASSES: usize = 1000;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FillError {
    #[error("Mask shape {mask:?} does not match data shape {data:?}")]
    ShapeMismatch { data: Vec<usize>, mask: Vec<usize> },

    #[error("{remaining} masked cells have no finite value within reach")]
    Unreachable { remaining: usize },

    #[error("{remaining} masked cells still empty after {passes} passes")]
    MaxIterations { passes: usize, remaining: usize },
}

/// Fill every cell where `mask` is non-zero, with the default pass limit.
pub fn fill_mask(data: &ArrayD<f32>, mask: &ArrayD<u8>) -> Result<ArrayD<f32>, FillError> {
    fill_mask_with_limit(data, mask, DEFAULT_MAX_PASSES)
}

/// Fill every cell where `mask` is non-zero, giving up after `max_passes`.
///
/// Fails with [`FillError::Unreachable`] when a pass fills nothing, e.g. when
/// every cell is masked.
pub fn fill_mask_with_limit(
    data: &ArrayD<f32>,
    mask: &ArrayD<u8>,
    max_passes: usize,
) -> Result<ArrayD<f32>, FillError> {
    if data.shape() != mask.shape() {
        return Err(FillError::ShapeMismatch {
            data: data.shape().to_vec(),
            mask: mask.shape().to_vec(),
        });
    }

    let mut filled = data.clone();
    let masked: Vec<IxDyn> = mask
        .indexed_iter()
        .filter(|(_, &m)| m != 0)
        .map(|(index, _)| index)
        .collect();
    for index in &masked {
        filled[index.clone()] = f32::NAN;
    }

    let shape = data.shape().to_vec();
    let mut neighbours = Vec::with_capacity(3usize.pow(shape.len() as u32));
    let mut remaining = count_empty(&filled, &masked);
    let mut passes = 0;

    while remaining > 0 {
        if passes == max_passes {
            return Err(FillError::MaxIterations { passes, remaining });
        }

        for index in &masked {
            let window = neighbourhood(index, &shape);
            neighbours.clear();
            neighbours.extend(filled.slice(window.as_slice()).iter().copied());
            filled[index.clone()] = nan_median_f32_mut(&mut neighbours);
        }
        passes += 1;

        let left = count_empty(&filled, &masked);
        debug!(passes, remaining = left, "Fill pass");
        if left == remaining {
            return Err(FillError::Unreachable { remaining });
        }
        remaining = left;
    }

    Ok(filled)
}

fn neighbourhood(index: &IxDyn, shape: &[usize]) -> Vec<SliceInfoElem> {
    shape
        .iter()
        .enumerate()
        .map(|(axis, &len)| {
            let i = index[axis];
            let start = i.saturating_sub(1);
            let end = (i + 2).min(len);
            SliceInfoElem::Slice {
                start: start as isize,
                end: Some(end as isize),
                step: 1,
            }
        })
        .collect()
}

fn count_empty(filled: &ArrayD<f32>, masked: &[IxDyn]) -> usize {
    masked
        .iter()
        .filter(|index| !filled[(*index).clone()].is_finite())
        .count()
}
