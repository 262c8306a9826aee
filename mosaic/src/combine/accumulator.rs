//! Weighted data and coverage accumulation on the combined grid.

use ndarray::{Array3, ArrayD, Axis, Zip};

/// Running sums of one combine call.
#[derive(Debug)]
pub struct Accumulator {
    data: Array3<f32>,
    coverage: Array3<f32>,
    contributions: usize,
}

impl Accumulator {
    /// Zeroed data; coverage starts at `epsilon` so empty pixels divide to zero.
    pub fn new(nchan: usize, ny: usize, nx: usize, epsilon: f32) -> Self {
        Self {
            data: Array3::zeros((nchan, ny, nx)),
            coverage: Array3::from_elem((nchan, ny, nx), epsilon),
            contributions: 0,
        }
    }

    /// Add one resampled exposure.
    ///
    /// `data += resampled × weight` and `coverage += 1 − resampled_mask`.
    pub fn add(&mut self, resampled: &Array3<f32>, resampled_mask: &Array3<f32>, weight: f32) {
        debug_assert_eq!(resampled.dim(), self.data.dim());
        debug_assert_eq!(resampled_mask.dim(), self.coverage.dim());

        self.data.scaled_add(weight, resampled);
        Zip::from(&mut self.coverage)
            .and(resampled_mask)
            .for_each(|c, &m| *c += 1.0 - m);
        self.contributions += 1;
    }

    pub fn contributions(&self) -> usize {
        self.contributions
    }

    /// Normalised data and coverage.
    ///
    /// When `cube` is false the single channel axis is dropped so the arrays
    /// match a 2-D combined grid.
    pub fn finish(mut self, cube: bool) -> (ArrayD<f32>, ArrayD<f32>) {
        Zip::from(&mut self.data)
            .and(&self.coverage)
            .for_each(|d, &c| *d /= c);

        if cube {
            (self.data.into_dyn(), self.coverage.into_dyn())
        } else {
            (
                self.data.index_axis_move(Axis(0), 0).into_dyn(),
                self.coverage.index_axis_move(Axis(0), 0).into_dyn(),
            )
        }
    }
}
