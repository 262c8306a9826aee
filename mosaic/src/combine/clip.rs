//! Iterative sigma clipping of a whole exposure.

use ndarray::{Array3, Zip};

use crate::config::SigmaClipConfig;
use crate::stats;

/// Reject outliers by expanding `mask`; returns the number of newly masked pixels.
///
/// Each iteration takes the unmasked values, computes their median and
/// standard deviation, and masks every value further than `sigma × std` from
/// the median. Stops after `iterations` rounds, or earlier once a round
/// rejects nothing.
pub fn sigma_clip(data: &Array3<f32>, mask: &mut Array3<u8>, config: &SigmaClipConfig) -> usize {
    let mut total = 0;
    let mut values = Vec::with_capacity(data.len());

    for _ in 0..config.iterations {
        values.clear();
        Zip::from(data).and(&*mask).for_each(|&v, &m| {
            if m == 0 {
                values.push(v);
            }
        });
        if values.len() < 2 {
            break;
        }

        let (_, std) = stats::mean_and_std(&values);
        let center = stats::median_f32_mut(&mut values);
        if std == 0.0 || !std.is_finite() {
            break;
        }
        let threshold = config.sigma * std;

        let mut rejected = 0;
        Zip::from(data).and(&mut *mask).for_each(|&v, m| {
            if *m == 0 && (v - center).abs() > threshold {
                *m = 1;
                rejected += 1;
            }
        });

        if rejected == 0 {
            break;
        }
        total += rejected;
    }

    total
}
