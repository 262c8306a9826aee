//! Per-channel background subtraction.

use ndarray::{Array3, Axis, Zip};

use crate::stats;

/// Subtract the median of the unmasked pixels from every channel plane.
///
/// Channels without unmasked pixels are left untouched. Returns the medians,
/// `None` for skipped channels.
pub fn subtract_channel_medians(data: &mut Array3<f32>, mask: &Array3<u8>) -> Vec<Option<f32>> {
    let mut values = Vec::new();
    data.axis_iter_mut(Axis(0))
        .zip(mask.axis_iter(Axis(0)))
        .map(|(mut plane, plane_mask)| {
            values.clear();
            Zip::from(&plane).and(&plane_mask).for_each(|&v, &m| {
                if m == 0 {
                    values.push(v);
                }
            });
            if values.is_empty() {
                return None;
            }
            let median = stats::median_f32_mut(&mut values);
            plane.mapv_inplace(|v| v - median);
            Some(median)
        })
        .collect()
}
