//! Statistical helpers: medians, mean and standard deviation.

/// Median of `data`, computed in-place by partial sort.
///
/// Even lengths average the two middle values. Returns NaN for an empty slice.
pub fn median_f32_mut(data: &mut [f32]) -> f32 {
    let len = data.len();
    if len == 0 {
        return f32::NAN;
    }
    let mid = len / 2;

    let (left_part, median, _) = data.select_nth_unstable_by(mid, f32::total_cmp);
    let right = *median;
    if len & 1 == 1 {
        return right;
    }
    let left = left_part
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max);
    (left + right) * 0.5
}

/// Median of the finite values in `data`; NaN when none are finite.
///
/// Reorders `data`.
pub fn nan_median_f32_mut(data: &mut [f32]) -> f32 {
    let mut finite = 0;
    for i in 0..data.len() {
        if data[i].is_finite() {
            data.swap(finite, i);
            finite += 1;
        }
    }
    median_f32_mut(&mut data[..finite])
}

/// Mean and population standard deviation, accumulated in `f64`.
///
/// Returns `(NaN, NaN)` for an empty slice.
pub fn mean_and_std(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (f32::NAN, f32::NAN);
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    (mean as f32, variance.sqrt() as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_odd_and_even() {
        let mut odd = [5.0, 1.0, 3.0];
        assert_eq!(median_f32_mut(&mut odd), 3.0);

        let mut even = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(median_f32_mut(&mut even), 2.5);

        let mut empty: [f32; 0] = [];
        assert!(median_f32_mut(&mut empty).is_nan());
    }

    #[test]
    fn test_nan_median_ignores_nan() {
        let mut values = [f32::NAN, 2.0, f32::NAN, 6.0, 4.0];
        assert_eq!(nan_median_f32_mut(&mut values), 4.0);

        let mut all_nan = [f32::NAN, f32::NAN];
        assert!(nan_median_f32_mut(&mut all_nan).is_nan());
    }

    #[test]
    fn test_mean_and_std() {
        let (mean, std) = mean_and_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((mean - 5.0).abs() < 1e-6);
        assert!((std - 2.0).abs() < 1e-6);

        let (mean, std) = mean_and_std(&[]);
        assert!(mean.is_nan() && std.is_nan());
    }
}
