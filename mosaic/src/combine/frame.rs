//! Combined-frame solver: the output grid covering every input exposure.

use crate::wcs::{pixel_to_pixel, PixelToWorld, Wcs, WcsError};

use super::{CombineError, PixelShift};

/// Compute the coordinate mapping of a mosaic grid covering all `wcs_list` grids.
///
/// The first mapping is the reference frame: its pixel scale, orientation and
/// projection carry over. When `shifts` are given, each shift is subtracted
/// from the corresponding reference pixel (on a copy) before the footprints are
/// measured.
///
/// The first and last pixel of every grid are converted into the reference
/// frame; their bounding box gives the output shape (rounded per axis, ordered
/// `[channel,] y, x`). The reference pixel is placed at half the x/y extents and
/// its sky value is read from the reference frame at the same position. For
/// cubes, channel 0 of the output sits at the lowest spectral bound and the
/// reference channel becomes 1.
pub fn find_combined_wcs(
    wcs_list: &[Wcs],
    shifts: Option<&[PixelShift]>,
) -> Result<Wcs, CombineError> {
    let first = wcs_list.first().ok_or(CombineError::NoExposures)?;
    if let Some(shifts) = shifts {
        if shifts.len() != wcs_list.len() {
            return Err(CombineError::ShiftCountMismatch {
                expected: wcs_list.len(),
                got: shifts.len(),
            });
        }
    }

    let naxis = first.naxis();
    if let Some((index, wcs)) = wcs_list
        .iter()
        .enumerate()
        .find(|(_, wcs)| wcs.naxis() != naxis)
    {
        return Err(CombineError::MixedAxes {
            index,
            naxis: wcs.naxis(),
            expected: naxis,
        });
    }

    let shifted: Vec<Wcs> = match shifts {
        Some(shifts) => wcs_list
            .iter()
            .zip(shifts)
            .map(|(wcs, shift)| wcs.shifted(-*shift))
            .collect(),
        None => wcs_list.to_vec(),
    };
    let reference = &shifted[0];

    let mut low = vec![f64::INFINITY; naxis];
    let mut high = vec![f64::NEG_INFINITY; naxis];
    for wcs in &shifted {
        for corner in extreme_corners(wcs) {
            let projected = pixel_to_pixel(wcs, reference, &corner);
            for (axis, value) in projected.into_iter().enumerate() {
                if value.is_finite() {
                    low[axis] = low[axis].min(value);
                    high[axis] = high[axis].max(value);
                }
            }
        }
    }

    if low.iter().any(|v| !v.is_finite()) {
        return Err(CombineError::DisjointFootprint);
    }

    // [x, y(, channel)] extents in reference-frame pixels
    let ranges: Vec<usize> = low
        .iter()
        .zip(&high)
        .map(|(lo, hi)| ((hi - lo + 1.0).round() as usize).max(1))
        .collect();

    let crpix = (ranges[0] as f64 * 0.5, ranges[1] as f64 * 0.5);
    // Output pixel i sits on reference pixel low + i
    let crval = reference.pixel_to_sky(low[0] + crpix.0 - 1.0, low[1] + crpix.1 - 1.0);

    let spectral = match reference.spectral() {
        Some(axis) if naxis == 3 => {
            let step = axis.step.ok_or(WcsError::MissingSpectralStep)?;
            let mut axis = axis.clone();
            axis.crval = axis.pixel_to_world(low[2]);
            axis.crpix = 1.0;
            axis.step = Some(step);
            Some(axis)
        }
        _ => None,
    };

    let shape: Vec<usize> = ranges.iter().rev().copied().collect();
    let combined = reference.rebased(crpix, crval, spectral, shape)?;

    tracing::debug!(
        shape = ?combined.shape(),
        crpix = ?combined.crpix(),
        crval = ?combined.crval(),
        "Combined frame solved from {} mappings",
        wcs_list.len()
    );

    Ok(combined)
}

/// First and last pixel of a grid, `[x, y(, channel)]`.
fn extreme_corners(wcs: &Wcs) -> [Vec<f64>; 2] {
    let mut first = vec![0.0, 0.0];
    let mut last = vec![wcs.nx() as f64 - 1.0, wcs.ny() as f64 - 1.0];
    if wcs.is_cube() {
        first.push(0.0);
        last.push(wcs.nchan() as f64 - 1.0);
    }
    [first, last]
}
