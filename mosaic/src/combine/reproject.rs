//! Flux-conserving resampling of exposure planes onto the combined grid.
//!
//! Each output pixel is mapped through the sky into the input frame. The local
//! Jacobian of that mapping gives the size of the output pixel in input pixels;
//! the footprint is approximated by an axis-aligned box, and every input pixel
//! overlapping the box contributes in proportion to the overlap area.
//!
//! - Data: `Σ overlap × value`, which conserves the total flux.
//! - Mask: the overlap-weighted average, where the part of the box outside the
//!   input grid counts as masked.
//!
//! The geometry is computed once per exposure into a [`ResamplingPlan`] and then
//! applied to every channel plane in parallel.

use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use rayon::prelude::*;

use crate::wcs::Wcs;

/// Boxes narrower than this (in input pixels) are treated as degenerate.
const MIN_FOOTPRINT: f64 = 1e-12;

/// Overlaps below this fraction of an input pixel are dropped.
///
/// Slivers of this size come from rounding in the sky round trip, not from
/// real footprint overlap.
const MIN_OVERLAP: f64 = 1e-4;

/// Truncate or zero-pad the channel axis to `nchan`.
///
/// Padded channels are zero with a good (0) mask.
pub fn match_channels(
    data: Array3<f32>,
    mask: Array3<u8>,
    nchan: usize,
) -> (Array3<f32>, Array3<u8>) {
    let (current, ny, nx) = data.dim();
    if current == nchan {
        return (data, mask);
    }
    if current > nchan {
        let data = data.slice(s![..nchan, .., ..]).to_owned();
        let mask = mask.slice(s![..nchan, .., ..]).to_owned();
        return (data, mask);
    }

    let mut padded = Array3::zeros((nchan, ny, nx));
    let mut padded_mask = Array3::zeros((nchan, ny, nx));
    padded.slice_mut(s![..current, .., ..]).assign(&data);
    padded_mask.slice_mut(s![..current, .., ..]).assign(&mask);
    (padded, padded_mask)
}

/// Overlap area of the intervals `[a0, a1]` and `[b0, b1]`.
#[inline]
fn interval_overlap(a0: f64, a1: f64, b0: f64, b1: f64) -> f64 {
    (a1.min(b1) - a0.max(b0)).max(0.0)
}

/// Precomputed input-pixel contributions for every output pixel.
///
/// Stored in compressed rows: the contributions of output pixel `i` (row-major
/// over `(ny, nx)`) are `inputs[offsets[i]..offsets[i + 1]]` with matching
/// `overlaps`.
#[derive(Debug, Clone)]
pub struct ResamplingPlan {
    output_shape: (usize, usize),
    input_shape: (usize, usize),
    offsets: Vec<usize>,
    /// Flat row-major input index.
    inputs: Vec<usize>,
    /// Overlap area in input pixels.
    overlaps: Vec<f32>,
    /// Area of each output pixel's footprint in input pixels.
    footprint_areas: Vec<f32>,
}

impl ResamplingPlan {
    /// Plan the resampling of `input` planes onto the `output` grid.
    ///
    /// Only the celestial axes take part; channels are matched by index.
    pub fn new(input: &Wcs, output: &Wcs) -> Self {
        let (out_ny, out_nx) = output.image_shape();
        let (in_ny, in_nx) = input.image_shape();

        let to_input = |x: f64, y: f64| -> (f64, f64) {
            let (ra, dec) = output.pixel_to_sky(x, y);
            input.sky_to_pixel(ra, dec)
        };

        let rows: Vec<Vec<(usize, f32)>> = (0..out_ny * out_nx)
            .into_par_iter()
            .map(|index| {
                let x = (index % out_nx) as f64;
                let y = (index / out_nx) as f64;
                pixel_contributions(&to_input, x, y, in_ny, in_nx)
            })
            .collect();

        let mut offsets = Vec::with_capacity(rows.len() + 1);
        let mut inputs = Vec::new();
        let mut overlaps = Vec::new();
        let mut footprint_areas = Vec::with_capacity(rows.len());
        offsets.push(0);
        for row in rows {
            // The last entry carries the footprint area
            let (contributions, area) = match row.split_last() {
                Some((&(_, area), contributions)) => (contributions.to_vec(), area),
                None => (Vec::new(), 0.0),
            };
            for (input, overlap) in contributions {
                inputs.push(input);
                overlaps.push(overlap);
            }
            footprint_areas.push(area);
            offsets.push(inputs.len());
        }

        Self {
            output_shape: (out_ny, out_nx),
            input_shape: (in_ny, in_nx),
            offsets,
            inputs,
            overlaps,
            footprint_areas,
        }
    }

    pub fn input_shape(&self) -> (usize, usize) {
        self.input_shape
    }

    /// Flux-conserving resampling of one plane.
    pub fn resample_flux(&self, plane: ArrayView2<f32>) -> Array2<f32> {
        self.resample_with(plane, |sum, _, _| sum)
    }

    /// Area-weighted average of one plane; area outside the input counts as `outside`.
    pub fn resample_average(&self, plane: ArrayView2<f32>, outside: f32) -> Array2<f32> {
        self.resample_with(plane, |sum, covered, area| {
            if area <= 0.0 {
                outside
            } else {
                (sum + outside * (area - covered)) / area
            }
        })
    }

    /// Resample a data cube and its mask, channel planes in parallel.
    ///
    /// Returns the flux-conserved data and the resampled mask fraction
    /// (0 = fully good, 1 = fully masked or outside the input).
    pub fn resample_cube(
        &self,
        data: &Array3<f32>,
        mask: &Array3<u8>,
    ) -> (Array3<f32>, Array3<f32>) {
        let nchan = data.len_of(Axis(0));
        let (ny, nx) = self.output_shape;

        let planes: Vec<(Array2<f32>, Array2<f32>)> = (0..nchan)
            .into_par_iter()
            .map(|chan| {
                let flux = self.resample_flux(data.index_axis(Axis(0), chan));
                let mask_plane = mask
                    .index_axis(Axis(0), chan)
                    .mapv(|m| if m != 0 { 1.0 } else { 0.0 });
                let masked = self.resample_average(mask_plane.view(), 1.0);
                (flux, masked)
            })
            .collect();

        let mut out_data = Array3::zeros((nchan, ny, nx));
        let mut out_mask = Array3::zeros((nchan, ny, nx));
        for (chan, (flux, masked)) in planes.into_iter().enumerate() {
            out_data.index_axis_mut(Axis(0), chan).assign(&flux);
            out_mask.index_axis_mut(Axis(0), chan).assign(&masked);
        }
        (out_data, out_mask)
    }

    fn resample_with<F>(&self, plane: ArrayView2<f32>, finish: F) -> Array2<f32>
    where
        F: Fn(f32, f32, f32) -> f32,
    {
        let (ny, nx) = self.output_shape;
        let in_nx = self.input_shape.1;
        let mut out = Array2::zeros((ny, nx));

        for (index, value) in out.iter_mut().enumerate() {
            let range = self.offsets[index]..self.offsets[index + 1];
            let mut sum = 0.0f32;
            let mut covered = 0.0f32;
            for (&input, &overlap) in self.inputs[range.clone()].iter().zip(&self.overlaps[range]) {
                sum += overlap * plane[(input / in_nx, input % in_nx)];
                covered += overlap;
            }
            *value = finish(sum, covered, self.footprint_areas[index]);
        }
        out
    }
}

/// Contributions of the input grid to output pixel `(x, y)`.
///
/// The last element holds `(usize::MAX, footprint_area)`.
fn pixel_contributions<F>(
    to_input: &F,
    x: f64,
    y: f64,
    in_ny: usize,
    in_nx: usize,
) -> Vec<(usize, f32)>
where
    F: Fn(f64, f64) -> (f64, f64),
{
    let center = to_input(x, y);
    let right = to_input(x + 0.5, y);
    let left = to_input(x - 0.5, y);
    let up = to_input(x, y + 0.5);
    let down = to_input(x, y - 0.5);

    let samples = [center, right, left, up, down];
    if samples.iter().any(|(a, b)| !a.is_finite() || !b.is_finite()) {
        return vec![(usize::MAX, 0.0)];
    }

    // Jacobian columns: input displacement per output pixel along x and y
    let jx = (right.0 - left.0, right.1 - left.1);
    let jy = (up.0 - down.0, up.1 - down.1);
    let half_w = 0.5 * (jx.0.abs() + jy.0.abs());
    let half_h = 0.5 * (jx.1.abs() + jy.1.abs());
    if half_w < MIN_FOOTPRINT || half_h < MIN_FOOTPRINT {
        return vec![(usize::MAX, 0.0)];
    }

    let box_area = 4.0 * half_w * half_h;
    let jacobian = (jx.0 * jy.1 - jx.1 * jy.0).abs();
    // Rescale the box overlaps so they sum to the true footprint area
    let scale = jacobian / box_area;

    let (x0, x1) = (center.0 - half_w, center.0 + half_w);
    let (y0, y1) = (center.1 - half_h, center.1 + half_h);

    let ix_min = (x0 + 0.5).floor().max(0.0) as usize;
    let iy_min = (y0 + 0.5).floor().max(0.0) as usize;
    let ix_max = ((x1 + 0.5).ceil().min(in_nx as f64)).max(0.0) as usize;
    let iy_max = ((y1 + 0.5).ceil().min(in_ny as f64)).max(0.0) as usize;

    let mut contributions = Vec::new();
    for iy in iy_min..iy_max {
        let oy = interval_overlap(y0, y1, iy as f64 - 0.5, iy as f64 + 0.5);
        if oy <= 0.0 {
            continue;
        }
        for ix in ix_min..ix_max {
            let ox = interval_overlap(x0, x1, ix as f64 - 0.5, ix as f64 + 0.5);
            let overlap = ox * oy * scale;
            if overlap > MIN_OVERLAP {
                contributions.push((iy * in_nx + ix, overlap as f32));
            }
        }
    }
    contributions.push((usize::MAX, jacobian as f32));
    contributions
}

#[cfg(test)]
mod tests {
    use glam::DVec2;

    use super::*;
    use crate::testing::celestial_wcs;

    #[test]
    fn test_identity_plan_copies_plane() {
        let wcs = celestial_wcs(6, 5);
        let plan = ResamplingPlan::new(&wcs, &wcs);

        let plane = Array2::from_shape_fn((6, 5), |(y, x)| (y * 5 + x) as f32);
        let out = plan.resample_flux(plane.view());
        for (a, b) in out.iter().zip(plane.iter()) {
            assert!((a - b).abs() < 1e-3, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_integer_offset_moves_values() {
        let input = celestial_wcs(6, 6);
        // Output pixel x sits on input pixel x + 2
        let output = input.shifted(DVec2::new(-2.0, 0.0));
        let plan = ResamplingPlan::new(&input, &output);

        let mut plane = Array2::zeros((6, 6));
        plane[(3, 4)] = 10.0;
        let out = plan.resample_flux(plane.view());
        assert!((out[(3, 2)] - 10.0).abs() < 1e-3);
        assert!((out.sum() - 10.0).abs() < 1e-3);

        let mask = Array2::zeros((6, 6));
        let masked = plan.resample_average(mask.view(), 1.0);
        // Last two output columns fall outside the input grid
        assert!(masked[(0, 0)].abs() < 1e-4);
        assert!((masked[(0, 4)] - 1.0).abs() < 1e-4);
        assert!((masked[(5, 5)] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_half_pixel_offset_splits_flux() {
        let input = celestial_wcs(4, 4);
        let output = input.shifted(DVec2::new(-0.5, 0.0));
        let plan = ResamplingPlan::new(&input, &output);

        let mut plane = Array2::zeros((4, 4));
        plane[(1, 1)] = 8.0;
        let out = plan.resample_flux(plane.view());
        assert!((out[(1, 0)] - 4.0).abs() < 1e-3);
        assert!((out[(1, 1)] - 4.0).abs() < 1e-3);
    }

    #[test]
    fn test_coarser_output_conserves_flux() {
        let input = celestial_wcs(8, 8);
        // Output pixels twice as large, same centre
        let cd = input.cd();
        let output = Wcs::new(
            (2.5, 2.5),
            input.center(),
            [[cd[0][0] * 2.0, 0.0], [0.0, cd[1][1] * 2.0]],
            (4, 4),
        )
        .unwrap();
        let plan = ResamplingPlan::new(&input, &output);

        let plane = Array2::from_elem((8, 8), 1.0f32);
        let out = plan.resample_flux(plane.view());
        assert!((out.sum() - 64.0).abs() < 0.05, "sum {}", out.sum());
        assert!((out[(1, 1)] - 4.0).abs() < 0.01);
    }

    #[test]
    fn test_match_channels_truncates_and_pads() {
        let data = Array3::from_elem((12, 2, 2), 1.0f32);
        let mask = Array3::from_elem((12, 2, 2), 1u8);
        let (data, mask) = match_channels(data, mask, 10);
        assert_eq!(data.dim(), (10, 2, 2));
        assert_eq!(mask.dim(), (10, 2, 2));

        let (data, mask) = match_channels(data, mask, 14);
        assert_eq!(data.dim(), (14, 2, 2));
        assert_eq!(data[(13, 0, 0)], 0.0);
        assert_eq!(mask[(13, 0, 0)], 0);
        assert_eq!(data[(9, 1, 1)], 1.0);
        assert_eq!(mask[(9, 1, 1)], 1);
    }

    #[test]
    fn test_cube_mask_fraction() {
        let wcs = celestial_wcs(3, 3);
        let plan = ResamplingPlan::new(&wcs, &wcs);

        let data = Array3::from_elem((2, 3, 3), 2.0f32);
        let mut mask = Array3::zeros((2, 3, 3));
        mask[(1, 0, 0)] = 1u8;
        let (out, out_mask) = plan.resample_cube(&data, &mask);

        assert_eq!(out.dim(), (2, 3, 3));
        assert!((out[(0, 2, 2)] - 2.0).abs() < 1e-3);
        assert!((out_mask[(1, 0, 0)] - 1.0).abs() < 1e-4);
        assert!(out_mask[(0, 0, 0)].abs() < 1e-4);
    }
}
