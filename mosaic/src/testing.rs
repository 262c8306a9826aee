//! Testing utilities for mosaic.

#![allow(dead_code)]

use ndarray::{Array3, ArrayD, Dimension};
use rand::Rng;

use crate::combine::{Exposure, PointingInfo};
use crate::wcs::{PixelToWorld, SpectralAxis, Wcs};

/// Spaxel size of the synthetic fields, arcsec.
pub const SPAXEL_ARCSEC: f64 = 0.1;

/// Field centre of the synthetic fields (RA, Dec in degrees).
pub const FIELD_CENTER: (f64, f64) = (150.0, 2.0);

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
/// Respects RUST_LOG env var, defaults to "info".
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Image mapping of `(ny, nx)` spaxels with the field centre in the middle.
pub fn celestial_wcs(ny: usize, nx: usize) -> Wcs {
    Wcs::from_scale_rotation(
        ((nx as f64 + 1.0) / 2.0, (ny as f64 + 1.0) / 2.0),
        FIELD_CENTER,
        SPAXEL_ARCSEC,
        0.0,
        (ny, nx),
    )
    .unwrap()
}

/// K-band style cube mapping: `nchan` channels starting at 1.93 µm.
pub fn cube_wcs(nchan: usize, ny: usize, nx: usize) -> Wcs {
    celestial_wcs(ny, nx)
        .with_spectral(SpectralAxis::wavelength(1.0, 1.93, 0.000245), nchan)
        .unwrap()
}

/// Standard normal sample via Box-Muller.
pub fn next_gaussian<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Cube of independent normal samples.
pub fn gaussian_noise<R: Rng>(
    rng: &mut R,
    shape: (usize, usize, usize),
    mean: f32,
    sigma: f32,
) -> Array3<f32> {
    Array3::from_shape_simple_fn(shape, || mean + sigma * next_gaussian(rng) as f32)
}

/// Exposure of a constant `value` on the given mapping.
pub fn constant_exposure(wcs: &Wcs, value: f32) -> Exposure {
    let data = ArrayD::from_elem(wcs_shape(wcs), value);
    Exposure::new(data, Some(wcs.clone()))
}

/// Exposure whose pixel value encodes its position: `channel * 10000 + y * 100 + x`.
pub fn ramp_exposure(wcs: &Wcs) -> Exposure {
    let shape = wcs_shape(wcs);
    let data = ArrayD::from_shape_fn(shape, |index| {
        let n = index.ndim();
        let channel = if n == 3 { index[0] } else { 0 };
        (channel * 10000 + index[n - 2] * 100 + index[n - 1]) as f32
    });
    Exposure::new(data, Some(wcs.clone()))
}

/// Pointing with the given cumulative offsets (arcsec) and exposure time.
pub fn pointing(
    arcfile: &str,
    ra_offset: f64,
    dec_offset: f64,
    exposure_time: f64,
) -> PointingInfo {
    PointingInfo {
        arcfile: Some(arcfile.to_string()),
        ra_offset: Some(ra_offset),
        dec_offset: Some(dec_offset),
        exposure_time: Some(exposure_time),
        ra: Some(FIELD_CENTER.0),
        dec: Some(FIELD_CENTER.1),
    }
}

fn wcs_shape(wcs: &Wcs) -> Vec<usize> {
    wcs.shape().to_vec()
}
