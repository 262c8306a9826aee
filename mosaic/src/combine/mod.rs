//! Reprojection and weighted co-addition of exposures onto a combined grid.
//!
//! # Pipeline
//!
//! For each exposure:
//! 1. Resolve its coordinate mapping (native WCS, or the shared mock mapping in
//!    pixel-shift alignment)
//! 2. Reconcile the channel count with the combined grid
//! 3. Mask bad and non-finite pixels, optionally sigma clip
//! 4. Optionally subtract the per-channel masked median
//! 5. Zero masked pixels and reproject data (flux-conserving) and mask
//! 6. Accumulate `data += resampled × weight`, `coverage += 1 − resampled_mask`
//!
//! The final data is `data / coverage`, where coverage starts at a small epsilon.

pub mod accumulator;
pub mod background;
pub mod clip;
pub mod frame;
pub mod reproject;

use glam::DVec2;
use ndarray::{Array3, ArrayD, Axis, Ix3};
use thiserror::Error;

use crate::config::{Alignment, CombineConfig};
use crate::wcs::header::Header;
use crate::wcs::{PixelToWorld, Projection, SpectralAxis, Wcs, WcsError};

use self::accumulator::Accumulator;
use self::reproject::ResamplingPlan;

pub use self::frame::find_combined_wcs;

/// Relative `(dx, dy)` pixel shift of an exposure with respect to exposure 0.
pub type PixelShift = DVec2;

/// Errors raised by the combined-frame solver and the combine pipeline.
///
/// Every input check runs before the first exposure is reprojected.
#[derive(Debug, Error)]
pub enum CombineError {
    #[error("No exposures to combine")]
    NoExposures,

    #[error("Pixel shifts do not match the number of exposures: expected {expected}, got {got}")]
    ShiftCountMismatch { expected: usize, got: usize },

    #[error("Weights do not match the number of exposures: expected {expected}, got {got}")]
    WeightCountMismatch { expected: usize, got: usize },

    #[error("Invalid weight {weight} for exposure {index}: weights must be finite and non-negative")]
    InvalidWeight { index: usize, weight: f32 },

    #[error("Exposure {index} has no exposure time (EXPTIME)")]
    MissingExposureTime { index: usize },

    #[error("Total exposure time is zero")]
    ZeroTotalExposureTime,

    #[error("Exposure {index}: mask shape {mask:?} does not match data shape {data:?}")]
    MaskShapeMismatch {
        index: usize,
        data: Vec<usize>,
        mask: Vec<usize>,
    },

    #[error("Exposure {index}: unsupported data dimensionality {ndim} (expected 2 or 3)")]
    UnsupportedDimensions { index: usize, ndim: usize },

    #[error("Mapping {index} has {naxis} axes, expected {expected} like the first one")]
    MixedAxes {
        index: usize,
        naxis: usize,
        expected: usize,
    },

    #[error("Exposure {index} has no coordinate mapping")]
    MissingMapping { index: usize },

    #[error(
        "Exposure {index}: mapping grid {mapping:?} does not match the data plane {data:?}"
    )]
    MappingShapeMismatch {
        index: usize,
        mapping: (usize, usize),
        data: (usize, usize),
    },

    #[error("Cannot build a mock mapping: exposure 0 has no RA/DEC or no spaxel size is configured")]
    MockMappingUnavailable,

    #[error("No exposure footprint projects onto the reference frame")]
    DisjointFootprint,

    #[error("Error propagation failed: {0}")]
    Propagation(String),

    #[error(transparent)]
    Wcs(#[from] WcsError),
}

/// Telescope pointing metadata of one exposure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointingInfo {
    /// Archive identifier (`ARCFILE`).
    pub arcfile: Option<String>,
    /// Cumulative RA offset in arcsec.
    pub ra_offset: Option<f64>,
    /// Cumulative Dec offset in arcsec.
    pub dec_offset: Option<f64>,
    /// Exposure time in seconds (`EXPTIME`).
    pub exposure_time: Option<f64>,
    /// Pointing RA in degrees (`RA`).
    pub ra: Option<f64>,
    /// Pointing Dec in degrees (`DEC`).
    pub dec: Option<f64>,
}

/// One calibrated image or data cube.
#[derive(Debug, Clone)]
pub struct Exposure {
    /// Pixel values, shaped `[channel,] y, x`.
    pub data: ArrayD<f32>,
    /// Same shape as `data`; non-zero marks a bad pixel.
    pub mask: ArrayD<u8>,
    pub wcs: Option<Wcs>,
    pub pointing: PointingInfo,
    /// Mapping and pointing cards the exposure was read with.
    pub header: Header,
}

impl Exposure {
    /// Exposure with an all-good mask.
    pub fn new(data: ArrayD<f32>, wcs: Option<Wcs>) -> Self {
        let mask = ArrayD::zeros(data.raw_dim());
        Self {
            data,
            mask,
            wcs,
            pointing: PointingInfo::default(),
            header: Header::new(),
        }
    }

    pub fn with_mask(mut self, mask: ArrayD<u8>) -> Self {
        self.mask = mask;
        self
    }

    pub fn with_pointing(mut self, pointing: PointingInfo) -> Self {
        self.pointing = pointing;
        self
    }

    pub fn with_header(mut self, header: Header) -> Self {
        self.header = header;
        self
    }

    /// Spatial shape `(ny, nx)` of the data.
    pub fn image_shape(&self) -> (usize, usize) {
        let shape = self.data.shape();
        let n = shape.len();
        (shape[n - 2], shape[n - 1])
    }

    /// Data and mask as `[channel, y, x]` cubes; images become one channel.
    fn as_cubes(&self, index: usize) -> Result<(Array3<f32>, Array3<u8>), CombineError> {
        let ndim = self.data.ndim();
        let unsupported = |_| CombineError::UnsupportedDimensions { index, ndim };

        let (data, mask) = if ndim == 2 {
            (
                self.data.view().insert_axis(Axis(0)),
                self.mask.view().insert_axis(Axis(0)),
            )
        } else {
            (self.data.view(), self.mask.view())
        };
        let data = data.into_dimensionality::<Ix3>().map_err(unsupported)?;
        let mask = mask.into_dimensionality::<Ix3>().map_err(unsupported)?;
        Ok((data.to_owned(), mask.to_owned()))
    }
}

/// Output of a combine run.
#[derive(Debug, Clone)]
pub struct CombinedProduct {
    /// Weighted co-add divided by coverage, shaped like `wcs`.
    pub data: ArrayD<f32>,
    /// Number of unmasked contributions per output pixel, plus epsilon.
    pub coverage: ArrayD<f32>,
    pub wcs: Wcs,
    /// Only populated when an [`ErrorPropagation`] was supplied.
    pub error: Option<ArrayD<f32>>,
}

impl CombinedProduct {
    /// Header cards of the combined grid.
    pub fn header(&self) -> Header {
        self.wcs.to_header()
    }
}

/// Extension point for propagating per-exposure uncertainties.
///
/// The combine pipeline hands every exposure, its resampling plan and its
/// weight to the implementation, then asks for the final error array.
pub trait ErrorPropagation {
    fn accumulate(
        &mut self,
        index: usize,
        exposure: &Exposure,
        plan: &ResamplingPlan,
        weight: f32,
    ) -> Result<(), CombineError>;

    /// Final error array, shaped like `coverage`.
    fn finish(&mut self, coverage: &ArrayD<f32>) -> Result<ArrayD<f32>, CombineError>;
}

/// Combine exposures onto the grid covering all of them.
pub fn combine(
    exposures: &[Exposure],
    shifts: Option<&[PixelShift]>,
    config: &CombineConfig,
) -> Result<CombinedProduct, CombineError> {
    run(exposures, shifts, config, None, None)
}

/// Combine exposures onto a fixed target grid.
pub fn combine_onto(
    exposures: &[Exposure],
    shifts: Option<&[PixelShift]>,
    config: &CombineConfig,
    target: &Wcs,
) -> Result<CombinedProduct, CombineError> {
    run(exposures, shifts, config, Some(target), None)
}

/// Combine exposures and populate [`CombinedProduct::error`] through `propagation`.
pub fn combine_with_errors(
    exposures: &[Exposure],
    shifts: Option<&[PixelShift]>,
    config: &CombineConfig,
    target: Option<&Wcs>,
    propagation: &mut dyn ErrorPropagation,
) -> Result<CombinedProduct, CombineError> {
    run(exposures, shifts, config, target, Some(propagation))
}

fn run(
    exposures: &[Exposure],
    shifts: Option<&[PixelShift]>,
    config: &CombineConfig,
    target: Option<&Wcs>,
    mut propagation: Option<&mut dyn ErrorPropagation>,
) -> Result<CombinedProduct, CombineError> {
    validate_exposures(exposures)?;
    if let Some(shifts) = shifts {
        if shifts.len() != exposures.len() {
            return Err(CombineError::ShiftCountMismatch {
                expected: exposures.len(),
                got: shifts.len(),
            });
        }
    }
    let weights = config.weighting.resolve(exposures)?;
    let mappings = resolve_mappings(exposures, shifts, config)?;

    let combined = match target {
        Some(target) => target.clone(),
        None => find_combined_wcs(&mappings, None)?,
    };
    let nchan = combined.nchan();
    let (ny, nx) = combined.image_shape();

    tracing::info!(
        exposures = exposures.len(),
        shape = ?combined.shape(),
        alignment = ?config.alignment,
        "Combining exposures"
    );

    let mut accumulator = Accumulator::new(nchan, ny, nx, config.coverage_epsilon);
    for (index, ((exposure, mapping), &weight)) in
        exposures.iter().zip(&mappings).zip(&weights).enumerate()
    {
        let (mut data, mut mask) = exposure.as_cubes(index)?;
        if data.len_of(Axis(0)) != nchan {
            tracing::warn!(
                index,
                channels = data.len_of(Axis(0)),
                combined = nchan,
                "Combining data with different channel counts"
            );
            (data, mask) = reproject::match_channels(data, mask, nchan);
        }

        prepare_planes(&mut data, &mut mask, config);

        let plan = ResamplingPlan::new(mapping, &combined);
        let (resampled, resampled_mask) = plan.resample_cube(&data, &mask);
        accumulator.add(&resampled, &resampled_mask, weight);

        if let Some(propagation) = propagation.as_deref_mut() {
            propagation.accumulate(index, exposure, &plan, weight)?;
        }

        tracing::debug!(
            index,
            weight,
            masked = mask.iter().filter(|&&m| m != 0).count(),
            "Exposure accumulated"
        );
    }

    tracing::info!(
        contributions = accumulator.contributions(),
        "Exposures accumulated"
    );
    let (data, coverage) = accumulator.finish(combined.is_cube());
    let error = match propagation {
        Some(propagation) => Some(propagation.finish(&coverage)?),
        None => None,
    };

    Ok(CombinedProduct {
        data,
        coverage,
        wcs: combined,
        error,
    })
}

/// Mask, clip, subtract background and zero masked pixels in place.
fn prepare_planes(data: &mut Array3<f32>, mask: &mut Array3<u8>, config: &CombineConfig) {
    ndarray::Zip::from(&*data).and(&mut *mask).for_each(|&v, m| {
        if !v.is_finite() {
            *m = 1;
        }
    });

    if let Some(settings) = &config.sigma_clip {
        let clipped = clip::sigma_clip(data, mask, settings);
        if clipped > 0 {
            tracing::debug!(clipped, "Sigma clipping rejected pixels");
        }
    }

    if config.subtract_background {
        background::subtract_channel_medians(data, mask);
    }

    ndarray::Zip::from(&mut *data).and(&*mask).for_each(|v, &m| {
        if m != 0 {
            *v = 0.0;
        }
    });
}

fn validate_exposures(exposures: &[Exposure]) -> Result<(), CombineError> {
    if exposures.is_empty() {
        return Err(CombineError::NoExposures);
    }

    let expected_ndim = exposures[0].data.ndim();
    for (index, exposure) in exposures.iter().enumerate() {
        let ndim = exposure.data.ndim();
        if ndim != 2 && ndim != 3 {
            return Err(CombineError::UnsupportedDimensions { index, ndim });
        }
        if ndim != expected_ndim {
            return Err(CombineError::MixedAxes {
                index,
                naxis: ndim,
                expected: expected_ndim,
            });
        }
        if exposure.mask.shape() != exposure.data.shape() {
            return Err(CombineError::MaskShapeMismatch {
                index,
                data: exposure.data.shape().to_vec(),
                mask: exposure.mask.shape().to_vec(),
            });
        }
    }
    Ok(())
}

/// Per-exposure mappings with any shift already applied.
fn resolve_mappings(
    exposures: &[Exposure],
    shifts: Option<&[PixelShift]>,
    config: &CombineConfig,
) -> Result<Vec<Wcs>, CombineError> {
    let shift = |index: usize| shifts.map_or(DVec2::ZERO, |shifts| shifts[index]);

    match config.alignment {
        Alignment::Wcs => exposures
            .iter()
            .enumerate()
            .map(|(index, exposure)| {
                let wcs = exposure
                    .wcs
                    .as_ref()
                    .ok_or(CombineError::MissingMapping { index })?;
                if wcs.naxis() != exposure.data.ndim() {
                    return Err(CombineError::MixedAxes {
                        index,
                        naxis: wcs.naxis(),
                        expected: exposure.data.ndim(),
                    });
                }
                if wcs.image_shape() != exposure.image_shape() {
                    return Err(CombineError::MappingShapeMismatch {
                        index,
                        mapping: wcs.image_shape(),
                        data: exposure.image_shape(),
                    });
                }
                Ok(wcs.shifted(-shift(index)))
            })
            .collect(),
        Alignment::PixelShifts => {
            let mock = mock_mapping(&exposures[0], config)?;
            exposures
                .iter()
                .enumerate()
                .map(|(index, exposure)| {
                    let shifted = mock.shifted(shift(index));
                    let wcs = shifted.rebased(
                        shifted.crpix(),
                        shifted.crval(),
                        shifted.spectral().cloned(),
                        exposure.data.shape().to_vec(),
                    )?;
                    Ok(wcs)
                })
                .collect()
        }
    }
}

/// Shared mapping for pixel-shift alignment.
///
/// Uses exposure 0's own mapping when it has one, otherwise a linear mapping
/// centred on the header pointing with the configured spaxel size.
fn mock_mapping(exposure: &Exposure, config: &CombineConfig) -> Result<Wcs, CombineError> {
    if let Some(wcs) = &exposure.wcs {
        return Ok(wcs.clone());
    }

    let (ra, dec, spaxel) = match (
        exposure.pointing.ra,
        exposure.pointing.dec,
        config.mock_spaxel_arcsec,
    ) {
        (Some(ra), Some(dec), Some(spaxel)) => (ra, dec, spaxel),
        _ => return Err(CombineError::MockMappingUnavailable),
    };
    tracing::warn!(ra, dec, spaxel, "Making use of a mock mapping");

    let (ny, nx) = exposure.image_shape();
    let scale = spaxel / 3600.0;
    let wcs = Wcs::new(
        (nx as f64 / 2.0, ny as f64 / 2.0),
        (ra, dec),
        [[scale, 0.0], [0.0, scale]],
        (ny, nx),
    )?
    .with_projection(Projection::Linear);

    if exposure.data.ndim() == 3 {
        let nchan = exposure.data.shape()[0];
        return Ok(wcs.with_spectral(SpectralAxis::wavelength(1.0, 1.0, 1.0), nchan)?);
    }
    Ok(wcs)
}
