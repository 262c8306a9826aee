//! Mosaic - WCS mosaicking and co-addition for VLT/ERIS exposures.
//!
//! This library combines calibrated images and IFU data cubes, each carrying
//! its own world coordinate system, into a single weighted mosaic:
//! - Coordinate mappings between pixel and sky/spectral coordinates
//! - Combined output grid covering the union footprint of all exposures
//! - Flux-conserving reprojection with mask tracking
//! - Sigma clipping, per-channel background subtraction, weighted accumulation
//! - Pointing-offset and drift-based pixel shifts
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use mosaic::{CombineConfig, FitsLayout, combine, fits};
//!
//! let layout = FitsLayout::default();
//! let exposures = paths
//!     .iter()
//!     .map(|p| fits::read_exposure(p, &layout))
//!     .collect::<Result<Vec<_>, _>>()?;
//!
//! let shifts = mosaic::compute_eris_offset(&exposures, None)?;
//! let product = combine(&exposures, Some(&shifts), &CombineConfig::default())?;
//! fits::write_combined("combined.fits", &product)?;
//! ```

pub mod combine;
pub mod config;
mod error;
pub mod fill;
pub mod fits;
pub mod offset;
pub(crate) mod stats;
pub mod wcs;
pub mod weighting;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Coordinate mappings
// ============================================================================

pub use wcs::header::{Header, HeaderValue};
pub use wcs::{PixelToWorld, Projection, SpectralAxis, Wcs, WcsError, pixel_to_pixel};

// ============================================================================
// Combination
// ============================================================================

pub use combine::{
    CombineError, CombinedProduct, ErrorPropagation, Exposure, PixelShift, PointingInfo, combine,
    combine_onto, combine_with_errors, find_combined_wcs,
};
pub use config::{Alignment, CombineConfig, ConfigError, SigmaClipConfig};
pub use weighting::Weighting;

// ============================================================================
// Offsets, fill, I/O
// ============================================================================

pub use error::Error;
pub use fill::{FillError, fill_mask, fill_mask_with_limit};
pub use fits::{FitsError, FitsLayout, OffsetKeywords};
pub use offset::{DriftTable, Drifts, OffsetError, compute_eris_offset, read_eris_drifts};
