use thiserror::Error as ThisError;

use crate::combine::CombineError;
use crate::config::ConfigError;
use crate::fill::FillError;
use crate::fits::FitsError;
use crate::offset::OffsetError;
use crate::wcs::WcsError;

/// Any error produced by the mosaic pipeline.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error(transparent)]
    Wcs(#[from] WcsError),

    #[error(transparent)]
    Combine(#[from] CombineError),

    #[error(transparent)]
    Offset(#[from] OffsetError),

    #[error(transparent)]
    Fill(#[from] FillError),

    #[error(transparent)]
    Fits(#[from] FitsError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
