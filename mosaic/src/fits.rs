//! Reading ERIS exposures from FITS files and writing combined products.
//!
//! ERIS pipeline products keep the pixel data in a `DATA` extension whose header
//! carries the coordinate mapping, an optional `DQI` quality extension (non-zero
//! marks a bad pixel) and the pointing metadata in the primary header.

use std::path::{Path, PathBuf};

use fitsio::hdu::{FitsHdu, HduInfo};
use fitsio::images::{ImageDescription, ImageType};
use fitsio::FitsFile;
use ndarray::{ArrayD, IxDyn};
use thiserror::Error;
use tracing::{debug, info};

use crate::combine::{CombinedProduct, Exposure, PointingInfo};
use crate::wcs::header::{Header, HeaderValue};
use crate::wcs::{Wcs, WcsError};

/// Value of the `OBSERVER` card written to combined products.
pub const OBSERVER: &str = "MPE-IR";

/// Value of the `ORIGIN` card written to combined products.
pub const ORIGIN: &str = "mosaic";

#[derive(Debug, Error)]
pub enum FitsError {
    #[error("FITS I/O error on {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: fitsio::errors::Error,
    },

    #[error("HDU '{hdu}' of {} is not an image", .path.display())]
    NotAnImage { path: PathBuf, hdu: String },

    #[error(
        "HDU '{hdu}' of {} holds {got} values, its shape {shape:?} needs {expected}",
        .path.display()
    )]
    SizeMismatch {
        path: PathBuf,
        hdu: String,
        shape: Vec<usize>,
        expected: usize,
        got: usize,
    },

    #[error("Mask shape {mask:?} does not match data shape {data:?} in {}", .path.display())]
    MaskShapeMismatch {
        path: PathBuf,
        data: Vec<usize>,
        mask: Vec<usize>,
    },

    #[error("Invalid coordinate mapping in {}", .path.display())]
    Wcs {
        path: PathBuf,
        #[source]
        source: WcsError,
    },
}

/// Header keywords the pointing metadata is read from.
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetKeywords {
    pub ra_offset: String,
    pub dec_offset: String,
    pub arcfile: String,
    pub exposure_time: String,
    pub ra: String,
    pub dec: String,
}

impl Default for OffsetKeywords {
    fn default() -> Self {
        Self {
            ra_offset: "HIERARCH ESO OCS CUMOFFS RA".to_string(),
            dec_offset: "HIERARCH ESO OCS CUMOFFS DEC".to_string(),
            arcfile: "ARCFILE".to_string(),
            exposure_time: "EXPTIME".to_string(),
            ra: "RA".to_string(),
            dec: "DEC".to_string(),
        }
    }
}

/// Where an exposure's pieces live inside its FITS file.
#[derive(Debug, Clone, PartialEq)]
pub struct FitsLayout {
    /// Image extension holding the data and the mapping header.
    pub data_ext: String,
    /// Quality extension; `None` or a missing HDU means an all-good mask.
    pub mask_ext: Option<String>,
    /// HDU with the pointing metadata; `None` is the primary HDU.
    pub header_ext: Option<String>,
    pub keywords: OffsetKeywords,
}

impl Default for FitsLayout {
    fn default() -> Self {
        Self {
            data_ext: "DATA".to_string(),
            mask_ext: Some("DQI".to_string()),
            header_ext: None,
            keywords: OffsetKeywords::default(),
        }
    }
}

impl FitsLayout {
    pub fn with_data_ext(mut self, name: &str) -> Self {
        self.data_ext = name.to_string();
        self
    }

    pub fn with_mask_ext(mut self, name: Option<&str>) -> Self {
        self.mask_ext = name.map(str::to_string);
        self
    }

    pub fn with_header_ext(mut self, name: Option<&str>) -> Self {
        self.header_ext = name.map(str::to_string);
        self
    }

    pub fn with_keywords(mut self, keywords: OffsetKeywords) -> Self {
        self.keywords = keywords;
        self
    }
}

/// Integer cards of the mapping header.
const INT_KEYWORDS: [&str; 5] = ["NAXIS", "NAXIS1", "NAXIS2", "NAXIS3", "WCSAXES"];

/// String cards of the mapping header.
const STR_KEYWORDS: [&str; 6] = ["CTYPE1", "CTYPE2", "CTYPE3", "CUNIT1", "CUNIT2", "CUNIT3"];

/// Floating-point cards of the mapping header.
const FLOAT_KEYWORDS: [&str; 20] = [
    "CRPIX1", "CRPIX2", "CRPIX3", "CRVAL1", "CRVAL2", "CRVAL3", "CD1_1", "CD1_2", "CD2_1",
    "CD2_2", "CD3_3", "PC1_1", "PC1_2", "PC2_1", "PC2_2", "PC3_3", "CDELT1", "CDELT2", "CDELT3",
    "EQUINOX",
];

/// Cards managed by cfitsio itself when an image HDU is created.
const STRUCTURAL_KEYWORDS: [&str; 7] = [
    "SIMPLE", "BITPIX", "NAXIS", "NAXIS1", "NAXIS2", "NAXIS3", "EXTEND",
];

/// Load data, mask, mapping and pointing of one exposure.
///
/// A mapping header that cannot be interpreted is an error; the pointing cards
/// are optional.
pub fn read_exposure(path: impl AsRef<Path>, layout: &FitsLayout) -> Result<Exposure, FitsError> {
    let path = path.as_ref();
    let io = |source| FitsError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut fptr = FitsFile::open(path).map_err(io)?;

    let data_hdu = fptr.hdu(layout.data_ext.as_str()).map_err(io)?;
    let (shape, values) = read_f32_image(&mut fptr, &data_hdu, path, &layout.data_ext)?;
    let data = to_array(values, &shape, path, &layout.data_ext)?;

    let mask = match &layout.mask_ext {
        Some(name) => match fptr.hdu(name.as_str()) {
            Ok(hdu) => read_mask(&mut fptr, &hdu, path, name, &shape)?,
            Err(_) => {
                debug!(path = %path.display(), hdu = %name, "No quality extension, all pixels good");
                ArrayD::zeros(IxDyn(&shape))
            }
        },
        None => ArrayD::zeros(IxDyn(&shape)),
    };

    let mut header = read_mapping_header(&mut fptr, &data_hdu);
    let wcs = Wcs::from_header(&header).map_err(|source| FitsError::Wcs {
        path: path.to_path_buf(),
        source,
    })?;

    let pointing_hdu = match &layout.header_ext {
        Some(name) => fptr.hdu(name.as_str()).map_err(io)?,
        None => fptr.primary_hdu().map_err(io)?,
    };
    let pointing = read_pointing(&mut fptr, &pointing_hdu, &layout.keywords);
    record_pointing(&mut header, &pointing, &layout.keywords);

    debug!(
        path = %path.display(),
        shape = ?shape,
        arcfile = ?pointing.arcfile,
        "Exposure loaded"
    );

    Ok(Exposure::new(data, Some(wcs))
        .with_mask(mask)
        .with_pointing(pointing)
        .with_header(header))
}

/// Write a combined product, replacing any existing file.
///
/// The primary HDU holds no data, only the combined mapping and provenance
/// cards; the data goes to an image extension named `DATA` with the same cards.
pub fn write_combined(path: impl AsRef<Path>, product: &CombinedProduct) -> Result<(), FitsError> {
    let path = path.as_ref();
    let io = |source| FitsError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut header = product.header();
    header.set("OBSERVER", OBSERVER);
    header.set("ORIGIN", ORIGIN);

    let mut fptr = FitsFile::create(path).overwrite().open().map_err(io)?;

    let primary = fptr.primary_hdu().map_err(io)?;
    write_cards(&mut fptr, &primary, &header).map_err(io)?;

    let description = ImageDescription {
        data_type: ImageType::Float,
        dimensions: product.data.shape(),
    };
    let data_hdu = fptr.create_image("DATA", &description).map_err(io)?;
    let values: Vec<f32> = product.data.iter().copied().collect();
    data_hdu.write_image(&mut fptr, &values).map_err(io)?;
    write_cards(&mut fptr, &data_hdu, &header).map_err(io)?;

    info!(path = %path.display(), shape = ?product.data.shape(), "Combined product written");
    Ok(())
}

fn image_shape(hdu: &FitsHdu, path: &Path, name: &str) -> Result<Vec<usize>, FitsError> {
    match &hdu.info {
        HduInfo::ImageInfo { shape, .. } if !shape.is_empty() => Ok(shape.clone()),
        _ => Err(FitsError::NotAnImage {
            path: path.to_path_buf(),
            hdu: name.to_string(),
        }),
    }
}

fn read_f32_image(
    fptr: &mut FitsFile,
    hdu: &FitsHdu,
    path: &Path,
    name: &str,
) -> Result<(Vec<usize>, Vec<f32>), FitsError> {
    let shape = image_shape(hdu, path, name)?;
    let values: Vec<f32> = hdu.read_image(fptr).map_err(|source| FitsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((shape, values))
}

fn to_array<T>(
    values: Vec<T>,
    shape: &[usize],
    path: &Path,
    name: &str,
) -> Result<ArrayD<T>, FitsError> {
    let expected = shape.iter().product();
    let got = values.len();
    ArrayD::from_shape_vec(IxDyn(shape), values).map_err(|_| FitsError::SizeMismatch {
        path: path.to_path_buf(),
        hdu: name.to_string(),
        shape: shape.to_vec(),
        expected,
        got,
    })
}

fn read_mask(
    fptr: &mut FitsFile,
    hdu: &FitsHdu,
    path: &Path,
    name: &str,
    data_shape: &[usize],
) -> Result<ArrayD<u8>, FitsError> {
    let shape = image_shape(hdu, path, name)?;
    if shape != data_shape {
        return Err(FitsError::MaskShapeMismatch {
            path: path.to_path_buf(),
            data: data_shape.to_vec(),
            mask: shape,
        });
    }
    let values: Vec<i32> = hdu.read_image(fptr).map_err(|source| FitsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let flags = values.into_iter().map(|v| u8::from(v != 0)).collect();
    to_array(flags, &shape, path, name)
}

fn read_mapping_header(fptr: &mut FitsFile, hdu: &FitsHdu) -> Header {
    let mut header = Header::new();
    for keyword in INT_KEYWORDS {
        if let Ok(value) = hdu.read_key::<i64>(fptr, keyword) {
            header.set(keyword, value);
        }
    }
    for keyword in STR_KEYWORDS {
        if let Ok(value) = hdu.read_key::<String>(fptr, keyword) {
            header.set(keyword, value);
        }
    }
    for keyword in FLOAT_KEYWORDS {
        if let Ok(value) = hdu.read_key::<f64>(fptr, keyword) {
            header.set(keyword, value);
        }
    }
    header
}

fn read_pointing(fptr: &mut FitsFile, hdu: &FitsHdu, keywords: &OffsetKeywords) -> PointingInfo {
    let mut float = |keyword: &str| hdu.read_key::<f64>(fptr, keyword).ok();
    let ra_offset = float(&keywords.ra_offset);
    let dec_offset = float(&keywords.dec_offset);
    let exposure_time = float(&keywords.exposure_time);
    let ra = float(&keywords.ra);
    let dec = float(&keywords.dec);

    PointingInfo {
        arcfile: hdu
            .read_key::<String>(fptr, &keywords.arcfile)
            .ok()
            .map(|s| s.trim().to_string()),
        ra_offset,
        dec_offset,
        exposure_time,
        ra,
        dec,
    }
}

fn record_pointing(header: &mut Header, pointing: &PointingInfo, keywords: &OffsetKeywords) {
    if let Some(arcfile) = &pointing.arcfile {
        header.set(&keywords.arcfile, arcfile.as_str());
    }
    let floats = [
        (&keywords.ra_offset, pointing.ra_offset),
        (&keywords.dec_offset, pointing.dec_offset),
        (&keywords.exposure_time, pointing.exposure_time),
        (&keywords.ra, pointing.ra),
        (&keywords.dec, pointing.dec),
    ];
    for (keyword, value) in floats {
        if let Some(value) = value {
            header.set(keyword, value);
        }
    }
}

fn write_cards(
    fptr: &mut FitsFile,
    hdu: &FitsHdu,
    header: &Header,
) -> Result<(), fitsio::errors::Error> {
    for (keyword, value) in header.iter() {
        if STRUCTURAL_KEYWORDS.contains(&keyword) {
            continue;
        }
        match value {
            HeaderValue::Int(v) => hdu.write_key(fptr, keyword, *v)?,
            HeaderValue::Float(v) => hdu.write_key(fptr, keyword, *v)?,
            HeaderValue::Str(v) => hdu.write_key(fptr, keyword, v.as_str())?,
            HeaderValue::Bool(v) => hdu.write_key(fptr, keyword, i64::from(*v))?,
        }
    }
    Ok(())
}
