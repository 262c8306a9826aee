//! Pixel shifts from telescope pointing offsets and measured drifts.
//!
//! ERIS records the cumulative offset of every exposure in arcseconds. The
//! difference to exposure 0, divided by the exposure's own plate scale, is the
//! nominal pixel shift. Residual drifts measured on a reference source can be
//! added on top, either as a literal per-exposure list or as a table keyed by
//! the `ARCFILE` archive identifier.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use glam::DVec2;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::combine::{Exposure, PixelShift};
use crate::wcs::Wcs;

/// Position a drift-model fit expects the reference source at, in pixels.
pub const DRIFT_CENTER: DVec2 = DVec2::new(32.0, 32.0);

/// Smallest usable |CD1_1| or |CD2_2|, as a fraction of the full axis scale.
const MIN_DIAGONAL_FRACTION: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum OffsetError {
    #[error("Exposure {index} has no {field} pointing offset")]
    MissingPointing { index: usize, field: &'static str },

    #[error("Exposure {index} has no coordinate mapping to read its pixel scale from")]
    MissingMapping { index: usize },

    #[error("Exposure {index} is rotated too far to convert offsets with |CD1_1|, |CD2_2| = {scale}")]
    DegenerateScale { index: usize, scale: DVec2 },

    #[error("Expected {expected} drifts (one per exposure), got {got}")]
    DriftCountMismatch { expected: usize, got: usize },

    #[error("Failed to open drift table {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed drift table")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Deserialize)]
struct DriftRecord {
    #[serde(rename = "ARCFILE")]
    arcfile: String,
    x_model: f64,
    y_model: f64,
}

/// Drift-model positions keyed by archive identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriftTable {
    entries: HashMap<String, Vec<DVec2>>,
}

impl DriftTable {
    /// Parse a CSV table with at least the columns `ARCFILE`, `x_model`, `y_model`.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, OffsetError> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut table = Self::default();
        for record in csv_reader.deserialize::<DriftRecord>() {
            let record = record?;
            table.insert(&record.arcfile, DVec2::new(record.x_model, record.y_model));
        }
        Ok(table)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, OffsetError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|source| OffsetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Record a model position. Inserting an identifier twice makes it ambiguous.
    pub fn insert(&mut self, arcfile: &str, model_position: DVec2) {
        self.entries
            .entry(arcfile.trim().to_string())
            .or_default()
            .push(model_position);
    }

    /// Drift of `arcfile` in pixels, `None` when absent or ambiguous.
    pub fn drift(&self, arcfile: &str) -> Option<DVec2> {
        match self.entries.get(arcfile.trim())?.as_slice() {
            [position] => Some(*position - DRIFT_CENTER),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Extra per-exposure shifts added to the pointing offsets.
#[derive(Debug, Clone, PartialEq)]
pub enum Drifts {
    /// One drift per exposure, in pixels.
    Pixels(Vec<DVec2>),
    /// Looked up by each exposure's archive identifier.
    Table(DriftTable),
}

/// Drift of every archive identifier; misses become zero with a warning.
pub fn read_eris_drifts<S: AsRef<str>>(table: &DriftTable, arcfiles: &[Option<S>]) -> Vec<DVec2> {
    arcfiles
        .iter()
        .enumerate()
        .map(|(index, arcfile)| {
            let arcfile: Option<&str> = arcfile.as_ref().map(|name| name.as_ref());
            match arcfile.and_then(|name| table.drift(name)) {
                Some(drift) => drift,
                None => {
                    warn!(index, arcfile = ?arcfile, "Drift not found, using zero");
                    DVec2::ZERO
                }
            }
        })
        .collect()
}

/// Pixel shift of every exposure relative to exposure 0.
///
/// `shift[i] = (ra[i] - ra[0]) / |CD1_1| , (dec[i] - dec[0]) / |CD2_2|` with
/// offsets and scales in arcsec, each exposure using its own plate scale.
/// Drifts, when given, are added afterwards relative to the drift of
/// exposure 0, so exposure 0 always keeps a zero shift.
pub fn compute_eris_offset(
    exposures: &[Exposure],
    drifts: Option<&Drifts>,
) -> Result<Vec<PixelShift>, OffsetError> {
    let offsets = exposures
        .iter()
        .enumerate()
        .map(|(index, exposure)| pointing_offset(index, exposure))
        .collect::<Result<Vec<_>, _>>()?;

    let Some(&origin) = offsets.first() else {
        return Ok(Vec::new());
    };

    let mut shifts = Vec::with_capacity(exposures.len());
    for (index, (exposure, offset)) in exposures.iter().zip(&offsets).enumerate() {
        let wcs = exposure
            .wcs
            .as_ref()
            .ok_or(OffsetError::MissingMapping { index })?;
        let shift = (*offset - origin) / plate_scale(index, wcs)?;
        debug!(index, dx = shift.x, dy = shift.y, "Pointing offset");
        shifts.push(shift);
    }

    match drifts {
        None => {}
        Some(Drifts::Pixels(pixels)) => {
            if pixels.len() != shifts.len() {
                return Err(OffsetError::DriftCountMismatch {
                    expected: shifts.len(),
                    got: pixels.len(),
                });
            }
            add_relative_drifts(&mut shifts, pixels);
        }
        Some(Drifts::Table(table)) => {
            let arcfiles: Vec<Option<&str>> = exposures
                .iter()
                .map(|e| e.pointing.arcfile.as_deref())
                .collect();
            let pixels = read_eris_drifts(table, &arcfiles);
            add_relative_drifts(&mut shifts, &pixels);
        }
    }

    Ok(shifts)
}

/// Diagonal plate scale in arcsec, rejecting mappings whose diagonal vanishes.
fn plate_scale(index: usize, wcs: &Wcs) -> Result<DVec2, OffsetError> {
    let scale = wcs.diagonal_scale_arcsec();
    let scales = wcs.pixel_scales();
    let full = DVec2::new(scales[0], scales[1]) * 3600.0;
    let usable = scale.is_finite()
        && scale.x > full.x * MIN_DIAGONAL_FRACTION
        && scale.y > full.y * MIN_DIAGONAL_FRACTION;
    if usable {
        Ok(scale)
    } else {
        Err(OffsetError::DegenerateScale { index, scale })
    }
}

fn add_relative_drifts(shifts: &mut [PixelShift], drifts: &[DVec2]) {
    let Some(&reference) = drifts.first() else {
        return;
    };
    for (shift, drift) in shifts.iter_mut().zip(drifts) {
        *shift += *drift - reference;
    }
}

fn pointing_offset(index: usize, exposure: &Exposure) -> Result<DVec2, OffsetError> {
    let ra = exposure
        .pointing
        .ra_offset
        .ok_or(OffsetError::MissingPointing { index, field: "RA" })?;
    let dec = exposure
        .pointing
        .dec_offset
        .ok_or(OffsetError::MissingPointing { index, field: "Dec" })?;
    Ok(DVec2::new(ra, dec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{celestial_wcs, constant_exposure, pointing, SPAXEL_ARCSEC};

    const ARCFILES: [&str; 3] = [
        "ERIS.2023-10-12T03:10:41.512.fits",
        "ERIS.2023-10-12T03:15:02.104.fits",
        "ERIS.2023-10-12T03:19:23.881.fits",
    ];

    fn dithered(offsets: &[(f64, f64)]) -> Vec<Exposure> {
        let wcs = celestial_wcs(8, 8);
        offsets
            .iter()
            .zip(ARCFILES)
            .map(|(&(ra, dec), arcfile)| {
                constant_exposure(&wcs, 1.0).with_pointing(pointing(arcfile, ra, dec, 600.0))
            })
            .collect()
    }

    #[test]
    fn test_identical_offsets_give_zero_shift() {
        let exposures = dithered(&[(1.5, -0.7), (1.5, -0.7)]);
        let shifts = compute_eris_offset(&exposures, None).unwrap();
        assert_eq!(shifts, vec![DVec2::ZERO, DVec2::ZERO]);
    }

    #[test]
    fn test_one_spaxel_offset() {
        let exposures = dithered(&[(0.0, 0.0), (SPAXEL_ARCSEC, 0.0), (0.0, -2.0 * SPAXEL_ARCSEC)]);
        let shifts = compute_eris_offset(&exposures, None).unwrap();

        assert_eq!(shifts[0], DVec2::ZERO);
        assert!((shifts[1] - DVec2::new(1.0, 0.0)).length() < 1e-9);
        assert!((shifts[2] - DVec2::new(0.0, -2.0)).length() < 1e-9);
    }

    #[test]
    fn test_uses_each_exposure_plate_scale() {
        let mut exposures = dithered(&[(0.0, 0.0), (0.5, 0.5)]);
        exposures[1].wcs = Some(
            Wcs::new(
                (4.5, 4.5),
                (150.0, 2.0),
                [[-0.25 / 3600.0, 0.0], [0.0, 0.125 / 3600.0]],
                (8, 8),
            )
            .unwrap(),
        );

        let shifts = compute_eris_offset(&exposures, None).unwrap();
        assert!((shifts[1] - DVec2::new(2.0, 4.0)).length() < 1e-9);
    }

    #[test]
    fn test_quarter_turn_mapping_is_rejected() {
        let mut exposures = dithered(&[(0.0, 0.0), (0.3, 0.0)]);
        exposures[1].wcs = Some(
            Wcs::from_scale_rotation((4.5, 4.5), (150.0, 2.0), SPAXEL_ARCSEC, 90.0, (8, 8))
                .unwrap(),
        );

        assert!(matches!(
            compute_eris_offset(&exposures, None),
            Err(OffsetError::DegenerateScale { index: 1, .. })
        ));

        // A small rotation keeps the diagonal usable
        exposures[1].wcs = Some(
            Wcs::from_scale_rotation((4.5, 4.5), (150.0, 2.0), SPAXEL_ARCSEC, 10.0, (8, 8))
                .unwrap(),
        );
        let shifts = compute_eris_offset(&exposures, None).unwrap();
        assert!(shifts[1].is_finite());
    }

    #[test]
    fn test_missing_pointing_and_mapping() {
        let mut exposures = dithered(&[(0.0, 0.0), (0.1, 0.0)]);
        exposures[1].pointing.dec_offset = None;
        assert!(matches!(
            compute_eris_offset(&exposures, None),
            Err(OffsetError::MissingPointing { index: 1, .. })
        ));

        let mut exposures = dithered(&[(0.0, 0.0), (0.1, 0.0)]);
        exposures[0].wcs = None;
        assert!(matches!(
            compute_eris_offset(&exposures, None),
            Err(OffsetError::MissingMapping { index: 0 })
        ));

        assert!(compute_eris_offset(&[], None).unwrap().is_empty());
    }

    #[test]
    fn test_literal_drifts_are_added_relative_to_first() {
        let exposures = dithered(&[(0.0, 0.0), (SPAXEL_ARCSEC, 0.0)]);
        let drifts = Drifts::Pixels(vec![DVec2::new(0.25, 0.0), DVec2::new(-0.5, 1.0)]);
        let shifts = compute_eris_offset(&exposures, Some(&drifts)).unwrap();

        assert_eq!(shifts[0], DVec2::ZERO);
        assert!((shifts[1] - DVec2::new(0.25, 1.0)).length() < 1e-9);

        let short = Drifts::Pixels(vec![DVec2::ZERO]);
        assert!(matches!(
            compute_eris_offset(&exposures, Some(&short)),
            Err(OffsetError::DriftCountMismatch {
                expected: 2,
                got: 1
            })
        ));
    }

    #[test]
    fn test_drift_table_from_csv() {
        let csv = format!(
            "ARCFILE,x_model,y_model,flux\n{},32.5,31.0,10.0\n{},30.0,32.0,11.0\n",
            ARCFILES[0], ARCFILES[1]
        );
        let table = DriftTable::from_reader(csv.as_bytes()).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.drift(ARCFILES[0]), Some(DVec2::new(0.5, -1.0)));
        assert_eq!(table.drift(ARCFILES[1]), Some(DVec2::new(-2.0, 0.0)));
        assert_eq!(table.drift(ARCFILES[2]), None);
    }

    #[test]
    fn test_drift_table_duplicates_are_misses() {
        let mut table = DriftTable::default();
        table.insert(ARCFILES[0], DVec2::new(33.0, 32.0));
        table.insert(ARCFILES[0], DVec2::new(34.0, 32.0));
        table.insert(ARCFILES[1], DVec2::new(32.0, 33.0));

        let drifts = read_eris_drifts(&table, &[Some(ARCFILES[0]), Some(ARCFILES[1]), None]);
        assert_eq!(
            drifts,
            vec![DVec2::ZERO, DVec2::new(0.0, 1.0), DVec2::ZERO]
        );
    }

    #[test]
    fn test_table_drifts_default_to_zero_on_miss() {
        crate::testing::init_tracing();
        let exposures = dithered(&[(0.0, 0.0), (0.0, 0.0), (0.0, 0.0)]);
        let mut table = DriftTable::default();
        table.insert(ARCFILES[1], DVec2::new(33.0, 31.5));

        let shifts = compute_eris_offset(&exposures, Some(&Drifts::Table(table))).unwrap();
        assert_eq!(
            shifts,
            vec![DVec2::ZERO, DVec2::new(1.0, -0.5), DVec2::ZERO]
        );
    }

    #[test]
    fn test_table_drift_of_first_exposure_is_the_reference() {
        let exposures = dithered(&[(0.0, 0.0), (SPAXEL_ARCSEC, 0.0)]);
        let mut table = DriftTable::default();
        table.insert(ARCFILES[0], DVec2::new(32.5, 31.0));
        table.insert(ARCFILES[1], DVec2::new(33.0, 32.0));

        let shifts = compute_eris_offset(&exposures, Some(&Drifts::Table(table))).unwrap();
        assert_eq!(shifts[0], DVec2::ZERO);
        // One spaxel of pointing plus (1, 0) - (0.5, -1) of drift
        assert!((shifts[1] - DVec2::new(1.5, 1.0)).length() < 1e-9);
    }

    #[test]
    fn test_malformed_table() {
        let err = DriftTable::from_reader("ARCFILE,x_model\nfoo,1.0\n".as_bytes()).unwrap_err();
        assert!(matches!(err, OffsetError::Csv(_)));

        let err = DriftTable::from_path("/nonexistent/drifts.csv").unwrap_err();
        assert!(matches!(err, OffsetError::Io { .. }));
    }
}
