//! World Coordinate System (WCS) for ERIS images and data cubes.
//!
//! Provides transformations between pixel coordinates and sky/spectral
//! coordinates following the FITS WCS standard, restricted to what the ERIS
//! pipeline products use: a celestial pair with gnomonic (or plain linear)
//! projection and an optional linear spectral axis.
//!
//! # Conventions
//!
//! - Pixel coordinates are 0-based: the centre of the first pixel is `0.0`.
//! - Reference pixels (`CRPIXn`) keep the FITS 1-based convention.
//! - Sky coordinates are degrees; the spectral axis uses the header unit.
//! - Shapes are ordered like the data arrays: `[channel,] y, x`.

pub mod header;

use glam::DVec2;
use thiserror::Error;

use self::header::Header;

/// Determinants below this are treated as a degenerate pixel-to-world matrix.
const SINGULAR_DET: f64 = 1e-30;

/// Errors raised while constructing a coordinate mapping.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WcsError {
    #[error("Missing header keyword '{keyword}'")]
    MissingKeyword { keyword: String },

    #[error("Unsupported number of WCS axes: {naxis} (only 2-D images and 3-D cubes)")]
    UnsupportedAxes { naxis: usize },

    #[error("Unsupported celestial projection '{ctype}'")]
    UnsupportedProjection { ctype: String },

    #[error("Pixel-to-world matrix is singular (det = {det:e})")]
    SingularMatrix { det: f64 },

    #[error("Cannot read the step size of the spectral axis (no CD3_3, PC3_3 or CDELT3)")]
    MissingSpectralStep,

    #[error("Shape {shape:?} does not match {naxis} WCS axes")]
    ShapeMismatch { shape: Vec<usize>, naxis: usize },
}

fn missing(keyword: &str) -> WcsError {
    WcsError::MissingKeyword {
        keyword: keyword.to_string(),
    }
}

/// Capability shared by everything that maps pixel indices to world coordinates.
pub trait PixelToWorld {
    /// Number of WCS axes (2 or 3).
    fn naxis(&self) -> usize;

    /// Pixel-grid shape, ordered `[channel,] y, x`.
    fn shape(&self) -> &[usize];

    /// Convert a 0-based pixel position `[x, y(, channel)]` to world coordinates.
    fn pixel_to_world(&self, pixel: &[f64]) -> Vec<f64>;

    /// Convert world coordinates `[ra, dec(, spectral)]` to a 0-based pixel position.
    fn world_to_pixel(&self, world: &[f64]) -> Vec<f64>;
}

/// Convert a pixel position of one mapping into the pixel frame of another.
pub fn pixel_to_pixel<A, B>(from: &A, to: &B, pixel: &[f64]) -> Vec<f64>
where
    A: PixelToWorld + ?Sized,
    B: PixelToWorld + ?Sized,
{
    to.world_to_pixel(&from.pixel_to_world(pixel))
}

/// Projection of the celestial axis pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Projection {
    /// Gnomonic projection (`RA---TAN` / `DEC--TAN`).
    #[default]
    Tan,
    /// No projection code (`RA` / `DEC`): world = CRVAL + CD × offset.
    Linear,
}

impl Projection {
    fn from_ctype(ctype: &str) -> Result<Self, WcsError> {
        let upper = ctype.trim().to_ascii_uppercase();
        match upper.rsplit_once('-') {
            None => Ok(Projection::Linear),
            Some((_, "")) => Ok(Projection::Linear),
            Some((_, "TAN")) => Ok(Projection::Tan),
            Some(_) => Err(WcsError::UnsupportedProjection {
                ctype: ctype.to_string(),
            }),
        }
    }

    fn ctypes(self) -> (&'static str, &'static str) {
        match self {
            Projection::Tan => ("RA---TAN", "DEC--TAN"),
            Projection::Linear => ("RA", "DEC"),
        }
    }
}

/// Linear spectral axis of a data cube.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralAxis {
    /// Reference channel (CRPIX3, 1-based).
    pub crpix: f64,
    /// Spectral value at the reference channel (CRVAL3).
    pub crval: f64,
    /// Per-channel step. `None` when the header carried neither CD3_3 nor PC3_3/CDELT3.
    pub step: Option<f64>,
    pub ctype: String,
    pub cunit: String,
}

impl SpectralAxis {
    /// Wavelength axis in micrometres.
    pub fn wavelength(crpix: f64, crval: f64, step: f64) -> Self {
        Self {
            crpix,
            crval,
            step: Some(step),
            ctype: "WAVE".to_string(),
            cunit: header::MICROMETRE_UNIT.to_string(),
        }
    }

    // FITS default for an absent CDELT.
    fn step_or_default(&self) -> f64 {
        self.step.unwrap_or(1.0)
    }

    pub fn pixel_to_world(&self, channel: f64) -> f64 {
        self.crval + (channel + 1.0 - self.crpix) * self.step_or_default()
    }

    pub fn world_to_pixel(&self, value: f64) -> f64 {
        (value - self.crval) / self.step_or_default() + self.crpix - 1.0
    }
}

/// Coordinate mapping of one exposure or of a combined grid.
///
/// The transformation of the celestial pair is:
///
/// 1. Pixel to intermediate: `(ξ, η) = CD × (x + 1 - CRPIX1, y + 1 - CRPIX2)`
/// 2. Intermediate to sky: de-project from the tangent plane (or add to CRVAL
///    for a linear mapping)
///
/// A cube adds an independent linear spectral axis. Values are immutable once
/// constructed; [`Wcs::shifted`] returns an adjusted copy.
#[derive(Debug, Clone, PartialEq)]
pub struct Wcs {
    crpix: (f64, f64),
    crval: (f64, f64),
    cd: [[f64; 2]; 2],
    projection: Projection,
    spectral: Option<SpectralAxis>,
    shape: Vec<usize>,
}

impl Wcs {
    /// Create a 2-D celestial mapping for an image of `(ny, nx)` pixels.
    pub fn new(
        crpix: (f64, f64),
        crval: (f64, f64),
        cd: [[f64; 2]; 2],
        image_shape: (usize, usize),
    ) -> Result<Self, WcsError> {
        let det = cd[0][0] * cd[1][1] - cd[0][1] * cd[1][0];
        if !det.is_finite() || det.abs() < SINGULAR_DET {
            return Err(WcsError::SingularMatrix { det });
        }

        Ok(Self {
            crpix,
            crval,
            cd,
            projection: Projection::Tan,
            spectral: None,
            shape: vec![image_shape.0, image_shape.1],
        })
    }

    /// Create a mapping from a pixel scale (arcsec/pixel) and position angle (degrees).
    ///
    /// RA increases to the left (east) as in the ERIS products, so the x scale is negative.
    pub fn from_scale_rotation(
        crpix: (f64, f64),
        crval: (f64, f64),
        pixel_scale: f64,
        rotation: f64,
        image_shape: (usize, usize),
    ) -> Result<Self, WcsError> {
        let scale_deg = pixel_scale / 3600.0;
        let (sin_r, cos_r) = rotation.to_radians().sin_cos();
        let cd = [
            [-scale_deg * cos_r, -scale_deg * sin_r],
            [-scale_deg * sin_r, scale_deg * cos_r],
        ];
        Self::new(crpix, crval, cd, image_shape)
    }

    /// Turn an image mapping into a cube mapping with `nchan` channels.
    pub fn with_spectral(mut self, spectral: SpectralAxis, nchan: usize) -> Result<Self, WcsError> {
        if spectral.step == Some(0.0) {
            return Err(WcsError::SingularMatrix { det: 0.0 });
        }
        let (ny, nx) = self.image_shape();
        self.shape = vec![nchan, ny, nx];
        self.spectral = Some(spectral);
        Ok(self)
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    /// Build a mapping from header cards.
    ///
    /// The header is not modified; a `CUNIT3 = 'MICRON'` card is normalised on a copy.
    pub fn from_header(header: &Header) -> Result<Self, WcsError> {
        let mut header = header.clone();
        header.normalize_micron_unit();

        let naxis = header
            .get_i64("WCSAXES")
            .or_else(|| header.get_i64("NAXIS"))
            .ok_or_else(|| missing("NAXIS"))?;
        let naxis = usize::try_from(naxis).map_err(|_| WcsError::UnsupportedAxes { naxis: 0 })?;
        if naxis != 2 && naxis != 3 {
            return Err(WcsError::UnsupportedAxes { naxis });
        }

        let axis_len = |i: usize| -> Result<usize, WcsError> {
            let keyword = format!("NAXIS{}", i);
            header
                .get_i64(&keyword)
                .and_then(|n| usize::try_from(n).ok())
                .filter(|&n| n > 0)
                .ok_or_else(|| missing(&keyword))
        };
        let nx = axis_len(1)?;
        let ny = axis_len(2)?;

        let ctype1 = header.get_str("CTYPE1").unwrap_or("RA---TAN");
        let projection = Projection::from_ctype(ctype1)?;

        let crpix = (
            header.get_f64("CRPIX1").unwrap_or(0.0),
            header.get_f64("CRPIX2").unwrap_or(0.0),
        );
        let crval = (
            header.get_f64("CRVAL1").unwrap_or(0.0),
            header.get_f64("CRVAL2").unwrap_or(0.0),
        );
        let cd = read_celestial_matrix(&header)?;

        let wcs = Self::new(crpix, crval, cd, (ny, nx))?.with_projection(projection);
        if naxis == 2 {
            return Ok(wcs);
        }

        let spectral = SpectralAxis {
            crpix: header.get_f64("CRPIX3").unwrap_or(0.0),
            crval: header.get_f64("CRVAL3").unwrap_or(0.0),
            step: read_spectral_step(&header),
            ctype: header.get_str("CTYPE3").unwrap_or("WAVE").trim().to_string(),
            cunit: header.get_str("CUNIT3").unwrap_or("").trim().to_string(),
        };
        wcs.with_spectral(spectral, axis_len(3)?)
    }

    /// Header cards describing this mapping.
    ///
    /// The linear terms are written in CD form, with `CDELTn` mirroring the
    /// diagonal for readers that only look at CDELT.
    pub fn to_header(&self) -> Header {
        let (ctype1, ctype2) = self.projection.ctypes();
        let mut header = Header::new().with("NAXIS", self.naxis());
        header.set("NAXIS1", self.nx());
        header.set("NAXIS2", self.ny());
        if self.spectral.is_some() {
            header.set("NAXIS3", self.nchan());
        }
        header.set("WCSAXES", self.naxis());

        header.set("CTYPE1", ctype1);
        header.set("CTYPE2", ctype2);
        header.set("CUNIT1", "deg");
        header.set("CUNIT2", "deg");
        header.set("CRPIX1", self.crpix.0);
        header.set("CRPIX2", self.crpix.1);
        header.set("CRVAL1", self.crval.0);
        header.set("CRVAL2", self.crval.1);
        header.set("CD1_1", self.cd[0][0]);
        header.set("CD1_2", self.cd[0][1]);
        header.set("CD2_1", self.cd[1][0]);
        header.set("CD2_2", self.cd[1][1]);
        header.set("CDELT1", self.cd[0][0]);
        header.set("CDELT2", self.cd[1][1]);

        if let Some(spectral) = &self.spectral {
            header.set("CTYPE3", spectral.ctype.as_str());
            header.set("CUNIT3", spectral.cunit.as_str());
            header.set("CRPIX3", spectral.crpix);
            header.set("CRVAL3", spectral.crval);
            if let Some(step) = spectral.step {
                header.set("CD3_3", step);
                header.set("CDELT3", step);
            }
        }
        header
    }

    pub fn crpix(&self) -> (f64, f64) {
        self.crpix
    }

    pub fn crval(&self) -> (f64, f64) {
        self.crval
    }

    pub fn cd(&self) -> [[f64; 2]; 2] {
        self.cd
    }

    pub fn projection(&self) -> Projection {
        self.projection
    }

    pub fn spectral(&self) -> Option<&SpectralAxis> {
        self.spectral.as_ref()
    }

    pub fn is_cube(&self) -> bool {
        self.spectral.is_some()
    }

    pub fn nx(&self) -> usize {
        self.shape[self.shape.len() - 1]
    }

    pub fn ny(&self) -> usize {
        self.shape[self.shape.len() - 2]
    }

    /// Number of spectral channels; 1 for an image.
    pub fn nchan(&self) -> usize {
        if self.is_cube() { self.shape[0] } else { 1 }
    }

    /// Spatial shape `(ny, nx)`.
    pub fn image_shape(&self) -> (usize, usize) {
        (self.ny(), self.nx())
    }

    /// Copy of this mapping with the reference pixel moved by `shift` (x, y).
    pub fn shifted(&self, shift: DVec2) -> Self {
        let mut wcs = self.clone();
        wcs.crpix = (self.crpix.0 + shift.x, self.crpix.1 + shift.y);
        wcs
    }

    /// Copy of this mapping re-anchored on a new reference point and grid.
    pub(crate) fn rebased(
        &self,
        crpix: (f64, f64),
        crval: (f64, f64),
        spectral: Option<SpectralAxis>,
        shape: Vec<usize>,
    ) -> Result<Self, WcsError> {
        let naxis = if spectral.is_some() { 3 } else { 2 };
        if shape.len() != naxis {
            return Err(WcsError::ShapeMismatch { shape, naxis });
        }
        let mut wcs = self.clone();
        wcs.crpix = crpix;
        wcs.crval = crval;
        wcs.spectral = spectral;
        wcs.shape = shape;
        Ok(wcs)
    }

    /// Convert a 0-based pixel position to sky coordinates (RA, Dec in degrees).
    pub fn pixel_to_sky(&self, x: f64, y: f64) -> (f64, f64) {
        let dx = x + 1.0 - self.crpix.0;
        let dy = y + 1.0 - self.crpix.1;

        let xi = self.cd[0][0] * dx + self.cd[0][1] * dy;
        let eta = self.cd[1][0] * dx + self.cd[1][1] * dy;

        match self.projection {
            Projection::Linear => (self.crval.0 + xi, self.crval.1 + eta),
            Projection::Tan => {
                let xi_rad = xi.to_radians();
                let eta_rad = eta.to_radians();
                let ra0 = self.crval.0.to_radians();
                let dec0 = self.crval.1.to_radians();

                // De-project from tangent plane (gnomonic projection inverse)
                let (sin_dec0, cos_dec0) = dec0.sin_cos();
                let denom = cos_dec0 - eta_rad * sin_dec0;

                let ra = ra0 + xi_rad.atan2(denom);
                let dec = (sin_dec0 + eta_rad * cos_dec0).atan2(xi_rad.hypot(denom));

                (ra.to_degrees().rem_euclid(360.0), dec.to_degrees())
            }
        }
    }

    /// Convert sky coordinates (RA, Dec in degrees) to a 0-based pixel position.
    ///
    /// Points on the far side of the tangent plane map to NaN.
    pub fn sky_to_pixel(&self, ra: f64, dec: f64) -> (f64, f64) {
        let (xi, eta) = match self.projection {
            Projection::Linear => (ra - self.crval.0, dec - self.crval.1),
            Projection::Tan => {
                let ra_rad = ra.to_radians();
                let dec_rad = dec.to_radians();
                let ra0 = self.crval.0.to_radians();
                let dec0 = self.crval.1.to_radians();

                let (sin_dec, cos_dec) = dec_rad.sin_cos();
                let (sin_dec0, cos_dec0) = dec0.sin_cos();
                let (sin_dra, cos_dra) = (ra_rad - ra0).sin_cos();

                let d = sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_dra;
                if d <= 0.0 {
                    return (f64::NAN, f64::NAN);
                }

                let xi_rad = cos_dec * sin_dra / d;
                let eta_rad = (sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_dra) / d;
                (xi_rad.to_degrees(), eta_rad.to_degrees())
            }
        };

        // Invert CD matrix: solve CD * (dx, dy) = (xi, eta)
        let det = self.cd[0][0] * self.cd[1][1] - self.cd[0][1] * self.cd[1][0];
        let dx = (self.cd[1][1] * xi - self.cd[0][1] * eta) / det;
        let dy = (-self.cd[1][0] * xi + self.cd[0][0] * eta) / det;

        (self.crpix.0 - 1.0 + dx, self.crpix.1 - 1.0 + dy)
    }

    /// Projection-plane pixel scales: `[x, y(, spectral)]`, degrees for the celestial axes.
    pub fn pixel_scales(&self) -> Vec<f64> {
        let scale_x = self.cd[0][0].hypot(self.cd[1][0]);
        let scale_y = self.cd[0][1].hypot(self.cd[1][1]);
        let mut scales = vec![scale_x, scale_y];
        if let Some(spectral) = &self.spectral {
            scales.push(spectral.step_or_default().abs());
        }
        scales
    }

    /// Absolute CD1_1 and CD2_2 in arcseconds per pixel.
    pub fn diagonal_scale_arcsec(&self) -> DVec2 {
        DVec2::new(self.cd[0][0].abs(), self.cd[1][1].abs()) * 3600.0
    }

    /// Sky coordinates of the grid centre.
    pub fn center(&self) -> (f64, f64) {
        self.pixel_to_sky(
            (self.nx() as f64 - 1.0) / 2.0,
            (self.ny() as f64 - 1.0) / 2.0,
        )
    }
}

impl PixelToWorld for Wcs {
    fn naxis(&self) -> usize {
        self.shape.len()
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn pixel_to_world(&self, pixel: &[f64]) -> Vec<f64> {
        let (ra, dec) = self.pixel_to_sky(pixel[0], pixel[1]);
        let mut world = vec![ra, dec];
        if let Some(spectral) = &self.spectral {
            world.push(spectral.pixel_to_world(pixel.get(2).copied().unwrap_or(0.0)));
        }
        world
    }

    fn world_to_pixel(&self, world: &[f64]) -> Vec<f64> {
        let (x, y) = self.sky_to_pixel(world[0], world[1]);
        let mut pixel = vec![x, y];
        if let Some(spectral) = &self.spectral {
            let value = world.get(2).copied().unwrap_or(spectral.crval);
            pixel.push(spectral.world_to_pixel(value));
        }
        pixel
    }
}

/// Celestial CD block: CDi_j when any is present, otherwise PCi_j × CDELTi.
fn read_celestial_matrix(header: &Header) -> Result<[[f64; 2]; 2], WcsError> {
    let key = |prefix: &str, i: usize, j: usize| format!("{}{}_{}", prefix, i + 1, j + 1);
    let pairs = [(0, 0), (0, 1), (1, 0), (1, 1)];

    let mut cd = [[0.0; 2]; 2];
    if pairs.iter().any(|&(i, j)| header.contains(&key("CD", i, j))) {
        for (i, j) in pairs {
            cd[i][j] = header.get_f64(&key("CD", i, j)).unwrap_or(0.0);
        }
        return Ok(cd);
    }

    let has_pc = pairs.iter().any(|&(i, j)| header.contains(&key("PC", i, j)));
    if !has_pc && !header.contains("CDELT1") && !header.contains("CDELT2") {
        return Err(missing("CD1_1"));
    }

    for (i, j) in pairs {
        let identity = if i == j { 1.0 } else { 0.0 };
        let pc = header.get_f64(&key("PC", i, j)).unwrap_or(identity);
        let cdelt = header
            .get_f64(&format!("CDELT{}", i + 1))
            .unwrap_or(1.0);
        cd[i][j] = cdelt * pc;
    }
    Ok(cd)
}

/// Spectral step from CD3_3, falling back to PC3_3 × CDELT3.
fn read_spectral_step(header: &Header) -> Option<f64> {
    if let Some(step) = header.get_f64("CD3_3") {
        return Some(step);
    }
    let pc = header.get_f64("PC3_3");
    let cdelt = header.get_f64("CDELT3");
    if pc.is_none() && cdelt.is_none() {
        return None;
    }
    Some(pc.unwrap_or(1.0) * cdelt.unwrap_or(1.0))
}

#[cfg(test)]
mod tests;
