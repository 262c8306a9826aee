//! Combine configuration.
//!
//! All settings have defaults matching the ERIS reduction scripts and can be
//! loaded from YAML:
//!
//! ```yaml
//! weighting: exposure_time
//! sigma_clip:
//!   sigma: 3.0
//!   iterations: 5
//! subtract_background: true
//! alignment: wcs
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::weighting::Weighting;

/// Coverage value every output pixel starts from.
pub const DEFAULT_COVERAGE_EPSILON: f32 = 1e-8;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid combine config")]
    Parse(#[from] serde_yml::Error),
}

/// How exposures are placed relative to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    /// Each exposure's own coordinate mapping, corrected by the pixel shifts.
    #[default]
    Wcs,
    /// One shared mapping (exposure 0's) offset by the pixel shifts.
    PixelShifts,
}

/// Iterative sigma clipping around the median.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigmaClipConfig {
    /// Rejection threshold in standard deviations.
    pub sigma: f32,
    /// Maximum number of clipping rounds.
    pub iterations: u32,
}

impl Default for SigmaClipConfig {
    fn default() -> Self {
        Self {
            sigma: 3.0,
            iterations: 5,
        }
    }
}

impl SigmaClipConfig {
    pub fn new(sigma: f32, iterations: u32) -> Self {
        Self { sigma, iterations }
    }

    pub fn with_sigma(mut self, sigma: f32) -> Self {
        self.sigma = sigma;
        self
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }
}

/// Settings of one combine call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombineConfig {
    pub weighting: Weighting,
    /// `None` disables sigma clipping.
    pub sigma_clip: Option<SigmaClipConfig>,
    /// Subtract the masked median of every channel before reprojection.
    pub subtract_background: bool,
    pub alignment: Alignment,
    /// Spaxel size (arcsec) of the mock mapping used when exposure 0 has none.
    pub mock_spaxel_arcsec: Option<f64>,
    pub coverage_epsilon: f32,
}

impl Default for CombineConfig {
    fn default() -> Self {
        Self {
            weighting: Weighting::default(),
            sigma_clip: Some(SigmaClipConfig::default()),
            subtract_background: true,
            alignment: Alignment::default(),
            mock_spaxel_arcsec: None,
            coverage_epsilon: DEFAULT_COVERAGE_EPSILON,
        }
    }
}

impl CombineConfig {
    /// Plain co-add: no clipping, no background subtraction.
    pub fn plain() -> Self {
        Self {
            sigma_clip: None,
            subtract_background: false,
            ..Self::default()
        }
    }

    pub fn with_weighting(mut self, weighting: Weighting) -> Self {
        self.weighting = weighting;
        self
    }

    pub fn with_sigma_clip(mut self, sigma_clip: Option<SigmaClipConfig>) -> Self {
        self.sigma_clip = sigma_clip;
        self
    }

    pub fn with_background_subtraction(mut self, enabled: bool) -> Self {
        self.subtract_background = enabled;
        self
    }

    pub fn with_alignment(mut self, alignment: Alignment) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn with_mock_spaxel(mut self, arcsec: f64) -> Self {
        self.mock_spaxel_arcsec = Some(arcsec);
        self
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yml::from_str(yaml)?)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yml::to_string(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }
}
