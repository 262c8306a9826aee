//! Per-exposure weights.

use serde::{Deserialize, Serialize};

use crate::combine::{CombineError, Exposure};

/// How each exposure's contribution is weighted in the co-add.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weighting {
    /// `1 / N` for every exposure.
    #[default]
    Uniform,
    /// One weight per exposure, used as given.
    Explicit(Vec<f32>),
    /// `EXPTIME[i] / Σ EXPTIME`.
    ExposureTime,
}

impl Weighting {
    /// Weight vector for `exposures`.
    ///
    /// Fails on a length mismatch, a negative or non-finite weight, a missing
    /// exposure time, or a zero total exposure time.
    pub fn resolve(&self, exposures: &[Exposure]) -> Result<Vec<f32>, CombineError> {
        let n = exposures.len();
        if n == 0 {
            return Err(CombineError::NoExposures);
        }

        let weights = match self {
            Weighting::Uniform => vec![1.0 / n as f32; n],
            Weighting::Explicit(weights) => {
                if weights.len() != n {
                    return Err(CombineError::WeightCountMismatch {
                        expected: n,
                        got: weights.len(),
                    });
                }
                weights.clone()
            }
            Weighting::ExposureTime => exposure_time_weights(exposures)?,
        };

        if let Some((index, &weight)) = weights
            .iter()
            .enumerate()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(CombineError::InvalidWeight { index, weight });
        }
        Ok(weights)
    }
}

fn exposure_time_weights(exposures: &[Exposure]) -> Result<Vec<f32>, CombineError> {
    let times = exposures
        .iter()
        .enumerate()
        .map(|(index, exposure)| {
            exposure
                .pointing
                .exposure_time
                .ok_or(CombineError::MissingExposureTime { index })
        })
        .collect::<Result<Vec<f64>, _>>()?;

    let total: f64 = times.iter().sum();
    if total == 0.0 {
        return Err(CombineError::ZeroTotalExposureTime);
    }
    Ok(times.iter().map(|t| (t / total) as f32).collect())
}
