//! Forecast result structures.

use crate::catalog::SeriesId;
use crate::error::{ForecastError, Result};
use crate::utils::stats::empirical_quantile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Distribution summary of a multi-step forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ForecastDistribution {
    /// Values at fixed probability levels: `values[level][step]`.
    Quantiles {
        levels: Vec<f64>,
        values: Vec<Vec<f64>>,
    },
    /// Simulated paths: `paths[sample][step]`.
    Samples { paths: Vec<Vec<f64>> },
}

impl ForecastDistribution {
    /// Number of forecast steps.
    pub fn horizon(&self) -> usize {
        match self {
            ForecastDistribution::Quantiles { values, .. } => {
                values.first().map(Vec::len).unwrap_or(0)
            }
            ForecastDistribution::Samples { paths } => paths.first().map(Vec::len).unwrap_or(0),
        }
    }

    /// Per-step values at probability `level`.
    ///
    /// Sample bags answer with empirical quantiles; quantile summaries only
    /// answer for levels they hold.
    pub fn quantile(&self, level: f64) -> Option<Vec<f64>> {
        match self {
            ForecastDistribution::Quantiles { levels, values } => levels
                .iter()
                .position(|l| (l - level).abs() < 1e-9)
                .map(|i| values[i].clone()),
            ForecastDistribution::Samples { paths } => {
                if paths.is_empty() {
                    return None;
                }
                Some(
                    (0..self.horizon())
                        .map(|t| {
                            let column: Vec<f64> = paths.iter().map(|p| p[t]).collect();
                            empirical_quantile(&column, level)
                        })
                        .collect(),
                )
            }
        }
    }

    /// Convert to a quantile summary at `levels`.
    pub fn to_quantiles(&self, levels: &[f64]) -> Result<ForecastDistribution> {
        let values = levels
            .iter()
            .map(|&l| {
                self.quantile(l).ok_or_else(|| {
                    ForecastError::InvalidParameter(format!("quantile level {l} is not available"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ForecastDistribution::Quantiles {
            levels: levels.to_vec(),
            values,
        })
    }

    /// Keep the first `steps` steps.
    pub fn truncated(&self, steps: usize) -> ForecastDistribution {
        let cut = |rows: &[Vec<f64>]| -> Vec<Vec<f64>> {
            rows.iter()
                .map(|r| r[..steps.min(r.len())].to_vec())
                .collect()
        };
        match self {
            ForecastDistribution::Quantiles { levels, values } => ForecastDistribution::Quantiles {
                levels: levels.clone(),
                values: cut(values),
            },
            ForecastDistribution::Samples { paths } => {
                ForecastDistribution::Samples { paths: cut(paths) }
            }
        }
    }
}

/// A probabilistic forecast for one series, reconciled to its calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    series_id: SeriesId,
    timestamps: Vec<DateTime<Utc>>,
    mean: Vec<f64>,
    distribution: ForecastDistribution,
}

impl Forecast {
    /// Create a forecast. Timestamps, mean and distribution must share one
    /// horizon.
    pub fn new(
        series_id: SeriesId,
        timestamps: Vec<DateTime<Utc>>,
        mean: Vec<f64>,
        distribution: ForecastDistribution,
    ) -> Result<Self> {
        if mean.len() != timestamps.len() {
            return Err(ForecastError::DimensionMismatch {
                expected: timestamps.len(),
                got: mean.len(),
            });
        }
        if distribution.horizon() != timestamps.len() {
            return Err(ForecastError::DimensionMismatch {
                expected: timestamps.len(),
                got: distribution.horizon(),
            });
        }
        Ok(Self {
            series_id,
            timestamps,
            mean,
            distribution,
        })
    }

    pub fn series_id(&self) -> &SeriesId {
        &self.series_id
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    /// Get the forecast horizon (number of steps).
    pub fn horizon(&self) -> usize {
        self.timestamps.len()
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn distribution(&self) -> &ForecastDistribution {
        &self.distribution
    }

    /// Median path.
    pub fn median(&self) -> Option<Vec<f64>> {
        self.distribution.quantile(0.5)
    }

    pub fn quantile(&self, level: f64) -> Option<Vec<f64>> {
        self.distribution.quantile(level)
    }
}
