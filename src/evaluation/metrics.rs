//! Accuracy metrics for probabilistic forecast evaluation.
//!
//! Point metrics use the median forecast (the mean for MSE). Only observed
//! truth positions are scored.

use crate::core::ForecastDistribution;
use crate::error::{ForecastError, Result};
use crate::utils::stats::nan_mean;
use serde::{Deserialize, Serialize};

/// Significance level of the MSIS interval.
pub const MSIS_ALPHA: f64 = 0.05;
const MSIS_LOWER: f64 = 0.025;
const MSIS_UPPER: f64 = 0.975;

/// Quantile levels needed for scoring on top of the requested ones.
pub fn scoring_levels(requested: &[f64]) -> Vec<f64> {
    let mut levels = requested.to_vec();
    for extra in [MSIS_LOWER, 0.5, MSIS_UPPER] {
        if !levels.iter().any(|l| (l - extra).abs() < 1e-9) {
            levels.push(extra);
        }
    }
    levels.sort_by(|a, b| a.total_cmp(b));
    levels
}

/// Accuracy of one forecast, or of a group of forecasts after [`aggregate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Mean Squared Error
    pub mse: f64,
    /// Root Mean Squared Error
    pub rmse: f64,
    /// Mean Absolute Scaled Error
    pub mase: f64,
    /// Mean Absolute Percentage Error over non-zero truth
    pub mape: f64,
    /// Symmetric Mean Absolute Percentage Error
    pub smape: f64,
    /// Mean Scaled Interval Score at [`MSIS_ALPHA`]
    pub msis: f64,
    /// Normalized Deviation: sum of absolute errors over sum of absolute truth
    pub nd: f64,
    pub quantile_levels: Vec<f64>,
    /// Weighted quantile loss per level.
    pub weighted_quantile_loss: Vec<f64>,
    pub mean_weighted_quantile_loss: f64,
    /// Share of truth values at or below each quantile.
    pub coverage: Vec<f64>,
    /// Number of scored positions.
    pub observed: usize,
    abs_error: f64,
    abs_target: f64,
    quantile_loss: Vec<f64>,
    covered: Vec<usize>,
}

/// Mean absolute `season`-lag difference of the observed history, the MASE and
/// MSIS denominator. Falls back to lag 1 when the history is shorter than a
/// season; NaN when no pair is observed.
pub fn seasonal_error(history: &[f64], season: usize) -> f64 {
    let lag = if history.len() > season { season.max(1) } else { 1 };
    let diffs: Vec<f64> = (lag..history.len())
        .map(|i| (history[i] - history[i - lag]).abs())
        .collect();
    nan_mean(&diffs)
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 && den.is_finite() {
        num / den
    } else {
        f64::NAN
    }
}

/// Score one forecast against the truth.
///
/// `observed` masks the truth (1.0 for observed). `distribution` must answer
/// every level in `levels` and the MSIS interval bounds.
pub fn score(
    truth: &[f64],
    observed: &[f64],
    mean: &[f64],
    distribution: &ForecastDistribution,
    levels: &[f64],
    seasonal_error: f64,
) -> Result<Metrics> {
    if truth.len() != mean.len() || truth.len() != observed.len() {
        return Err(ForecastError::DimensionMismatch {
            expected: truth.len(),
            got: mean.len().min(observed.len()),
        });
    }
    let level_values = |level: f64| -> Result<Vec<f64>> {
        distribution.quantile(level).ok_or_else(|| {
            ForecastError::InvalidParameter(format!("forecast has no quantile {level}"))
        })
    };
    let median = level_values(0.5)?;
    let lower = level_values(MSIS_LOWER)?;
    let upper = level_values(MSIS_UPPER)?;
    let quantiles = levels
        .iter()
        .map(|&l| level_values(l))
        .collect::<Result<Vec<_>>>()?;

    let positions: Vec<usize> = (0..truth.len())
        .filter(|&t| observed[t] > 0.0 && truth[t].is_finite())
        .collect();
    let n = positions.len() as f64;

    let mut squared = 0.0;
    let mut abs_error = 0.0;
    let mut abs_target = 0.0;
    let mut ape = Vec::new();
    let mut sape = Vec::new();
    let mut interval = 0.0;
    let mut quantile_loss = vec![0.0; levels.len()];
    let mut covered = vec![0usize; levels.len()];

    for &t in &positions {
        let y = truth[t];
        squared += (y - mean[t]).powi(2);
        let err = (y - median[t]).abs();
        abs_error += err;
        abs_target += y.abs();
        if y != 0.0 {
            ape.push(err / y.abs());
        }
        let denom = y.abs() + median[t].abs();
        sape.push(if denom == 0.0 { 0.0 } else { 2.0 * err / denom });

        let (l, u) = (lower[t], upper[t]);
        interval += u - l;
        if y < l {
            interval += 2.0 / MSIS_ALPHA * (l - y);
        }
        if y > u {
            interval += 2.0 / MSIS_ALPHA * (y - u);
        }

        for (i, &level) in levels.iter().enumerate() {
            let q = quantiles[i][t];
            let indicator = if y <= q { 1.0 } else { 0.0 };
            quantile_loss[i] += 2.0 * ((y - q) * (indicator - level)).abs();
            if y <= q {
                covered[i] += 1;
            }
        }
    }

    let mse = if n > 0.0 { squared / n } else { f64::NAN };
    let mae = if n > 0.0 { abs_error / n } else { f64::NAN };
    let mut metrics = Metrics {
        mse,
        rmse: mse.sqrt(),
        mase: ratio(mae, seasonal_error),
        mape: nan_mean(&ape),
        smape: nan_mean(&sape),
        msis: ratio(if n > 0.0 { interval / n } else { f64::NAN }, seasonal_error),
        nd: ratio(abs_error, abs_target),
        quantile_levels: levels.to_vec(),
        weighted_quantile_loss: Vec::new(),
        mean_weighted_quantile_loss: f64::NAN,
        coverage: covered
            .iter()
            .map(|&c| if n > 0.0 { c as f64 / n } else { f64::NAN })
            .collect(),
        observed: positions.len(),
        abs_error,
        abs_target,
        quantile_loss,
        covered,
    };
    metrics.finish_quantiles();
    Ok(metrics)
}

impl Metrics {
    fn finish_quantiles(&mut self) {
        self.weighted_quantile_loss = self
            .quantile_loss
            .iter()
            .map(|&ql| ratio(ql, self.abs_target))
            .collect();
        self.mean_weighted_quantile_loss = nan_mean(&self.weighted_quantile_loss);
    }
}

/// Combine metrics of several forecasts.
///
/// MSE, MASE, MAPE, sMAPE and MSIS are averaged; RMSE is the root of the
/// averaged MSE; ND, the weighted quantile losses and coverage are ratios of
/// sums.
pub fn aggregate(parts: &[Metrics]) -> Result<Metrics> {
    let first = parts.first().ok_or(ForecastError::EmptyData)?;
    let levels = first.quantile_levels.clone();
    if parts.iter().any(|m| m.quantile_levels != levels) {
        return Err(ForecastError::InvalidParameter(
            "cannot aggregate metrics over different quantile levels".to_string(),
        ));
    }
    let mean_of = |f: fn(&Metrics) -> f64| -> f64 {
        nan_mean(&parts.iter().map(f).collect::<Vec<_>>())
    };
    let abs_error: f64 = parts.iter().map(|m| m.abs_error).sum();
    let abs_target: f64 = parts.iter().map(|m| m.abs_target).sum();
    let observed: usize = parts.iter().map(|m| m.observed).sum();
    let quantile_loss: Vec<f64> = (0..levels.len())
        .map(|i| parts.iter().map(|m| m.quantile_loss[i]).sum())
        .collect();
    let covered: Vec<usize> = (0..levels.len())
        .map(|i| parts.iter().map(|m| m.covered[i]).sum())
        .collect();

    let mse = mean_of(|m| m.mse);
    let mut out = Metrics {
        mse,
        rmse: mse.sqrt(),
        mase: mean_of(|m| m.mase),
        mape: mean_of(|m| m.mape),
        smape: mean_of(|m| m.smape),
        msis: mean_of(|m| m.msis),
        nd: ratio(abs_error, abs_target),
        quantile_levels: levels,
        weighted_quantile_loss: Vec::new(),
        mean_weighted_quantile_loss: f64::NAN,
        coverage: covered
            .iter()
            .map(|&c| {
                if observed > 0 {
                    c as f64 / observed as f64
                } else {
                    f64::NAN
                }
            })
            .collect(),
        observed,
        abs_error,
        abs_target,
        quantile_loss,
        covered,
    };
    out.finish_quantiles();
    Ok(out)
}
