//! Rolling-origin backtests scored against held-out truth.

use super::forecast::reconcile;
use super::metrics::{aggregate, score, scoring_levels, seasonal_error, Metrics};
use crate::catalog::{SeriesCatalog, SeriesId};
use crate::config::OutputRequest;
use crate::context::RunContext;
use crate::core::Forecast;
use crate::error::{ForecastError, Result};
use crate::models::{self, ModelArtifact};
use crate::window::{Window, Windower};
use tracing::{debug, info};

/// Levels scored when the run asks for raw samples.
const SAMPLE_SCORING_LEVELS: [f64; 3] = [0.1, 0.5, 0.9];

/// Metrics of one series over all its backtest windows.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesMetrics {
    pub series_id: SeriesId,
    pub metrics: Metrics,
}

/// Outcome of [`backtest`].
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResult {
    /// `forecasts[r][series]`; window `r` forecasts the steps
    /// `[end - (r + 1) * H, end - r * H)`.
    pub forecasts: Vec<Vec<Forecast>>,
    pub series_metrics: Vec<SeriesMetrics>,
    pub aggregate: Metrics,
    pub num_windows: usize,
}

/// Forecast `num_rolling_windows` non-overlapping horizons ending at each
/// series' last step and score them.
///
/// Window 0 predicts exactly what [`forecast`](super::forecast) returns for the
/// catalog truncated by one horizon.
pub fn backtest(
    ctx: &RunContext,
    artifact: &ModelArtifact,
    catalog: &SeriesCatalog,
    num_rolling_windows: usize,
) -> Result<BacktestResult> {
    artifact.check_compatible(catalog)?;
    let config = ctx.config();
    let windower = Windower::new(
        catalog,
        artifact.context_length,
        artifact.horizon,
        artifact.padding,
    )?;
    let rolled = windower.backtest_windows(num_rolling_windows)?;

    let (scoring, requested_levels, metric_levels) = match &config.output {
        OutputRequest::Quantiles { levels } => (
            OutputRequest::Quantiles {
                levels: scoring_levels(levels),
            },
            Some(levels.clone()),
            levels.clone(),
        ),
        OutputRequest::Samples => (
            OutputRequest::Samples,
            None,
            SAMPLE_SCORING_LEVELS.to_vec(),
        ),
    };

    let mut per_series: Vec<Vec<Metrics>> = vec![Vec::new(); catalog.len()];
    let mut forecasts = Vec::with_capacity(rolled.len());
    for (r, windows) in rolled.iter().enumerate() {
        if ctx.cancellation().is_cancelled() {
            return Err(ForecastError::Cancelled {
                epoch: 0,
                last_good: None,
            });
        }
        let mut predicted = models::predict(
            artifact,
            windows,
            &scoring,
            config.num_samples,
            config.seed,
            r,
        )?;
        for (wf, window) in predicted.iter().zip(windows) {
            let history = history_before(catalog, window)?;
            let season_error = seasonal_error(&history, artifact.dims.season_length);
            per_series[window.series_index].push(score(
                &window.future_target,
                &window.future_observed,
                &wf.mean,
                &wf.distribution,
                &metric_levels,
                season_error,
            )?);
        }
        if let Some(levels) = &requested_levels {
            for wf in &mut predicted {
                wf.distribution = wf.distribution.to_quantiles(levels)?;
            }
        }
        debug!(window = r, series = predicted.len(), "backtest window scored");
        forecasts.push(reconcile(catalog, predicted, artifact.horizon)?);
    }

    let series_metrics = catalog
        .iter()
        .zip(&per_series)
        .map(|(entry, scores)| {
            Ok(SeriesMetrics {
                series_id: entry.id().clone(),
                metrics: aggregate(scores)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let overall: Vec<Metrics> = series_metrics.iter().map(|s| s.metrics.clone()).collect();
    let aggregate = aggregate(&overall)?;
    info!(
        model = artifact.architecture.label(),
        windows = num_rolling_windows,
        series = catalog.len(),
        mase = aggregate.mase,
        "backtest complete"
    );
    Ok(BacktestResult {
        forecasts,
        series_metrics,
        aggregate,
        num_windows: num_rolling_windows,
    })
}

/// Target values strictly before the window's forecast start.
fn history_before(catalog: &SeriesCatalog, window: &Window) -> Result<Vec<f64>> {
    let entry = catalog
        .get(window.series_index)
        .ok_or(ForecastError::IndexOutOfBounds {
            index: window.series_index,
            size: catalog.len(),
        })?;
    let end = (window.forecast_start - entry.start_step()).clamp(0, entry.len() as i64) as usize;
    Ok(entry.target()[..end].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForecastConfig;
    use crate::core::{Calendar, OffCalendarPolicy};
    use crate::evaluation::forecast;
    use crate::models::Architecture;
    use crate::training::fit;
    use crate::window::PaddingPolicy;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};

    fn catalog(lengths: &[usize]) -> SeriesCatalog {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let calendar = Calendar::new("D".parse().unwrap(), t0, OffCalendarPolicy::Reject).unwrap();
        let mut catalog = SeriesCatalog::new(calendar);
        for (i, &len) in lengths.iter().enumerate() {
            let target: Vec<f64> = (0..len).map(|t| 10.0 + (t % 7) as f64 + i as f64).collect();
            catalog
                .register(SeriesId::new(format!("s{i}")), t0, &target, None, None)
                .unwrap();
        }
        catalog
    }

    fn context(model: Architecture) -> RunContext {
        let config = ForecastConfig::new(
            "D".parse().unwrap(),
            14,
            7,
            model,
            PaddingPolicy::Pad { sentinel: 0.0 },
        );
        RunContext::new(config).unwrap()
    }

    #[test]
    fn seasonal_naive_is_exact_on_a_periodic_panel() {
        let ctx = context(Architecture::SeasonalNaive {
            season_length: Some(7),
        });
        let catalog = catalog(&[35, 42]);
        let artifact = fit(&ctx, &catalog).unwrap();
        let result = backtest(&ctx, &artifact, &catalog, 2).unwrap();
        assert_eq!(result.forecasts.len(), 2);
        assert_eq!(result.series_metrics.len(), 2);
        assert_relative_eq!(result.aggregate.mse, 0.0);
        assert_relative_eq!(result.aggregate.nd, 0.0);
        // A perfectly periodic history has no seasonal error to scale by.
        assert!(result.aggregate.mase.is_nan());
    }

    #[test]
    fn windows_roll_back_by_one_horizon() {
        let ctx = context(Architecture::Naive);
        let catalog = catalog(&[35]);
        let artifact = fit(&ctx, &catalog).unwrap();
        let result = backtest(&ctx, &artifact, &catalog, 3).unwrap();
        let starts: Vec<_> = result
            .forecasts
            .iter()
            .map(|w| w[0].timestamps()[0])
            .collect();
        let step = |s: i64| catalog.calendar().to_timestamp(s).unwrap();
        assert_eq!(starts, vec![step(28), step(21), step(14)]);
    }

    #[test]
    fn one_window_matches_forecast_on_truncated_catalog() {
        let ctx = context(Architecture::Naive);
        let catalog = catalog(&[30, 40]);
        let artifact = fit(&ctx, &catalog).unwrap();
        let result = backtest(&ctx, &artifact, &catalog, 1).unwrap();
        let direct = forecast(&ctx, &artifact, &catalog.truncated(7), 7).unwrap();
        assert_eq!(result.forecasts[0], direct);
    }

    #[test]
    fn too_many_windows_lists_short_series() {
        let ctx = context(Architecture::Naive);
        let catalog = catalog(&[30, 60]);
        let artifact = fit(&ctx, &catalog).unwrap();
        // floor((30 - 14) / 7) = 2 windows for the short series.
        match backtest(&ctx, &artifact, &catalog, 3).unwrap_err() {
            ForecastError::InsufficientHistory { series_ids, .. } => {
                assert_eq!(series_ids, vec!["s0".to_string()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
