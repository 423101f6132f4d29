//! Forecasting with a trained artifact and conversion to the tabular output.

use crate::catalog::{Column, SeriesCatalog, Table};
use crate::context::RunContext;
use crate::core::{Forecast, ForecastDistribution};
use crate::error::{ForecastError, Result};
use crate::models::{self, ModelArtifact, WindowForecast};
use crate::window::Windower;
use tracing::info;

/// Forecast the `horizon` steps following each series' last observation.
///
/// `horizon` may be shorter than the artifact's trained horizon, in which
/// case the leading steps are returned.
pub fn forecast(
    ctx: &RunContext,
    artifact: &ModelArtifact,
    catalog: &SeriesCatalog,
    horizon: usize,
) -> Result<Vec<Forecast>> {
    artifact.check_compatible(catalog)?;
    if horizon == 0 || horizon > artifact.horizon {
        return Err(ForecastError::InvalidParameter(format!(
            "horizon must be in 1..={}, got {horizon}",
            artifact.horizon
        )));
    }
    let config = ctx.config();
    let windower = Windower::new(
        catalog,
        artifact.context_length,
        artifact.horizon,
        artifact.padding,
    )?;
    let windows = windower.prediction_windows()?;
    let predicted = models::predict(
        artifact,
        &windows,
        &config.output,
        config.num_samples,
        config.seed,
        0,
    )?;
    let forecasts = reconcile(catalog, predicted, horizon)?;
    info!(
        model = artifact.architecture.label(),
        series = forecasts.len(),
        horizon,
        "forecast complete"
    );
    Ok(forecasts)
}

/// Attach series identities and calendar timestamps to window forecasts.
pub(crate) fn reconcile(
    catalog: &SeriesCatalog,
    predicted: Vec<WindowForecast>,
    horizon: usize,
) -> Result<Vec<Forecast>> {
    predicted
        .into_iter()
        .map(|wf| {
            let entry = catalog
                .get(wf.series_index)
                .ok_or(ForecastError::IndexOutOfBounds {
                    index: wf.series_index,
                    size: catalog.len(),
                })?;
            let steps = horizon.min(wf.mean.len());
            let timestamps = catalog.calendar().timestamps(wf.forecast_start, steps)?;
            Forecast::new(
                entry.id().clone(),
                timestamps,
                wf.mean[..steps].to_vec(),
                wf.distribution.truncated(steps),
            )
        })
        .collect()
}

fn format_level(level: f64) -> String {
    format!("quantile_{level}")
}

/// Flatten forecasts into one row per series and step.
///
/// Columns: every identifier column seen (empty where a series lacks it),
/// `target_column`, `timestamp`, `forecast_mean`, then `quantile_<level>` per
/// level or `sample_<i>` per path. All forecasts must share one summary shape.
pub fn forecasts_to_table(forecasts: &[Forecast]) -> Result<Table> {
    let mut id_columns: Vec<String> = Vec::new();
    for f in forecasts {
        for (column, _) in f.series_id().identifiers() {
            if !id_columns.contains(column) {
                id_columns.push(column.clone());
            }
        }
    }

    let shape = forecasts.first().map(|f| summary_columns(f.distribution()));
    if let Some(expected) = &shape {
        for f in forecasts {
            if &summary_columns(f.distribution()) != expected {
                return Err(ForecastError::InvalidParameter(format!(
                    "forecast for {} has a different distribution summary",
                    f.series_id()
                )));
            }
        }
    }
    let value_names = shape.unwrap_or_default();

    let mut ids: Vec<Vec<String>> = vec![Vec::new(); id_columns.len()];
    let mut targets = Vec::new();
    let mut timestamps = Vec::new();
    let mut means = Vec::new();
    let mut values: Vec<Vec<f64>> = vec![Vec::new(); value_names.len()];

    for f in forecasts {
        let rows: &[Vec<f64>] = match f.distribution() {
            ForecastDistribution::Quantiles { values, .. } => values,
            ForecastDistribution::Samples { paths } => paths,
        };
        for t in 0..f.horizon() {
            for (k, column) in id_columns.iter().enumerate() {
                ids[k].push(f.series_id().identifier(column).unwrap_or("").to_string());
            }
            targets.push(f.series_id().target().to_string());
            timestamps.push(f.timestamps()[t]);
            means.push(f.mean()[t]);
            for (k, row) in rows.iter().enumerate() {
                values[k].push(row[t]);
            }
        }
    }

    let mut table = Table::new();
    for (name, column) in id_columns.into_iter().zip(ids) {
        table.push_column(name, Column::Text(column))?;
    }
    table.push_column("target_column", Column::Text(targets))?;
    table.push_column("timestamp", Column::Timestamp(timestamps))?;
    table.push_column("forecast_mean", Column::Real(means))?;
    for (name, column) in value_names.into_iter().zip(values) {
        table.push_column(name, Column::Real(column))?;
    }
    Ok(table)
}

fn summary_columns(distribution: &ForecastDistribution) -> Vec<String> {
    match distribution {
        ForecastDistribution::Quantiles { levels, .. } => {
            levels.iter().map(|&l| format_level(l)).collect()
        }
        ForecastDistribution::Samples { paths } => {
            (0..paths.len()).map(|i| format!("sample_{i}")).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SeriesId;
    use crate::config::ForecastConfig;
    use crate::core::{Calendar, OffCalendarPolicy};
    use crate::models::Architecture;
    use crate::training::fit;
    use crate::window::PaddingPolicy;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn catalog() -> SeriesCatalog {
        let calendar = Calendar::new("D".parse().unwrap(), t0(), OffCalendarPolicy::Reject).unwrap();
        let mut catalog = SeriesCatalog::new(calendar);
        for (store, offset) in [("a", 0.0), ("b", 5.0)] {
            let target: Vec<f64> = (0..20).map(|t| offset + (t % 4) as f64).collect();
            catalog
                .register(
                    SeriesId::new("sales").with_identifier("store", store),
                    t0(),
                    &target,
                    None,
                    None,
                )
                .unwrap();
        }
        catalog
    }

    fn context(model: Architecture) -> RunContext {
        let config = ForecastConfig::new(
            "D".parse().unwrap(),
            8,
            4,
            model,
            PaddingPolicy::Pad { sentinel: 0.0 },
        );
        RunContext::new(config).unwrap()
    }

    #[test]
    fn timestamps_follow_the_last_observation() {
        let ctx = context(Architecture::Naive);
        let catalog = catalog();
        let artifact = fit(&ctx, &catalog).unwrap();
        let forecasts = forecast(&ctx, &artifact, &catalog, 4).unwrap();
        assert_eq!(forecasts.len(), 2);
        let last = t0() + Duration::days(19);
        for (i, ts) in forecasts[0].timestamps().iter().enumerate() {
            assert_eq!(*ts, last + Duration::days(i as i64 + 1));
        }
        // Naive repeats the last value, 19 % 4 = 3.
        assert_eq!(forecasts[0].mean(), &[3.0; 4]);
    }

    #[test]
    fn shorter_horizon_returns_prefix() {
        let ctx = context(Architecture::Naive);
        let catalog = catalog();
        let artifact = fit(&ctx, &catalog).unwrap();
        let full = forecast(&ctx, &artifact, &catalog, 4).unwrap();
        let short = forecast(&ctx, &artifact, &catalog, 2).unwrap();
        assert_eq!(short[1].mean(), &full[1].mean()[..2]);
        assert_eq!(short[1].timestamps(), &full[1].timestamps()[..2]);
        assert!(forecast(&ctx, &artifact, &catalog, 5).is_err());
        assert!(forecast(&ctx, &artifact, &catalog, 0).is_err());
    }

    #[test]
    fn table_has_one_row_per_step() {
        let ctx = context(Architecture::Naive);
        let catalog = catalog();
        let artifact = fit(&ctx, &catalog).unwrap();
        let forecasts = forecast(&ctx, &artifact, &catalog, 3).unwrap();
        let table = forecasts_to_table(&forecasts).unwrap();
        assert_eq!(table.num_rows(), 6);
        assert_eq!(
            table.column_names(),
            &[
                "store",
                "target_column",
                "timestamp",
                "forecast_mean",
                "quantile_0.1",
                "quantile_0.5",
                "quantile_0.9"
            ]
        );
        assert_eq!(table.text("store").unwrap()[3], "b");
        assert_eq!(table.real("forecast_mean").unwrap()[3], 8.0);
    }

    #[test]
    fn mismatched_artifact_is_rejected() {
        let ctx = context(Architecture::Naive);
        let artifact = fit(&ctx, &catalog()).unwrap();
        let calendar = Calendar::new("H".parse().unwrap(), t0(), OffCalendarPolicy::Reject).unwrap();
        let hourly = SeriesCatalog::new(calendar);
        assert!(matches!(
            forecast(&ctx, &artifact, &hourly, 4),
            Err(ForecastError::ArtifactMismatch { .. })
        ));
    }
}
