//! Train, evaluate and refit sessions over candidate architectures.

use super::backtest::{backtest, BacktestResult};
use super::metrics::Metrics;
use crate::catalog::{Column, SeriesCatalog, Table};
use crate::context::RunContext;
use crate::error::{ForecastError, Result};
use crate::models::{Architecture, ModelArtifact};
use crate::training::fit;
use chrono::{DateTime, Utc};
use std::time::Instant;
use tracing::info;

/// Series label of the row holding panel-wide metrics.
pub const AGGREGATED_ROW: &str = "aggregated";

/// One candidate's evaluation and its refit on the full catalog.
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub label: String,
    pub architecture: Architecture,
    /// Backtest of the model trained without the last horizon.
    pub evaluation: BacktestResult,
    /// The same configuration trained on every observation.
    pub artifact: ModelArtifact,
    /// Model and training parameters as JSON.
    pub model_params: String,
    pub training_time_secs: f64,
    pub session: DateTime<Utc>,
}

/// For each candidate: train on the catalog minus its last horizon, backtest
/// that horizon, then refit on the whole catalog.
pub fn evaluate_and_refit(
    ctx: &RunContext,
    catalog: &SeriesCatalog,
    candidates: &[Architecture],
) -> Result<Vec<SessionResult>> {
    if candidates.is_empty() {
        return Err(ForecastError::InvalidParameter(
            "no candidate architectures given".to_string(),
        ));
    }
    let session = Utc::now();
    let horizon = ctx.config().horizon;
    let held_out = catalog.truncated(horizon);

    candidates
        .iter()
        .map(|architecture| {
            let run = ctx.with_config(ctx.config().clone().with_model(architecture.clone()))?;
            let started = Instant::now();
            let trained = fit(&run, &held_out)?;
            let evaluation = backtest(&run, &trained, catalog, 1)?;
            let artifact = fit(&run, catalog)?;
            let training_time_secs = started.elapsed().as_secs_f64();

            let config = run.config();
            let model_params = serde_json::json!({
                "model": architecture,
                "context_length": config.context_length,
                "horizon": config.horizon,
                "num_epochs": config.num_epochs,
                "learning_rate": config.learning_rate,
                "batch_size": config.batch_size,
                "num_batches_per_epoch": config.num_batches_per_epoch,
                "patience": config.patience,
                "seed": config.seed,
            })
            .to_string();
            info!(
                model = architecture.label(),
                mase = evaluation.aggregate.mase,
                training_time_secs,
                "candidate evaluated and refit"
            );
            Ok(SessionResult {
                label: architecture.label().to_string(),
                architecture: architecture.clone(),
                evaluation,
                artifact,
                model_params,
                training_time_secs,
                session,
            })
        })
        .collect()
}

fn format_level(level: f64) -> String {
    format!("{level}")
}

fn real(rows: &[&Metrics], f: impl Fn(&Metrics) -> f64) -> Column {
    Column::Real(rows.iter().map(|m| f(m)).collect())
}

/// One row per series and an [`AGGREGATED_ROW`] per session result.
pub fn metrics_to_table(results: &[SessionResult]) -> Result<Table> {
    let levels = results
        .first()
        .map(|r| r.evaluation.aggregate.quantile_levels.clone())
        .unwrap_or_default();

    let mut entries: Vec<(&SessionResult, String, String, &Metrics)> = Vec::new();
    for result in results {
        for s in &result.evaluation.series_metrics {
            entries.push((
                result,
                s.series_id.target().to_string(),
                s.series_id.to_string(),
                &s.metrics,
            ));
        }
        entries.push((
            result,
            String::new(),
            AGGREGATED_ROW.to_string(),
            &result.evaluation.aggregate,
        ));
    }
    let rows: Vec<&Metrics> = entries.iter().map(|e| e.3).collect();
    if rows.iter().any(|m| m.quantile_levels != levels) {
        return Err(ForecastError::InvalidParameter(
            "session results use different quantile levels".to_string(),
        ));
    }

    let mut table = Table::new()
        .with_column(
            "session",
            Column::Timestamp(entries.iter().map(|e| e.0.session).collect()),
        )?
        .with_column(
            "model",
            Column::Text(entries.iter().map(|e| e.0.label.clone()).collect()),
        )?
        .with_column(
            "target_column",
            Column::Text(entries.iter().map(|e| e.1.clone()).collect()),
        )?
        .with_column(
            "series_id",
            Column::Text(entries.iter().map(|e| e.2.clone()).collect()),
        )?
        .with_column("MSE", real(&rows, |m| m.mse))?
        .with_column("RMSE", real(&rows, |m| m.rmse))?
        .with_column("MASE", real(&rows, |m| m.mase))?
        .with_column("MAPE", real(&rows, |m| m.mape))?
        .with_column("sMAPE", real(&rows, |m| m.smape))?
        .with_column("MSIS", real(&rows, |m| m.msis))?
        .with_column("ND", real(&rows, |m| m.nd))?
        .with_column("mean_wQuantileLoss", real(&rows, |m| m.mean_weighted_quantile_loss))?;
    for (i, &level) in levels.iter().enumerate() {
        table.push_column(
            format!("wQuantileLoss[{}]", format_level(level)),
            real(&rows, |m| m.weighted_quantile_loss[i]),
        )?;
        table.push_column(
            format!("Coverage[{}]", format_level(level)),
            real(&rows, |m| m.coverage[i]),
        )?;
    }
    table.push_column(
        "model_params",
        Column::Text(entries.iter().map(|e| e.0.model_params.clone()).collect()),
    )?;
    table.push_column(
        "training_time_secs",
        Column::Real(entries.iter().map(|e| e.0.training_time_secs).collect()),
    )?;
    Ok(table)
}
