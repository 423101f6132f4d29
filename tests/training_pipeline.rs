//! End-to-end tests: train on a synthetic panel, forecast, backtest.

use anofox_panel::catalog::{Column, DynamicFeatures, StaticFeatures};
use anofox_panel::core::OffCalendarPolicy;
use anofox_panel::evaluation::forecasts_to_table;
use anofox_panel::prelude::*;
use anofox_panel::training::StopReason;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::f64::consts::PI;

const CONTEXT: usize = 21;
const HORIZON: usize = 7;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 1, 3, 0, 0, 0).unwrap()
}

fn calendar() -> Calendar {
    Calendar::new("D".parse().unwrap(), t0(), OffCalendarPolicy::Reject).unwrap()
}

fn weekly(level: f64, amplitude: f64, len: usize) -> Vec<f64> {
    (0..len)
        .map(|t| level + amplitude * (2.0 * PI * t as f64 / 7.0).sin())
        .collect()
}

fn sine_panel() -> SeriesCatalog {
    let mut catalog = SeriesCatalog::new(calendar());
    for (i, (level, amplitude)) in [(10.0, 3.0), (50.0, 10.0), (5.0, 1.0)].iter().enumerate() {
        catalog
            .register(
                SeriesId::new("units").with_identifier("sku", format!("sku-{i}")),
                t0(),
                &weekly(*level, *amplitude, 120),
                None,
                None,
            )
            .unwrap();
    }
    catalog
}

/// Panel with a static region and a promotion feature known one horizon ahead.
fn featured_panel() -> SeriesCatalog {
    let schema = FeatureSchema::new()
        .with_static_categorical("region", vec!["east".into(), "west".into()])
        .with_dynamic_real("promo");
    let mut catalog = SeriesCatalog::new(calendar()).with_schema(schema);
    for i in 0..3 {
        let len = 80 + 10 * i;
        let promo: Vec<Vec<f64>> = (0..len + HORIZON)
            .map(|t| vec![if t % 10 < 2 { 1.0 } else { 0.0 }])
            .collect();
        let mut target = weekly(20.0 + i as f64, 4.0, len);
        for (t, v) in target.iter_mut().enumerate() {
            *v += 5.0 * promo[t][0];
        }
        catalog
            .register(
                SeriesId::new("units").with_identifier("sku", format!("sku-{i}")),
                t0(),
                &target,
                Some(&StaticFeatures::new().with_categorical(i % 2)),
                Some(&DynamicFeatures::new(t0(), promo)),
            )
            .unwrap();
    }
    catalog
}

fn config(model: Architecture) -> ForecastConfig {
    ForecastConfig::new(
        "D".parse().unwrap(),
        CONTEXT,
        HORIZON,
        model,
        PaddingPolicy::Pad { sentinel: 0.0 },
    )
    .with_seed(17)
}

#[test]
fn feed_forward_learns_a_weekly_pattern() {
    let cfg = config(Architecture::SimpleFeedForward { hidden_size: 16 })
        .with_epochs(15)
        .with_early_stopping(20, 0.0)
        .with_batches(16, 10)
        .with_learning_rate(1e-2);
    let ctx = RunContext::new(cfg).unwrap();
    let artifact = fit(&ctx, &sine_panel()).unwrap();

    let summary = &artifact.summary;
    assert_eq!(summary.stop_reason, StopReason::MaxEpochsReached);
    assert_eq!(summary.epochs_run, 15);
    let first = summary.train_losses[0];
    let last = *summary.train_losses.last().unwrap();
    assert!(last < first, "training loss went from {first} to {last}");
    assert!(summary.best_validation_loss.unwrap().is_finite());
}

#[test]
fn one_window_backtest_equals_forecast_on_truncated_panel() {
    let cfg = config(Architecture::DeepAr {
        hidden_size: 8,
        embedding_dim: 2,
    })
    .with_epochs(2)
    .with_batches(8, 3)
    .with_num_samples(50);
    let ctx = RunContext::new(cfg).unwrap();
    let catalog = sine_panel();
    let artifact = fit(&ctx, &catalog).unwrap();

    let evaluation = backtest(&ctx, &artifact, &catalog, 1).unwrap();
    let direct = forecast(&ctx, &artifact, &catalog.truncated(HORIZON), HORIZON).unwrap();
    assert_eq!(evaluation.forecasts[0], direct);
    assert_eq!(evaluation.series_metrics.len(), 3);
    assert!(evaluation.aggregate.mse.is_finite());
    assert_eq!(evaluation.aggregate.observed, 3 * HORIZON);
}

#[test]
fn forecast_timestamps_continue_each_series() {
    let ctx = RunContext::new(config(Architecture::Naive)).unwrap();
    let catalog = sine_panel();
    let artifact = fit(&ctx, &catalog).unwrap();
    let forecasts = forecast(&ctx, &artifact, &catalog, HORIZON).unwrap();
    for (f, entry) in forecasts.iter().zip(catalog.iter()) {
        let last = entry.end_step() - 1;
        for (i, ts) in f.timestamps().iter().enumerate() {
            assert_eq!(*ts, catalog.calendar().to_timestamp(last + 1 + i as i64).unwrap());
        }
    }
}

#[test]
fn transformer_uses_static_and_dynamic_features() {
    let cfg = config(Architecture::Transformer {
        model_dim: 8,
        embedding_dim: 2,
    })
    .with_epochs(3)
    .with_batches(8, 4)
    .with_output(OutputRequest::Quantiles {
        levels: vec![0.05, 0.5, 0.95],
    });
    let ctx = RunContext::new(cfg).unwrap();
    let catalog = featured_panel();
    let artifact = fit(&ctx, &catalog).unwrap();
    assert_eq!(artifact.dims.num_dynamic, 1);
    assert_eq!(artifact.dims.cardinalities, vec![2]);

    let forecasts = forecast(&ctx, &artifact, &catalog, HORIZON).unwrap();
    assert_eq!(forecasts.len(), 3);
    for f in &forecasts {
        let low = f.quantile(0.05).unwrap();
        let mid = f.quantile(0.5).unwrap();
        let high = f.quantile(0.95).unwrap();
        for t in 0..HORIZON {
            assert!(low[t] <= mid[t] && mid[t] <= high[t]);
        }
    }
}

#[test]
fn feature_blind_models_reject_or_ignore_features() {
    let catalog = featured_panel();
    let ctx = RunContext::new(config(Architecture::simple_feed_forward())).unwrap();
    assert!(matches!(
        fit(&ctx, &catalog),
        Err(ForecastError::IncompatibleFeatureSet { .. })
    ));

    let cfg = config(Architecture::simple_feed_forward())
        .with_feature_usage(false, false)
        .with_epochs(1)
        .with_batches(4, 2);
    let ctx = RunContext::new(cfg).unwrap();
    let artifact = fit(&ctx, &catalog).unwrap();
    assert_eq!(artifact.dims.num_dynamic, 0);
}

#[test]
fn deep_ar_emits_sample_paths() {
    let cfg = config(Architecture::DeepAr {
        hidden_size: 6,
        embedding_dim: 2,
    })
    .with_epochs(1)
    .with_batches(4, 2)
    .with_output(OutputRequest::Samples)
    .with_num_samples(20);
    let ctx = RunContext::new(cfg).unwrap();
    let catalog = sine_panel();
    let artifact = fit(&ctx, &catalog).unwrap();
    let forecasts = forecast(&ctx, &artifact, &catalog, 3).unwrap();
    match forecasts[0].distribution() {
        ForecastDistribution::Samples { paths } => {
            assert_eq!(paths.len(), 20);
            assert!(paths.iter().all(|p| p.len() == 3));
        }
        other => panic!("expected samples, got {other:?}"),
    }
    let table = forecasts_to_table(&forecasts).unwrap();
    assert_eq!(table.num_rows(), 9);
    assert!(table.column_names().contains(&"sample_19".to_string()));
}

#[test]
fn cancelled_run_stops_before_training() {
    let token = CancellationToken::new();
    token.cancel();
    let ctx = RunContext::new(config(Architecture::simple_feed_forward()))
        .unwrap()
        .with_cancellation(token);
    match fit(&ctx, &sine_panel()) {
        Err(ForecastError::Cancelled { last_good, .. }) => assert!(last_good.is_none()),
        other => panic!("expected cancellation, got {other:?}"),
    }
}

#[test]
fn artifact_survives_json_and_forecasts_identically() {
    let cfg = config(Architecture::simple_feed_forward())
        .with_epochs(2)
        .with_batches(8, 2);
    let ctx = RunContext::new(cfg).unwrap();
    let catalog = sine_panel();
    let artifact = fit(&ctx, &catalog).unwrap();
    let restored = ModelArtifact::from_json(&artifact.to_json().unwrap()).unwrap();
    assert_eq!(restored, artifact);
    assert_eq!(
        forecast(&ctx, &restored, &catalog, HORIZON).unwrap(),
        forecast(&ctx, &artifact, &catalog, HORIZON).unwrap()
    );
}

fn region_table(stores: &[(&str, &str)]) -> Table {
    let mut dates = Vec::new();
    let mut store_col = Vec::new();
    let mut region_col = Vec::new();
    let mut sales = Vec::new();
    for (i, (store, region)) in stores.iter().enumerate() {
        for (t, v) in weekly(10.0 + 5.0 * i as f64, 2.0, 60).into_iter().enumerate() {
            dates.push(t0() + Duration::days(t as i64));
            store_col.push(store.to_string());
            region_col.push(region.to_string());
            sales.push(v);
        }
    }
    Table::new()
        .with_column("date", Column::Timestamp(dates))
        .unwrap()
        .with_column("store", Column::Text(store_col))
        .unwrap()
        .with_column("region", Column::Text(region_col))
        .unwrap()
        .with_column("sales", Column::Real(sales))
        .unwrap()
}

#[test]
fn prediction_tables_keep_the_trained_vocabulary() {
    let roles = ColumnRoles::new("date")
        .with_target("sales")
        .with_identifier("store")
        .with_static_categorical("region");
    let trained = SeriesCatalog::from_table(
        &region_table(&[("a", "north"), ("b", "south")]),
        &roles,
        calendar(),
        None,
    )
    .unwrap();
    let cfg = config(Architecture::Transformer {
        model_dim: 8,
        embedding_dim: 2,
    })
    .with_epochs(1)
    .with_batches(4, 2);
    let ctx = RunContext::new(cfg).unwrap();
    let artifact = fit(&ctx, &trained).unwrap();

    // The south-only table sorts its own vocabulary, so south becomes code 0.
    let south = region_table(&[("b", "south")]);
    let relabelled = SeriesCatalog::from_table(&south, &roles, calendar(), None).unwrap();
    assert!(matches!(
        artifact.check_compatible(&relabelled),
        Err(ForecastError::ArtifactMismatch { .. })
    ));
    assert!(matches!(
        forecast(&ctx, &artifact, &relabelled, HORIZON),
        Err(ForecastError::ArtifactMismatch { .. })
    ));

    let encoded =
        SeriesCatalog::from_table_with_schema(&south, &roles, calendar(), None, &artifact.schema)
            .unwrap();
    artifact.check_compatible(&encoded).unwrap();
    let alone = forecast(&ctx, &artifact, &encoded, HORIZON).unwrap();
    let together = forecast(&ctx, &artifact, &trained, HORIZON).unwrap();
    assert_eq!(alone[0], together[1]);
}

#[test]
fn auto_performance_session_evaluates_every_candidate() {
    let style = ForecastingStyle::AutoPerformance;
    let cfg = ForecastConfig::preset(
        style,
        "D".parse().unwrap(),
        HORIZON,
        PaddingPolicy::Pad { sentinel: 0.0 },
    )
    .with_epochs(1)
    .with_batches(4, 1)
    .with_seed(3);
    let ctx = RunContext::new(cfg).unwrap();
    let results = evaluate_and_refit(&ctx, &sine_panel(), &style.candidates()).unwrap();

    let labels: Vec<&str> = results.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(
        labels,
        [
            "naive",
            "seasonal_naive",
            "simplefeedforward",
            "deepar",
            "transformer",
            "nbeats"
        ]
    );
    for result in &results {
        assert!(result.evaluation.aggregate.mse.is_finite(), "{}", result.label);
        assert_eq!(result.artifact.context_length, 2 * HORIZON);
    }
}
