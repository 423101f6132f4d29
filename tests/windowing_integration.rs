//! Integration tests for building catalogs from tables and windowing them.

use anofox_panel::catalog::{Column, ColumnRoles, DynamicFeatures, SeriesCatalog, SeriesId, Table};
use anofox_panel::context::CancellationToken;
use anofox_panel::core::{Calendar, OffCalendarPolicy};
use anofox_panel::error::ForecastError;
use anofox_panel::window::{
    prefetch_batches, BatchSampler, PaddingPolicy, SamplingStrategy, Windower,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap()
}

fn daily() -> Calendar {
    Calendar::new("D".parse().unwrap(), t0(), OffCalendarPolicy::Reject).unwrap()
}

fn catalog_of(lengths: &[usize]) -> SeriesCatalog {
    let mut catalog = SeriesCatalog::new(daily());
    for (i, &len) in lengths.iter().enumerate() {
        let target: Vec<f64> = (0..len).map(|t| (t as f64 * 0.5).sin() + 3.0).collect();
        catalog
            .register(SeriesId::new(format!("item_{i}")), t0(), &target, None, None)
            .unwrap();
    }
    catalog
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn backtest_window_count_is_floor_of_remaining_history(
        len in 1usize..200,
        context in 1usize..30,
        horizon in 1usize..15,
    ) {
        let catalog = catalog_of(&[len]);
        let windower = Windower::new(&catalog, context, horizon, PaddingPolicy::Drop).unwrap();
        let expected = len.saturating_sub(context) / horizon;
        prop_assert_eq!(windower.backtest_window_count(catalog.get(0).unwrap()), expected);
        if expected > 0 {
            let windows = windower.backtest_windows(expected).unwrap();
            prop_assert_eq!(windows.len(), expected);
            prop_assert!(windower.backtest_windows(expected + 1).is_err());
        }
    }

    #[test]
    fn padding_mask_marks_exactly_the_padding(
        len in 1usize..40,
        context in 1usize..50,
        sentinel in -1e3f64..1e3,
    ) {
        let catalog = catalog_of(&[len]);
        let windower =
            Windower::new(&catalog, context, 1, PaddingPolicy::Pad { sentinel }).unwrap();
        let window = windower.window_at(0, len as i64, false).unwrap();
        let padded = context.saturating_sub(len);
        for i in 0..context {
            let observed = window.past_observed[i] > 0.0;
            prop_assert_eq!(observed, i >= padded);
            if !observed {
                prop_assert_eq!(window.past_target[i], sentinel);
            }
        }
        prop_assert_eq!(window.observed_future(), 0);
    }
}

#[test]
fn table_to_windows_end_to_end() {
    let n = 30;
    let dates: Vec<DateTime<Utc>> = (0..n).map(|i| t0() + Duration::days(i as i64)).collect();
    let mut stamps = Vec::new();
    let mut stores = Vec::new();
    let mut sales = Vec::new();
    let mut promo = Vec::new();
    for store in ["a", "b"] {
        for (i, d) in dates.iter().enumerate() {
            stamps.push(*d);
            stores.push(store.to_string());
            sales.push(if i == 10 { f64::NAN } else { i as f64 });
            promo.push((i % 2) as f64);
        }
    }
    let table = Table::new()
        .with_column("date", Column::Timestamp(stamps))
        .unwrap()
        .with_column("store", Column::Text(stores))
        .unwrap()
        .with_column("sales", Column::Real(sales))
        .unwrap()
        .with_column("promo", Column::Real(promo))
        .unwrap();
    let roles = ColumnRoles::new("date")
        .with_target("sales")
        .with_identifier("store")
        .with_dynamic_real("promo");
    let catalog = SeriesCatalog::from_table(&table, &roles, daily(), None).unwrap();
    assert_eq!(catalog.len(), 2);

    let windower = Windower::new(&catalog, 8, 4, PaddingPolicy::Pad { sentinel: 0.0 }).unwrap();
    let window = windower.window_at(0, 12, true).unwrap();
    // Step 10 is missing and masked; steps 4..12 form the context.
    assert_eq!(window.past_observed[6], 0.0);
    assert_eq!(window.past_target[5], 9.0);
    assert_eq!(window.past_dynamic_row(0), &[0.0]);
    assert_eq!(window.future_dynamic_row(1), &[1.0]);

    // Features end with the target, so a forecast beyond the data cannot align.
    assert!(matches!(
        windower.prediction_windows(),
        Err(ForecastError::InsufficientFeatureCoverage { .. })
    ));
}

#[test]
fn short_features_fail_alignment_at_the_horizon() {
    let mut catalog = SeriesCatalog::new(daily());
    let rows = (0..8).map(|i| vec![i as f64]).collect();
    catalog
        .register(
            SeriesId::new("y"),
            t0(),
            &[1.0; 10],
            None,
            Some(&DynamicFeatures::new(t0(), rows)),
        )
        .unwrap();
    let windower = Windower::new(&catalog, 5, 5, PaddingPolicy::Drop).unwrap();
    assert!(matches!(
        windower.window_at(0, 9, true),
        Err(ForecastError::FeatureAlignment {
            required_end: 14,
            available_end: 8,
            ..
        })
    ));
}

#[test]
fn prefetched_epochs_are_reproducible() {
    let catalog = catalog_of(&[40, 25, 60]);
    let windower = Windower::new(&catalog, 10, 5, PaddingPolicy::Pad { sentinel: 0.0 }).unwrap();
    let collect = |workers: usize| {
        let plan = windower.training_plan().unwrap();
        let sampler =
            BatchSampler::new(windower, plan, SamplingStrategy::default(), 8, 11).unwrap();
        let mut seen = Vec::new();
        prefetch_batches(&sampler, 2, 6, workers, 2, &CancellationToken::new(), |batch| {
            seen.push(batch);
            Ok(true)
        })
        .unwrap();
        seen
    };
    let serial = collect(0);
    assert_eq!(serial.len(), 6);
    assert_eq!(serial, collect(3));
}
