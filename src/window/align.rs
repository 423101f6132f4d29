//! Alignment of dynamic features to a window's absolute step range.

use crate::catalog::SeriesEntry;
use crate::error::{ForecastError, Result};

/// Slice the dynamic features of `entry` for the window
/// `[forecast_start - context_length, forecast_start + horizon)`.
///
/// Features are indexed by calendar step, never by target position. Every
/// position from the series start (or the window start, if later) to the end
/// of the horizon must be covered; earlier positions are padding and get
/// zeros when no feature row exists for them.
pub fn slice_dynamic(
    entry: &SeriesEntry,
    forecast_start: i64,
    context_length: usize,
    horizon: usize,
    num_dynamic: usize,
) -> Result<(Vec<f64>, Vec<f64>)> {
    if num_dynamic == 0 {
        return Ok((Vec::new(), Vec::new()));
    }

    let window_start = forecast_start - context_length as i64;
    let window_end = forecast_start + horizon as i64;
    let required_start = window_start.max(entry.start_step()).min(forecast_start);
    let (available_start, available_end) = entry
        .dynamic_range()
        .unwrap_or((entry.start_step(), entry.start_step()));

    if available_start > required_start || available_end < window_end {
        return Err(ForecastError::FeatureAlignment {
            series_id: entry.id().to_string(),
            required_start,
            required_end: window_end,
            available_start,
            available_end,
        });
    }

    let zeros = vec![0.0; num_dynamic];
    let rows = |from: i64, to: i64| -> Vec<f64> {
        let mut out = Vec::with_capacity((to - from) as usize * num_dynamic);
        for step in from..to {
            out.extend_from_slice(entry.dynamic_row(step).unwrap_or(&zeros));
        }
        out
    };
    let past = rows(window_start, forecast_start);
    let future = rows(forecast_start, window_end);
    Ok((past, future))
}
