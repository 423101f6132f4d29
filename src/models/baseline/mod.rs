//! Baseline forecasting models.
//!
//! Simple methods that serve as benchmarks for the trained networks. They
//! have no parameters and read everything they need from the window context.

mod naive;
mod seasonal_naive;

pub use naive::Naive;
pub use seasonal_naive::SeasonalNaive;

use crate::error::{ForecastError, Result};
use crate::window::Window;

/// Last observed context value.
fn last_observed(window: &Window) -> Option<f64> {
    window
        .past_target
        .iter()
        .zip(&window.past_observed)
        .rev()
        .find(|(_, m)| **m > 0.0)
        .map(|(v, _)| *v)
}

/// Root mean square of `y[i] - y[i - lag]` over pairs where both ends are
/// observed. Zero when no such pair exists.
fn lag_residual_sigma(window: &Window, lag: usize) -> f64 {
    let y = &window.past_target;
    let m = &window.past_observed;
    let (sum, count) = (lag..y.len())
        .filter(|&i| m[i] > 0.0 && m[i - lag] > 0.0)
        .fold((0.0, 0usize), |(s, c), i| {
            let r = y[i] - y[i - lag];
            (s + r * r, c + 1)
        });
    if count == 0 {
        0.0
    } else {
        (sum / count as f64).sqrt()
    }
}

fn not_trainable(name: &str) -> ForecastError {
    ForecastError::InvalidParameter(format!("{name} has no trainable parameters"))
}

fn require_observed(window: &Window) -> Result<f64> {
    last_observed(window).ok_or(ForecastError::InsufficientData { needed: 1, got: 0 })
}

#[cfg(test)]
pub(crate) fn context_window(values: &[f64]) -> Window {
    Window {
        series_index: 0,
        forecast_start: values.len() as i64,
        past_target: values.iter().map(|v| if v.is_nan() { 0.0 } else { *v }).collect(),
        past_observed: values.iter().map(|v| if v.is_nan() { 0.0 } else { 1.0 }).collect(),
        future_target: vec![],
        future_observed: vec![],
        past_dynamic: vec![],
        future_dynamic: vec![],
        num_dynamic: 0,
        static_categorical: vec![],
        static_real: vec![],
    }
}
