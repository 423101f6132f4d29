//! Per-window mean-absolute scaling.

use crate::window::Window;

/// Mean absolute value of the observed context of `window`.
///
/// Windows without observations, or whose observations are all zero, get a
/// scale of 1.
pub fn mean_abs_scale(window: &Window) -> f64 {
    let (sum, count) = window
        .past_target
        .iter()
        .zip(&window.past_observed)
        .filter(|(_, m)| **m > 0.0)
        .fold((0.0, 0usize), |(s, c), (v, _)| (s + v.abs(), c + 1));
    if count == 0 {
        return 1.0;
    }
    let scale = sum / count as f64;
    if scale > 1e-10 && scale.is_finite() {
        scale
    } else {
        1.0
    }
}

/// Scaled value and mask of one position; masked positions read as zero.
pub fn scaled_target(value: f64, observed: f64, scale: f64) -> (f64, f64) {
    if observed > 0.0 {
        (value / scale, 1.0)
    } else {
        (0.0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(past: Vec<f64>, observed: Vec<f64>) -> Window {
        Window {
            series_index: 0,
            forecast_start: 0,
            past_target: past,
            past_observed: observed,
            future_target: vec![],
            future_observed: vec![],
            past_dynamic: vec![],
            future_dynamic: vec![],
            num_dynamic: 0,
            static_categorical: vec![],
            static_real: vec![],
        }
    }

    #[test]
    fn scale_ignores_masked_positions() {
        let w = window(vec![1e6, -2.0, 4.0], vec![0.0, 1.0, 1.0]);
        assert_eq!(mean_abs_scale(&w), 3.0);
    }

    #[test]
    fn degenerate_windows_use_unit_scale() {
        assert_eq!(mean_abs_scale(&window(vec![5.0], vec![0.0])), 1.0);
        assert_eq!(mean_abs_scale(&window(vec![0.0, 0.0], vec![1.0, 1.0])), 1.0);
    }
}
