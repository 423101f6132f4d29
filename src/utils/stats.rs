//! Statistical utility functions.

use statrs::distribution::{ContinuousCDF, Normal};

/// Quantile of the normal distribution with the given mean and scale.
///
/// Degenerate scales (zero, negative or non-finite) collapse to `mean`.
///
/// # Example
/// ```
/// use anofox_panel::utils::normal_quantile;
///
/// let z = normal_quantile(0.975, 0.0, 1.0);
/// assert!((z - 1.959964).abs() < 1e-5);
/// ```
pub fn normal_quantile(p: f64, mean: f64, scale: f64) -> f64 {
    if !(scale.is_finite() && scale > 0.0) {
        return mean;
    }
    match Normal::new(mean, scale) {
        Ok(dist) => dist.inverse_cdf(p.clamp(1e-12, 1.0 - 1e-12)),
        Err(_) => mean,
    }
}

/// Mean over the non-NaN entries; NaN when there are none.
pub fn nan_mean(values: &[f64]) -> f64 {
    let (sum, count) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Empirical quantile with linear interpolation between order statistics.
pub fn empirical_quantile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}
