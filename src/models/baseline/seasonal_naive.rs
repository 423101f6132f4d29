//! Seasonal Naive forecasting model.
//!
//! Forecasts by repeating the value from the same season in the previous cycle.

use super::naive::naive_prediction;
use super::{lag_residual_sigma, not_trainable, require_observed};
use crate::error::Result;
use crate::models::traits::{check_params, ModelDims, Prediction, WindowModel};
use crate::window::Window;
use rand::rngs::StdRng;

/// Seasonal Naive forecaster.
///
/// Each forecast equals the last observation from the same season. Missing
/// seasonal values reach back one more cycle, then fall back to the last
/// observed value. When the season is longer than the context the model
/// behaves like [`super::Naive`].
#[derive(Debug, Clone, PartialEq)]
pub struct SeasonalNaive {
    period: usize,
    horizon: usize,
}

impl SeasonalNaive {
    pub fn new(dims: &ModelDims) -> Self {
        Self {
            period: dims.season_length.max(1),
            horizon: dims.horizon,
        }
    }

    /// Get the seasonal period.
    pub fn period(&self) -> usize {
        self.period
    }
}

impl WindowModel for SeasonalNaive {
    fn name(&self) -> &str {
        "seasonal_naive"
    }

    fn num_params(&self) -> usize {
        0
    }

    fn init_params(&self, _seed: u64) -> Vec<f64> {
        Vec::new()
    }

    fn loss(&self, _params: &[f64], _windows: &[Window], _grad: Option<&mut [f64]>) -> Result<f64> {
        Err(not_trainable(self.name()))
    }

    fn predict(
        &self,
        params: &[f64],
        window: &Window,
        _num_samples: usize,
        _rng: &mut StdRng,
    ) -> Result<Prediction> {
        check_params(params, 0)?;
        let n = window.context_length();
        let period = self.period;
        if period > n {
            return naive_prediction(window, self.horizon);
        }
        let fallback = require_observed(window)?;
        let sigma = lag_residual_sigma(window, period);

        let mut mean = Vec::with_capacity(self.horizon);
        let mut scale = Vec::with_capacity(self.horizon);
        for h in 0..self.horizon {
            let mut idx = n - period + (h % period);
            while window.past_observed[idx] == 0.0 && idx >= period {
                idx -= period;
            }
            mean.push(if window.past_observed[idx] > 0.0 {
                window.past_target[idx]
            } else {
                fallback
            });
            // Standard error increases with number of complete seasons ahead
            let k = (h / period) + 1;
            scale.push(sigma * (k as f64).sqrt());
        }
        Ok(Prediction::Gaussian { mean, scale })
    }
}
