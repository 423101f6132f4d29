//! Naive forecasting model.
//!
//! The naive method forecasts the last observed value for all future periods.

use super::{lag_residual_sigma, not_trainable, require_observed};
use crate::error::Result;
use crate::models::traits::{check_params, ModelDims, Prediction, WindowModel};
use crate::window::Window;
use rand::rngs::StdRng;

/// Naive forecaster that repeats the last observed value.
///
/// The spread at step `h` is the RMS of one-step differences times `sqrt(h)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Naive {
    horizon: usize,
}

impl Naive {
    pub fn new(dims: &ModelDims) -> Self {
        Self {
            horizon: dims.horizon,
        }
    }
}

/// Shared by the seasonal model when its season does not fit the context.
pub(super) fn naive_prediction(window: &Window, horizon: usize) -> Result<Prediction> {
    let last = require_observed(window)?;
    let sigma = lag_residual_sigma(window, 1);
    Ok(Prediction::Gaussian {
        mean: vec![last; horizon],
        scale: (1..=horizon).map(|h| sigma * (h as f64).sqrt()).collect(),
    })
}

impl WindowModel for Naive {
    fn name(&self) -> &str {
        "naive"
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
        naive_prediction(window, self.horizon)
    }
}
