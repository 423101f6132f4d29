//! Fixed-shape windows and minibatches.

/// A context/prediction slice of one series.
///
/// Per-step dynamic features are flattened row-major: position `t`, feature
/// `d` lives at `t * num_dynamic + d`. Masks hold 1.0 for observed positions
/// and 0.0 for padded or missing ones; masked positions carry the fill value.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    /// Index of the series in its catalog.
    pub series_index: usize,
    /// Absolute calendar step of the first predicted position.
    pub forecast_start: i64,
    pub past_target: Vec<f64>,
    pub past_observed: Vec<f64>,
    pub future_target: Vec<f64>,
    pub future_observed: Vec<f64>,
    pub past_dynamic: Vec<f64>,
    pub future_dynamic: Vec<f64>,
    pub num_dynamic: usize,
    pub static_categorical: Vec<usize>,
    pub static_real: Vec<f64>,
}

impl Window {
    pub fn context_length(&self) -> usize {
        self.past_target.len()
    }

    pub fn horizon(&self) -> usize {
        self.future_target.len()
    }

    /// Dynamic features at context position `t`.
    pub fn past_dynamic_row(&self, t: usize) -> &[f64] {
        let d = self.num_dynamic;
        &self.past_dynamic[t * d..(t + 1) * d]
    }

    /// Dynamic features at horizon position `t`.
    pub fn future_dynamic_row(&self, t: usize) -> &[f64] {
        let d = self.num_dynamic;
        &self.future_dynamic[t * d..(t + 1) * d]
    }

    /// Number of observed horizon positions.
    pub fn observed_future(&self) -> usize {
        self.future_observed.iter().filter(|&&m| m > 0.0).count()
    }
}

/// Windows of identical shape drawn for one optimizer step.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub epoch: usize,
    pub index: usize,
    pub windows: Vec<Window>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
