//! Windowing and batching engine.
//!
//! Turns catalog series into fixed-shape context/horizon windows for
//! training, validation, prediction and backtesting. Window positions are
//! absolute calendar steps; the target and dynamic features are both sliced
//! by step, so features with a different start or length line up correctly.

mod align;
mod batch;
mod prefetch;
mod sampler;

pub use align::slice_dynamic;
pub use batch::{Batch, Window};
pub use prefetch::prefetch_batches;
pub use sampler::{BatchSampler, SamplingStrategy};

use crate::catalog::{HistoryRequirements, SeriesCatalog, SeriesEntry};
use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How windows with insufficient history are handled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum PaddingPolicy {
    /// Fill missing context with `sentinel` and mask it out.
    Pad { sentinel: f64 },
    /// Only use windows with a full context.
    Drop,
}

impl PaddingPolicy {
    /// Value written at masked positions.
    pub fn fill_value(&self) -> f64 {
        match self {
            PaddingPolicy::Pad { sentinel } => *sentinel,
            PaddingPolicy::Drop => 0.0,
        }
    }
}

/// Candidate training windows of one series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesCandidates {
    pub series_index: usize,
    /// Valid forecast start steps, ascending.
    pub starts: Vec<i64>,
}

/// Series eligible for training and their candidate windows.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingPlan {
    pub series: Vec<SeriesCandidates>,
    /// Series left out under `Drop` because they are too short.
    pub dropped: Vec<usize>,
}

impl TrainingPlan {
    pub fn total_candidates(&self) -> usize {
        self.series.iter().map(|s| s.starts.len()).sum()
    }
}

/// Cuts windows of one (context, horizon) shape out of a catalog.
#[derive(Debug, Clone, Copy)]
pub struct Windower<'a> {
    catalog: &'a SeriesCatalog,
    context_length: usize,
    horizon: usize,
    padding: PaddingPolicy,
}

impl<'a> Windower<'a> {
    pub fn new(
        catalog: &'a SeriesCatalog,
        context_length: usize,
        horizon: usize,
        padding: PaddingPolicy,
    ) -> Result<Self> {
        if context_length == 0 {
            return Err(ForecastError::InvalidParameter(
                "context_length must be positive".to_string(),
            ));
        }
        if horizon == 0 {
            return Err(ForecastError::InvalidParameter(
                "horizon must be positive".to_string(),
            ));
        }
        Ok(Self {
            catalog,
            context_length,
            horizon,
            padding,
        })
    }

    pub fn catalog(&self) -> &'a SeriesCatalog {
        self.catalog
    }

    pub fn context_length(&self) -> usize {
        self.context_length
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn padding(&self) -> PaddingPolicy {
        self.padding
    }

    /// Shortest series that yields a training window.
    pub fn min_training_length(&self) -> usize {
        match self.padding {
            PaddingPolicy::Pad { .. } => 2 * self.horizon + 1,
            PaddingPolicy::Drop => self.context_length + 2 * self.horizon,
        }
    }

    /// Catalog requirements for training. Short series are an error under
    /// `Pad`; under `Drop` they are left out of the plan instead.
    pub fn training_requirements(&self) -> HistoryRequirements {
        let min_length = match self.padding {
            PaddingPolicy::Pad { .. } => self.min_training_length(),
            PaddingPolicy::Drop => 0,
        };
        HistoryRequirements::new(self.horizon, min_length)
    }

    /// Catalog requirements for prediction.
    pub fn prediction_requirements(&self) -> HistoryRequirements {
        let min_length = match self.padding {
            PaddingPolicy::Pad { .. } => 1,
            PaddingPolicy::Drop => self.context_length,
        };
        HistoryRequirements::new(self.horizon, min_length)
    }

    /// Candidate forecast starts for every series.
    ///
    /// The last `horizon` steps of each series are held out for validation,
    /// so a candidate's horizon must end before them. Under `Pad` a candidate
    /// needs one observed context step; under `Drop` a full context.
    pub fn training_plan(&self) -> Result<TrainingPlan> {
        let mut series = Vec::new();
        let mut dropped = Vec::new();
        let mut too_short = Vec::new();

        for (index, entry) in self.catalog.iter().enumerate() {
            let starts = self.candidate_starts(entry);
            if !starts.is_empty() {
                series.push(SeriesCandidates {
                    series_index: index,
                    starts,
                });
                continue;
            }
            match self.padding {
                PaddingPolicy::Pad { .. } => too_short.push(entry.id().to_string()),
                PaddingPolicy::Drop => {
                    debug!(
                        series = %entry.id(),
                        length = entry.len(),
                        needed = self.min_training_length(),
                        "dropping series without a full training window"
                    );
                    dropped.push(index);
                }
            }
        }

        if !too_short.is_empty() || series.is_empty() {
            if too_short.is_empty() {
                too_short = self.catalog.iter().map(|e| e.id().to_string()).collect();
            }
            return Err(ForecastError::InsufficientHistory {
                needed: self.min_training_length(),
                series_ids: too_short,
            });
        }
        Ok(TrainingPlan { series, dropped })
    }

    fn candidate_starts(&self, entry: &SeriesEntry) -> Vec<i64> {
        let len = entry.len() as i64;
        let c = self.context_length as i64;
        let h = self.horizon as i64;
        let last = len - 2 * h;
        let first = match self.padding {
            PaddingPolicy::Pad { .. } => 1,
            PaddingPolicy::Drop => c,
        };
        if last < first {
            return Vec::new();
        }

        // observed[i] = observed values among target[..i]
        let mut observed = Vec::with_capacity(entry.len() + 1);
        observed.push(0usize);
        for v in entry.target() {
            let prev = observed[observed.len() - 1];
            observed.push(prev + usize::from(!v.is_nan()));
        }

        (first..=last)
            .filter(|&offset| {
                let from = (offset - c).max(0) as usize;
                observed[offset as usize] - observed[from] > 0
            })
            .map(|offset| entry.start_step() + offset)
            .collect()
    }

    /// Window of series `series_index` whose horizon starts at `forecast_start`.
    ///
    /// With `with_future` the horizon target is filled from the series where
    /// known; otherwise it is entirely masked.
    pub fn window_at(
        &self,
        series_index: usize,
        forecast_start: i64,
        with_future: bool,
    ) -> Result<Window> {
        let entry = self
            .catalog
            .get(series_index)
            .ok_or(ForecastError::IndexOutOfBounds {
                index: series_index,
                size: self.catalog.len(),
            })?;
        let fill = self.padding.fill_value();
        let c = self.context_length as i64;
        let h = self.horizon as i64;

        let read = |from: i64, to: i64, known: bool| -> (Vec<f64>, Vec<f64>) {
            (from..to)
                .map(|step| {
                    let v = if known { entry.value_at(step) } else { f64::NAN };
                    if v.is_nan() {
                        (fill, 0.0)
                    } else {
                        (v, 1.0)
                    }
                })
                .unzip()
        };
        let (past_target, past_observed) = read(forecast_start - c, forecast_start, true);
        let (future_target, future_observed) =
            read(forecast_start, forecast_start + h, with_future);

        let num_dynamic = self.catalog.schema().num_dynamic();
        let (past_dynamic, future_dynamic) = slice_dynamic(
            entry,
            forecast_start,
            self.context_length,
            self.horizon,
            num_dynamic,
        )?;

        Ok(Window {
            series_index,
            forecast_start,
            past_target,
            past_observed,
            future_target,
            future_observed,
            past_dynamic,
            future_dynamic,
            num_dynamic,
            static_categorical: entry.statics().categorical.clone(),
            static_real: entry.statics().real.clone(),
        })
    }

    /// One window per planned series predicting its last `horizon` steps.
    pub fn validation_windows(&self, plan: &TrainingPlan) -> Result<Vec<Window>> {
        plan.series
            .iter()
            .map(|s| {
                let entry = self.entry(s.series_index)?;
                self.window_at(
                    s.series_index,
                    entry.end_step() - self.horizon as i64,
                    true,
                )
            })
            .collect()
    }

    /// One window per series starting right after its last step.
    pub fn prediction_windows(&self) -> Result<Vec<Window>> {
        self.catalog.validate(&self.prediction_requirements())?;
        self.catalog
            .iter()
            .enumerate()
            .map(|(index, entry)| self.window_at(index, entry.end_step(), false))
            .collect()
    }

    /// Number of full non-overlapping backtest windows of a series.
    pub fn backtest_window_count(&self, entry: &SeriesEntry) -> usize {
        entry.len().saturating_sub(self.context_length) / self.horizon
    }

    /// Rolling backtest windows: `result[r][series]` predicts
    /// `[end - (r + 1) * horizon, end - r * horizon)`.
    pub fn backtest_windows(&self, num_windows: usize) -> Result<Vec<Vec<Window>>> {
        if num_windows == 0 {
            return Err(ForecastError::InvalidParameter(
                "num_rolling_windows must be positive".to_string(),
            ));
        }
        let short: Vec<String> = self
            .catalog
            .iter()
            .filter(|e| self.backtest_window_count(e) < num_windows)
            .map(|e| e.id().to_string())
            .collect();
        if !short.is_empty() {
            return Err(ForecastError::InsufficientHistory {
                needed: self.context_length + num_windows * self.horizon,
                series_ids: short,
            });
        }

        let h = self.horizon as i64;
        (0..num_windows)
            .map(|r| {
                self.catalog
                    .iter()
                    .enumerate()
                    .map(|(index, entry)| {
                        let start = entry.end_step() - (r as i64 + 1) * h;
                        self.window_at(index, start, true)
                    })
                    .collect()
            })
            .collect()
    }

    fn entry(&self, index: usize) -> Result<&'a SeriesEntry> {
        self.catalog.get(index).ok_or(ForecastError::IndexOutOfBounds {
            index,
            size: self.catalog.len(),
        })
    }
}
