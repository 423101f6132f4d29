//! Resampling of irregular or differently-stepped observations onto a calendar.

use crate::core::calendar::{Calendar, Frequency, OffCalendarPolicy};
use crate::error::{ForecastError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How values are combined (downsampling) or distributed (upsampling).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResampleRule {
    Sum,
    Mean,
    Last,
}

/// Values on consecutive target-calendar steps starting at `start_step`.
#[derive(Debug, Clone, PartialEq)]
pub struct Resampled {
    pub start_step: i64,
    pub values: Vec<f64>,
}

/// Resample `(timestamps, values)` observed at `source` frequency onto `target`.
///
/// When the target step is at least as long as the source step, each
/// observation falls into the target step containing it and buckets are
/// aggregated by `rule`; NaN observations are ignored and empty buckets are NaN.
/// Otherwise each source value covers the target steps from its own timestamp up
/// to the next observation: `Last` repeats it, `Sum` spreads it evenly and
/// `Mean` interpolates linearly towards the next value.
pub fn resample(
    timestamps: &[DateTime<Utc>],
    values: &[f64],
    source: Frequency,
    target: &Calendar,
    rule: ResampleRule,
) -> Result<Resampled> {
    if timestamps.is_empty() {
        return Err(ForecastError::EmptyData);
    }
    if timestamps.len() != values.len() {
        return Err(ForecastError::DimensionMismatch {
            expected: timestamps.len(),
            got: values.len(),
        });
    }
    if timestamps.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ForecastError::TimestampError(
            "resample input timestamps must be strictly increasing".to_string(),
        ));
    }

    if target.frequency().nominal_seconds() >= source.nominal_seconds() {
        downsample(timestamps, values, target, rule)
    } else {
        upsample(timestamps, values, source, target, rule)
    }
}

fn downsample(
    timestamps: &[DateTime<Utc>],
    values: &[f64],
    target: &Calendar,
    rule: ResampleRule,
) -> Result<Resampled> {
    let steps = timestamps
        .iter()
        .map(|t| target.floor_step(*t))
        .collect::<Result<Vec<_>>>()?;
    let start_step = steps[0];
    let len = (steps[steps.len() - 1] - start_step + 1) as usize;

    let mut sums = vec![0.0; len];
    let mut counts = vec![0usize; len];
    let mut last = vec![f64::NAN; len];
    for (&step, &v) in steps.iter().zip(values) {
        if v.is_nan() {
            continue;
        }
        let i = (step - start_step) as usize;
        sums[i] += v;
        counts[i] += 1;
        last[i] = v;
    }

    let values = (0..len)
        .map(|i| {
            if counts[i] == 0 {
                return f64::NAN;
            }
            match rule {
                ResampleRule::Sum => sums[i],
                ResampleRule::Mean => sums[i] / counts[i] as f64,
                ResampleRule::Last => last[i],
            }
        })
        .collect();

    Ok(Resampled { start_step, values })
}

fn upsample(
    timestamps: &[DateTime<Utc>],
    values: &[f64],
    source: Frequency,
    target: &Calendar,
    rule: ResampleRule,
) -> Result<Resampled> {
    let n = timestamps.len();
    let last_ts = timestamps[n - 1];
    let source_end = Calendar::new(source, last_ts, OffCalendarPolicy::RollForward)?
        .to_timestamp(1)?;

    let mut bounds = timestamps
        .iter()
        .map(|t| target.ceil_step(*t))
        .collect::<Result<Vec<_>>>()?;
    bounds.push(target.ceil_step(source_end)?);

    let start_step = bounds[0];
    let mut out = Vec::with_capacity((bounds[n] - start_step).max(0) as usize);
    for i in 0..n {
        let (from, to) = (bounds[i], bounds[i + 1]);
        let count = (to - from).max(0) as usize;
        if count == 0 {
            continue;
        }
        for step in from..to {
            let value = match rule {
                ResampleRule::Last => values[i],
                ResampleRule::Sum => values[i] / count as f64,
                ResampleRule::Mean if i + 1 < n => {
                    let t = target.to_timestamp(step)?;
                    let span = (timestamps[i + 1] - timestamps[i]).num_seconds() as f64;
                    let frac = (t - timestamps[i]).num_seconds() as f64 / span;
                    values[i] + frac * (values[i + 1] - values[i])
                }
                ResampleRule::Mean => values[i],
            };
            out.push(value);
        }
    }

    Ok(Resampled {
        start_step,
        values: out,
    })
}
