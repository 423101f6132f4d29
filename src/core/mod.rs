//! Core data structures: stepped calendars, resampling and forecast results.

pub mod calendar;
mod forecast;
pub mod resample;

pub use calendar::{Calendar, Frequency, FrequencyUnit, OffCalendarPolicy};
pub use forecast::{Forecast, ForecastDistribution};
pub use resample::{resample, ResampleRule, Resampled};
