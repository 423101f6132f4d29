//! Forecast and evaluation engine.
//!
//! Applies trained artifacts to catalogs, backtests them against held-out
//! truth and renders forecasts and metrics as tables.

mod backtest;
mod forecast;
pub mod metrics;
mod session;

pub use backtest::{backtest, BacktestResult, SeriesMetrics};
pub use forecast::{forecast, forecasts_to_table};
pub use metrics::{aggregate, score, seasonal_error, Metrics};
pub use session::{evaluate_and_refit, metrics_to_table, SessionResult, AGGREGATED_ROW};
