//! # anofox-panel
//!
//! Global probabilistic forecasting over panels of related time series.
//!
//! One model is trained across every series of a [`catalog::SeriesCatalog`]
//! and emits distribution forecasts (quantiles or sample paths) reconciled to
//! the series' calendar. Provided architectures are DeepAR, a Transformer, a
//! simple feed-forward network, N-BEATS style residual blocks, and Naive /
//! Seasonal Naive baselines.

// Allow some clippy warnings for cleaner code in specific cases
#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]
#![allow(clippy::needless_range_loop)]

pub mod catalog;
pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod evaluation;
pub mod models;
pub mod training;
pub mod utils;
pub mod window;

pub use error::{ForecastError, Result};

pub mod prelude {
    pub use crate::catalog::{ColumnRoles, FeatureSchema, SeriesCatalog, SeriesId, Table};
    pub use crate::config::{ForecastConfig, ForecastingStyle, OutputRequest};
    pub use crate::context::{CancellationToken, RunContext};
    pub use crate::core::{Calendar, Forecast, ForecastDistribution, Frequency};
    pub use crate::error::{ForecastError, Result};
    pub use crate::evaluation::{backtest, evaluate_and_refit, forecast, Metrics};
    pub use crate::models::{Architecture, ModelArtifact};
    pub use crate::training::fit;
    pub use crate::window::PaddingPolicy;
}
