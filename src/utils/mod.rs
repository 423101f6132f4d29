//! Utility functions shared across modules.

pub mod seed;
pub mod stats;

pub use seed::derive_seed;
pub use stats::{empirical_quantile, normal_quantile};
