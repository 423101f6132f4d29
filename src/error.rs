//! Error types for the anofox-panel library.

use crate::models::ModelArtifact;
use thiserror::Error;

/// Result type alias for forecast operations.
pub type Result<T> = std::result::Result<T, ForecastError>;

/// Errors that can occur while building catalogs, training, or forecasting.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForecastError {
    /// Input data is empty.
    #[error("empty input data")]
    EmptyData,

    /// Insufficient data points for the operation.
    #[error("insufficient data: need at least {needed}, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// Invalid parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Dimension mismatch between data structures.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Timestamp-related error.
    #[error("timestamp error: {0}")]
    TimestampError(String),

    /// The frequency has no step rule.
    #[error("unsupported frequency: {0}")]
    UnsupportedFrequency(String),

    /// A series with the same identity is already registered.
    #[error("duplicate series: {series_id}")]
    DuplicateSeries { series_id: String },

    /// Static or dynamic feature shapes differ from the catalog schema.
    #[error("schema mismatch for series {series_id}: {}", .violations.join("; "))]
    SchemaMismatch {
        series_id: String,
        violations: Vec<String>,
    },

    /// Dynamic features do not reach the end of the forecast horizon.
    #[error("insufficient dynamic feature coverage for series: {}", .series_ids.join(", "))]
    InsufficientFeatureCoverage { series_ids: Vec<String> },

    /// Series too short for the configured context/horizon.
    #[error("insufficient history (need {needed} steps) for series: {}", .series_ids.join(", "))]
    InsufficientHistory {
        needed: usize,
        series_ids: Vec<String>,
    },

    /// Gaps in a series' time column.
    #[error("time column is not continuous for series: {}", .series_ids.join(", "))]
    DiscontinuousTimeIndex { series_ids: Vec<String> },

    /// Dynamic features cannot cover a window's step range.
    #[error(
        "feature alignment failed for series {series_id}: window needs steps [{required_start}, {required_end}), features cover [{available_start}, {available_end})"
    )]
    FeatureAlignment {
        series_id: String,
        required_start: i64,
        required_end: i64,
        available_start: i64,
        available_end: i64,
    },

    /// The catalog requests capabilities the architecture lacks.
    #[error("incompatible feature set for {architecture}: {}", .violations.join("; "))]
    IncompatibleFeatureSet {
        architecture: String,
        violations: Vec<String>,
    },

    /// Configuration failed validation.
    #[error("invalid configuration: {}", .violations.join("; "))]
    InvalidConfiguration { violations: Vec<String> },

    /// The requested compute device cannot be used.
    #[error("device unavailable: {device} ({reason})")]
    DeviceUnavailable { device: String, reason: String },

    /// Loss became non-finite during training.
    #[error("training diverged at epoch {epoch}: non-finite loss")]
    TrainingDiverged {
        epoch: usize,
        last_good: Option<Box<ModelArtifact>>,
    },

    /// The run was cancelled through its cancellation token.
    #[error("run cancelled at epoch {epoch}")]
    Cancelled {
        epoch: usize,
        last_good: Option<Box<ModelArtifact>>,
    },

    /// Artifact cannot be applied to the given catalog.
    #[error("artifact mismatch: {}", .violations.join("; "))]
    ArtifactMismatch { violations: Vec<String> },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Index out of bounds.
    #[error("index out of bounds: {index} (size: {size})")]
    IndexOutOfBounds { index: usize, size: usize },

    /// Computation error (e.g., numerical issues).
    #[error("computation error: {0}")]
    ComputationError(String),

    /// Several independent problems found in one pass.
    #[error("{} problems: {}", .0.len(), join_errors(.0))]
    Multiple(Vec<ForecastError>),
}

impl ForecastError {
    /// Collapse a list of collected errors into one.
    ///
    /// Returns `None` when the list is empty.
    pub fn collect(mut errors: Vec<ForecastError>) -> Option<ForecastError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(ForecastError::Multiple(errors)),
        }
    }

    /// The last-known-good artifact carried by a training failure, if any.
    pub fn recovered_artifact(&self) -> Option<&ModelArtifact> {
        match self {
            ForecastError::TrainingDiverged { last_good, .. }
            | ForecastError::Cancelled { last_good, .. } => last_good.as_deref(),
            _ => None,
        }
    }
}

fn join_errors(errors: &[ForecastError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(" | ")
}

impl From<serde_json::Error> for ForecastError {
    fn from(err: serde_json::Error) -> Self {
        ForecastError::Serialization(err.to_string())
    }
}
