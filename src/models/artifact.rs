//! Trained model artifact and its JSON form.

use super::traits::{Architecture, ModelDims};
use super::build_model;
use crate::catalog::{FeatureSchema, SeriesCatalog};
use crate::core::Frequency;
use crate::error::{ForecastError, Result};
use crate::training::TrainingSummary;
use crate::window::PaddingPolicy;
use serde::{Deserialize, Serialize};

/// Version written into every serialized artifact.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Everything needed to forecast with a fitted model.
///
/// Produced by the training orchestrator and read-only afterwards. It can only
/// be applied to catalogs with the same frequency and feature schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub architecture: Architecture,
    pub frequency: Frequency,
    pub context_length: usize,
    pub horizon: usize,
    pub padding: PaddingPolicy,
    pub schema: FeatureSchema,
    /// Network input sizes, including which feature groups were used.
    pub dims: ModelDims,
    pub parameters: Vec<f64>,
    pub summary: TrainingSummary,
}

impl ModelArtifact {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse an artifact and verify its format version and parameter count.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        match value.get("format_version").and_then(serde_json::Value::as_u64) {
            Some(v) if v == u64::from(ARTIFACT_FORMAT_VERSION) => {}
            Some(v) => {
                return Err(ForecastError::Serialization(format!(
                    "unsupported artifact format version {v}, expected {ARTIFACT_FORMAT_VERSION}"
                )))
            }
            None => {
                return Err(ForecastError::Serialization(
                    "artifact has no format_version".to_string(),
                ))
            }
        }
        let artifact: Self = serde_json::from_value(value)?;
        let expected = build_model(&artifact.architecture, &artifact.dims).num_params();
        if artifact.parameters.len() != expected {
            return Err(ForecastError::ArtifactMismatch {
                violations: vec![format!(
                    "artifact holds {} parameters, {} expects {expected}",
                    artifact.parameters.len(),
                    artifact.architecture.label()
                )],
            });
        }
        Ok(artifact)
    }

    /// Fail with every way `catalog` differs from what the model was trained on.
    pub fn check_compatible(&self, catalog: &SeriesCatalog) -> Result<()> {
        let mut v = Vec::new();
        let frequency = catalog.calendar().frequency();
        if frequency != self.frequency {
            v.push(format!(
                "frequency {frequency} differs from trained frequency {}",
                self.frequency
            ));
        }
        v.extend(self.schema.differences(catalog.schema()));
        if v.is_empty() {
            Ok(())
        } else {
            Err(ForecastError::ArtifactMismatch { violations: v })
        }
    }
}
