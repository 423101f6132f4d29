//! Forecasting models.
//!
//! Every architecture implements [`WindowModel`] over fixed-shape windows and
//! keeps its weights in a flat parameter vector. [`build_model`] instantiates
//! an architecture for given input sizes and [`predict`] turns a trained
//! [`ModelArtifact`] plus windows into distribution summaries.

mod artifact;
mod attention;
pub mod baseline;
mod distribution;
mod embedding;
mod feedforward;
mod linalg;
mod nbeats;
mod params;
mod recurrent;
mod scaling;
mod traits;

pub use artifact::{ModelArtifact, ARTIFACT_FORMAT_VERSION};
pub use attention::Transformer;
pub use baseline::{Naive, SeasonalNaive};
pub use distribution::Gaussian;
pub use feedforward::SimpleFeedForward;
pub use nbeats::NBeats;
pub use recurrent::DeepAr;
pub use scaling::mean_abs_scale;
pub use traits::{
    Architecture, Capabilities, FeatureRequest, ModelDims, OutputKind, Prediction, WindowModel,
};

use crate::config::OutputRequest;
use crate::core::{ForecastDistribution, Frequency};
use crate::error::Result;
use crate::utils::{derive_seed, normal_quantile};
use crate::window::Window;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Instantiate `architecture` for the given input sizes.
pub fn build_model(architecture: &Architecture, dims: &ModelDims) -> Box<dyn WindowModel> {
    match architecture {
        Architecture::DeepAr {
            hidden_size,
            embedding_dim,
        } => Box::new(DeepAr::new(dims, *hidden_size, *embedding_dim)),
        Architecture::Transformer {
            model_dim,
            embedding_dim,
        } => Box::new(Transformer::new(dims, *model_dim, *embedding_dim)),
        Architecture::SimpleFeedForward { hidden_size } => {
            Box::new(SimpleFeedForward::new(dims, *hidden_size))
        }
        Architecture::NBeats {
            num_blocks,
            hidden_size,
        } => Box::new(NBeats::new(dims, *num_blocks, *hidden_size)),
        Architecture::Naive => Box::new(Naive::new(dims)),
        Architecture::SeasonalNaive { .. } => Box::new(SeasonalNaive::new(dims)),
    }
}

/// Season length used by `architecture` at `frequency`.
pub fn season_length(architecture: &Architecture, frequency: Frequency) -> usize {
    match architecture {
        Architecture::SeasonalNaive {
            season_length: Some(m),
        } => *m,
        _ => frequency.default_season_length(),
    }
}

/// Forecast of one window: the mean path and the requested summary.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowForecast {
    pub series_index: usize,
    pub forecast_start: i64,
    pub mean: Vec<f64>,
    pub distribution: ForecastDistribution,
}

/// Predict every window with a trained artifact.
///
/// Sample draws for a window are seeded from `(seed, series_index,
/// rolling_index)`, so the same window always yields the same paths.
/// Gaussian models answer quantile requests analytically; sample-emitting
/// models answer with empirical quantiles of their paths.
pub fn predict(
    artifact: &ModelArtifact,
    windows: &[Window],
    output: &OutputRequest,
    num_samples: usize,
    seed: u64,
    rolling_index: usize,
) -> Result<Vec<WindowForecast>> {
    if matches!(output, OutputRequest::Samples) {
        artifact.architecture.check_request(&FeatureRequest {
            samples: true,
            ..FeatureRequest::default()
        })?;
    }
    let model = build_model(&artifact.architecture, &artifact.dims);
    windows
        .iter()
        .map(|window| {
            let mut rng = StdRng::seed_from_u64(derive_seed(
                seed,
                &[window.series_index as u64, rolling_index as u64],
            ));
            let prediction = model.predict(&artifact.parameters, window, num_samples, &mut rng)?;
            let (mean, distribution) = summarize(prediction, output)?;
            Ok(WindowForecast {
                series_index: window.series_index,
                forecast_start: window.forecast_start,
                mean,
                distribution,
            })
        })
        .collect()
}

fn summarize(prediction: Prediction, output: &OutputRequest) -> Result<(Vec<f64>, ForecastDistribution)> {
    match prediction {
        Prediction::Gaussian { mean, scale } => {
            let levels = match output {
                OutputRequest::Quantiles { levels } => levels.clone(),
                // Rejected before predicting.
                OutputRequest::Samples => Vec::new(),
            };
            let values = levels
                .iter()
                .map(|&p| {
                    mean.iter()
                        .zip(&scale)
                        .map(|(&m, &s)| normal_quantile(p, m, s))
                        .collect()
                })
                .collect();
            Ok((mean, ForecastDistribution::Quantiles { levels, values }))
        }
        Prediction::Samples(paths) => {
            let horizon = paths.first().map(Vec::len).unwrap_or(0);
            let n = paths.len().max(1) as f64;
            let mean = (0..horizon)
                .map(|t| paths.iter().map(|p| p[t]).sum::<f64>() / n)
                .collect();
            let samples = ForecastDistribution::Samples { paths };
            let distribution = match output {
                OutputRequest::Quantiles { levels } => samples.to_quantiles(levels)?,
                OutputRequest::Samples => samples,
            };
            Ok((mean, distribution))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::toy_window;
    use super::*;
    use crate::catalog::FeatureSchema;
    use crate::training::{StopReason, TrainingState, TrainingSummary};
    use crate::window::PaddingPolicy;
    use approx::assert_relative_eq;

    fn artifact(architecture: Architecture) -> ModelArtifact {
        let schema = FeatureSchema::new();
        let dims = ModelDims::new(6, 3, &schema, true, true, 2);
        let parameters = build_model(&architecture, &dims).init_params(1);
        ModelArtifact {
            format_version: ARTIFACT_FORMAT_VERSION,
            architecture,
            frequency: "D".parse().unwrap(),
            context_length: 6,
            horizon: 3,
            padding: PaddingPolicy::Pad { sentinel: 0.0 },
            schema,
            dims,
            parameters,
            summary: TrainingSummary {
                epochs_run: 0,
                best_epoch: None,
                train_losses: vec![],
                validation_losses: vec![],
                best_validation_loss: None,
                stop_reason: StopReason::NotTrainable,
                wall_time_secs: 0.0,
                early_stopping: None,
                states: vec![TrainingState::Initialized, TrainingState::Finalized],
            },
        }
    }

    fn bare_window(variant: usize) -> Window {
        let mut w = toy_window(6, 3, 0, variant);
        w.static_categorical.clear();
        w.static_real.clear();
        w
    }

    #[test]
    fn every_architecture_builds_with_matching_sizes() {
        let dims = ModelDims::new(6, 3, &FeatureSchema::new(), true, true, 2);
        for arch in [
            Architecture::deep_ar(),
            Architecture::transformer(),
            Architecture::simple_feed_forward(),
            Architecture::nbeats(),
            Architecture::Naive,
            Architecture::SeasonalNaive { season_length: None },
        ] {
            let model = build_model(&arch, &dims);
            assert_eq!(model.init_params(0).len(), model.num_params());
            assert_eq!(model.name(), arch.label());
        }
    }

    #[test]
    fn gaussian_quantiles_are_analytic() {
        let a = artifact(Architecture::Naive);
        let output = OutputRequest::Quantiles {
            levels: vec![0.1, 0.5, 0.9],
        };
        let out = predict(&a, &[bare_window(0)], &output, 10, 0, 0).unwrap();
        let f = &out[0];
        let median = f.distribution.quantile(0.5).unwrap();
        for (m, q) in f.mean.iter().zip(&median) {
            assert_relative_eq!(m, q, epsilon = 1e-9);
        }
        let low = f.distribution.quantile(0.1).unwrap();
        let high = f.distribution.quantile(0.9).unwrap();
        assert!(low.iter().zip(&high).all(|(l, h)| l <= h));
    }

    #[test]
    fn sample_requests_need_a_sampling_model() {
        let a = artifact(Architecture::simple_feed_forward());
        assert!(predict(&a, &[bare_window(0)], &OutputRequest::Samples, 10, 0, 0).is_err());

        let a = artifact(Architecture::deep_ar());
        let out = predict(&a, &[bare_window(0)], &OutputRequest::Samples, 10, 0, 0).unwrap();
        match &out[0].distribution {
            ForecastDistribution::Samples { paths } => assert_eq!(paths.len(), 10),
            other => panic!("unexpected distribution {other:?}"),
        }
    }

    #[test]
    fn draws_depend_on_series_and_rolling_index_only() {
        let a = artifact(Architecture::deep_ar());
        let output = OutputRequest::default();
        let w = bare_window(1);
        let first = predict(&a, &[w.clone()], &output, 20, 7, 0).unwrap();
        let batch = predict(&a, &[bare_window(0), w.clone()], &output, 20, 7, 0).unwrap();
        assert_eq!(first[0], batch[1]);
        let rolled = predict(&a, &[w], &output, 20, 7, 1).unwrap();
        assert_ne!(first[0], rolled[0]);
    }
}
