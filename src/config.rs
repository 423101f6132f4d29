//! Run configuration.
//!
//! [`ForecastConfig`] is the validated object the host hands to the core. It
//! deserializes from JSON with defaults for everything except the calendar,
//! window shape, model and padding policy, which every run must state.

use crate::core::{Frequency, OffCalendarPolicy};
use crate::error::{ForecastError, Result};
use crate::models::Architecture;
use crate::training::Device;
use crate::window::{PaddingPolicy, SamplingStrategy};
use serde::{Deserialize, Serialize};

/// Shape of the distribution summary returned by forecasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputRequest {
    /// Values at the given probability levels, ascending in (0, 1).
    Quantiles { levels: Vec<f64> },
    /// Raw sample paths; only sample-emitting architectures support this.
    Samples,
}

impl Default for OutputRequest {
    fn default() -> Self {
        OutputRequest::Quantiles {
            levels: vec![0.1, 0.5, 0.9],
        }
    }
}

fn default_num_epochs() -> usize {
    10
}

fn default_patience() -> usize {
    5
}

fn default_learning_rate() -> f64 {
    1e-3
}

fn default_batch_size() -> usize {
    32
}

fn default_num_batches_per_epoch() -> usize {
    50
}

fn default_gradient_clip() -> Option<f64> {
    Some(10.0)
}

fn default_num_samples() -> usize {
    100
}

fn default_prefetch_capacity() -> usize {
    4
}

fn default_true() -> bool {
    true
}

/// Automatic model selection modes and the candidates each one evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastingStyle {
    /// Baselines plus DeepAR.
    Auto,
    /// Baselines plus every trainable architecture.
    AutoPerformance,
}

impl ForecastingStyle {
    pub fn candidates(self) -> Vec<Architecture> {
        let mut models = vec![
            Architecture::Naive,
            Architecture::SeasonalNaive {
                season_length: None,
            },
        ];
        match self {
            ForecastingStyle::Auto => models.push(Architecture::deep_ar()),
            ForecastingStyle::AutoPerformance => models.extend([
                Architecture::simple_feed_forward(),
                Architecture::deep_ar(),
                Architecture::transformer(),
                Architecture::nbeats(),
            ]),
        }
        models
    }
}

/// Configuration of one training/forecasting run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastConfig {
    pub frequency: Frequency,
    #[serde(default)]
    pub off_calendar_policy: OffCalendarPolicy,
    pub context_length: usize,
    pub horizon: usize,
    pub model: Architecture,
    /// Required: there is no implicit padding behaviour.
    pub padding: PaddingPolicy,
    #[serde(default = "default_num_epochs")]
    pub num_epochs: usize,
    #[serde(default = "default_patience")]
    pub patience: usize,
    #[serde(default)]
    pub min_delta: f64,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_num_batches_per_epoch")]
    pub num_batches_per_epoch: usize,
    /// Global gradient-norm limit; `None` disables clipping.
    #[serde(default = "default_gradient_clip")]
    pub gradient_clip: Option<f64>,
    #[serde(default)]
    pub device: Device,
    #[serde(default)]
    pub output: OutputRequest,
    /// Sample paths drawn per series by sample-emitting models.
    #[serde(default = "default_num_samples")]
    pub num_samples: usize,
    #[serde(default)]
    pub sampling_strategy: SamplingStrategy,
    /// Feed the catalog's dynamic features to the model.
    #[serde(default = "default_true")]
    pub use_dynamic_features: bool,
    /// Feed the catalog's static features to the model.
    #[serde(default = "default_true")]
    pub use_static_features: bool,
    #[serde(default)]
    pub seed: u64,
    /// Batch-building threads; 0 builds batches on the training thread.
    #[serde(default)]
    pub num_workers: usize,
    #[serde(default = "default_prefetch_capacity")]
    pub prefetch_capacity: usize,
}

impl ForecastConfig {
    /// Create a configuration with default training settings.
    pub fn new(
        frequency: Frequency,
        context_length: usize,
        horizon: usize,
        model: Architecture,
        padding: PaddingPolicy,
    ) -> Self {
        Self {
            frequency,
            off_calendar_policy: OffCalendarPolicy::default(),
            context_length,
            horizon,
            model,
            padding,
            num_epochs: default_num_epochs(),
            patience: default_patience(),
            min_delta: 0.0,
            learning_rate: default_learning_rate(),
            batch_size: default_batch_size(),
            num_batches_per_epoch: default_num_batches_per_epoch(),
            gradient_clip: default_gradient_clip(),
            device: Device::default(),
            output: OutputRequest::default(),
            num_samples: default_num_samples(),
            sampling_strategy: SamplingStrategy::default(),
            use_dynamic_features: true,
            use_static_features: true,
            seed: 0,
            num_workers: 0,
            prefetch_capacity: default_prefetch_capacity(),
        }
    }

    /// Settings bundle of an automatic mode; pair with
    /// [`ForecastingStyle::candidates`] to pick the models.
    ///
    /// `Auto` looks back one horizon and trains briefly. `AutoPerformance`
    /// looks back two horizons and trains three times as long.
    pub fn preset(
        style: ForecastingStyle,
        frequency: Frequency,
        horizon: usize,
        padding: PaddingPolicy,
    ) -> Self {
        let base = Self::new(frequency, horizon, horizon, Architecture::deep_ar(), padding);
        match style {
            ForecastingStyle::Auto => base,
            ForecastingStyle::AutoPerformance => Self {
                context_length: 2 * horizon,
                num_epochs: 3 * default_num_epochs(),
                num_batches_per_epoch: 2 * default_num_batches_per_epoch(),
                ..base
            },
        }
    }

    pub fn with_model(mut self, model: Architecture) -> Self {
        self.model = model;
        self
    }

    pub fn with_off_calendar_policy(mut self, policy: OffCalendarPolicy) -> Self {
        self.off_calendar_policy = policy;
        self
    }

    pub fn with_epochs(mut self, num_epochs: usize) -> Self {
        self.num_epochs = num_epochs;
        self
    }

    pub fn with_early_stopping(mut self, patience: usize, min_delta: f64) -> Self {
        self.patience = patience;
        self.min_delta = min_delta;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_batches(mut self, batch_size: usize, num_batches_per_epoch: usize) -> Self {
        self.batch_size = batch_size;
        self.num_batches_per_epoch = num_batches_per_epoch;
        self
    }

    pub fn with_gradient_clip(mut self, clip: Option<f64>) -> Self {
        self.gradient_clip = clip;
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_output(mut self, output: OutputRequest) -> Self {
        self.output = output;
        self
    }

    pub fn with_num_samples(mut self, num_samples: usize) -> Self {
        self.num_samples = num_samples;
        self
    }

    pub fn with_sampling_strategy(mut self, strategy: SamplingStrategy) -> Self {
        self.sampling_strategy = strategy;
        self
    }

    pub fn with_feature_usage(mut self, dynamic: bool, statics: bool) -> Self {
        self.use_dynamic_features = dynamic;
        self.use_static_features = statics;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_prefetch(mut self, num_workers: usize, capacity: usize) -> Self {
        self.num_workers = num_workers;
        self.prefetch_capacity = capacity;
        self
    }

    /// Check every setting and report all violations together.
    pub fn validate(&self) -> Result<()> {
        let mut v = Vec::new();

        if self.context_length == 0 {
            v.push("context_length must be positive".to_string());
        }
        if self.horizon == 0 {
            v.push("horizon must be positive".to_string());
        }
        if let PaddingPolicy::Pad { sentinel } = self.padding {
            if !sentinel.is_finite() {
                v.push("padding sentinel must be finite".to_string());
            }
        }

        let trainable = self.model.capabilities().trainable;
        if trainable {
            if self.num_epochs == 0 {
                v.push("num_epochs must be positive".to_string());
            }
            if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
                v.push(format!(
                    "learning_rate must be positive, got {}",
                    self.learning_rate
                ));
            }
            if self.batch_size == 0 {
                v.push("batch_size must be positive".to_string());
            }
            if self.num_batches_per_epoch == 0 {
                v.push("num_batches_per_epoch must be positive".to_string());
            }
            if !(self.min_delta.is_finite() && self.min_delta >= 0.0) {
                v.push(format!("min_delta must be non-negative, got {}", self.min_delta));
            }
            if let Some(clip) = self.gradient_clip {
                if !(clip.is_finite() && clip > 0.0) {
                    v.push(format!("gradient_clip must be positive, got {clip}"));
                }
            }
            if self.prefetch_capacity == 0 {
                v.push("prefetch_capacity must be positive".to_string());
            }
        }

        match &self.output {
            OutputRequest::Quantiles { levels } => {
                if levels.is_empty() {
                    v.push("at least one quantile level is required".to_string());
                }
                if levels.iter().any(|l| !(*l > 0.0 && *l < 1.0)) {
                    v.push(format!("quantile levels must lie in (0, 1), got {levels:?}"));
                }
                if levels.windows(2).any(|w| w[0] >= w[1]) {
                    v.push("quantile levels must be strictly increasing".to_string());
                }
            }
            OutputRequest::Samples => {}
        }
        if self.num_samples == 0 {
            v.push("num_samples must be positive".to_string());
        }

        v.extend(self.model.violations());

        if v.is_empty() {
            Ok(())
        } else {
            Err(ForecastError::InvalidConfiguration { violations: v })
        }
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
