//! Architecture variants, their capabilities and the common model contract.

use crate::catalog::FeatureSchema;
use crate::config::OutputRequest;
use crate::error::{ForecastError, Result};
use crate::window::Window;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// Form of the distribution a model produces natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Samples,
    Quantiles,
}

/// What an architecture can consume and produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub dynamic_features: bool,
    pub static_categoricals: bool,
    pub output: OutputKind,
    pub multivariate_target: bool,
    pub trainable: bool,
}

/// Features and output a run asks an architecture for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureRequest {
    pub dynamic_features: bool,
    pub static_categoricals: bool,
    pub multivariate_target: bool,
    pub samples: bool,
}

impl FeatureRequest {
    pub fn new(
        schema: &FeatureSchema,
        use_dynamic: bool,
        use_static: bool,
        output: &OutputRequest,
    ) -> Self {
        Self {
            dynamic_features: use_dynamic && schema.has_dynamic(),
            static_categoricals: use_static && schema.has_static_categorical(),
            multivariate_target: schema.target_dim() > 1,
            samples: matches!(output, OutputRequest::Samples),
        }
    }
}

fn default_hidden_size() -> usize {
    40
}

fn default_embedding_dim() -> usize {
    4
}

fn default_model_dim() -> usize {
    32
}

fn default_num_blocks() -> usize {
    3
}

/// The supported model families and their hyperparameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Architecture {
    /// Autoregressive recurrent network with a Gaussian output, sampled
    /// ancestrally.
    DeepAr {
        #[serde(default = "default_hidden_size")]
        hidden_size: usize,
        #[serde(default = "default_embedding_dim")]
        embedding_dim: usize,
    },
    /// Single-head attention from horizon queries onto the encoded context.
    Transformer {
        #[serde(default = "default_model_dim")]
        model_dim: usize,
        #[serde(default = "default_embedding_dim")]
        embedding_dim: usize,
    },
    /// MLP from the scaled context to Gaussian marginals of every step.
    SimpleFeedForward {
        #[serde(default = "default_hidden_size")]
        hidden_size: usize,
    },
    /// Residual backcast/forecast blocks over the scaled context.
    #[serde(rename = "nbeats")]
    NBeats {
        #[serde(default = "default_num_blocks")]
        num_blocks: usize,
        #[serde(default = "default_hidden_size")]
        hidden_size: usize,
    },
    /// Repeat the last observed value.
    Naive,
    /// Repeat the last observed season. Defaults to the frequency's season.
    SeasonalNaive {
        #[serde(default)]
        season_length: Option<usize>,
    },
}

impl Architecture {
    pub fn deep_ar() -> Self {
        Architecture::DeepAr {
            hidden_size: default_hidden_size(),
            embedding_dim: default_embedding_dim(),
        }
    }

    pub fn transformer() -> Self {
        Architecture::Transformer {
            model_dim: default_model_dim(),
            embedding_dim: default_embedding_dim(),
        }
    }

    pub fn simple_feed_forward() -> Self {
        Architecture::SimpleFeedForward {
            hidden_size: default_hidden_size(),
        }
    }

    pub fn nbeats() -> Self {
        Architecture::NBeats {
            num_blocks: default_num_blocks(),
            hidden_size: default_hidden_size(),
        }
    }

    /// Short label used in metrics tables.
    pub fn label(&self) -> &'static str {
        match self {
            Architecture::DeepAr { .. } => "deepar",
            Architecture::Transformer { .. } => "transformer",
            Architecture::SimpleFeedForward { .. } => "simplefeedforward",
            Architecture::NBeats { .. } => "nbeats",
            Architecture::Naive => "naive",
            Architecture::SeasonalNaive { .. } => "seasonal_naive",
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            Architecture::DeepAr { .. } => Capabilities {
                dynamic_features: true,
                static_categoricals: true,
                output: OutputKind::Samples,
                multivariate_target: false,
                trainable: true,
            },
            Architecture::Transformer { .. } => Capabilities {
                dynamic_features: true,
                static_categoricals: true,
                output: OutputKind::Quantiles,
                multivariate_target: false,
                trainable: true,
            },
            Architecture::SimpleFeedForward { .. } | Architecture::NBeats { .. } => Capabilities {
                dynamic_features: false,
                static_categoricals: false,
                output: OutputKind::Quantiles,
                multivariate_target: false,
                trainable: true,
            },
            Architecture::Naive | Architecture::SeasonalNaive { .. } => Capabilities {
                dynamic_features: false,
                static_categoricals: false,
                output: OutputKind::Quantiles,
                multivariate_target: false,
                trainable: false,
            },
        }
    }

    /// Hyperparameter problems.
    pub fn violations(&self) -> Vec<String> {
        let mut v = Vec::new();
        let mut positive = |name: &str, value: usize| {
            if value == 0 {
                v.push(format!("{} {name} must be positive", self.label()));
            }
        };
        match self {
            Architecture::DeepAr {
                hidden_size,
                embedding_dim,
            } => {
                positive("hidden_size", *hidden_size);
                positive("embedding_dim", *embedding_dim);
            }
            Architecture::Transformer {
                model_dim,
                embedding_dim,
            } => {
                positive("model_dim", *model_dim);
                positive("embedding_dim", *embedding_dim);
            }
            Architecture::SimpleFeedForward { hidden_size } => {
                positive("hidden_size", *hidden_size);
            }
            Architecture::NBeats {
                num_blocks,
                hidden_size,
            } => {
                positive("num_blocks", *num_blocks);
                positive("hidden_size", *hidden_size);
            }
            Architecture::SeasonalNaive {
                season_length: Some(m),
            } => positive("season_length", *m),
            Architecture::Naive | Architecture::SeasonalNaive { season_length: None } => {}
        }
        v
    }

    /// Fail with every requested capability this architecture lacks.
    pub fn check_request(&self, request: &FeatureRequest) -> Result<()> {
        let caps = self.capabilities();
        let mut v = Vec::new();
        if request.dynamic_features && !caps.dynamic_features {
            v.push("dynamic features".to_string());
        }
        if request.static_categoricals && !caps.static_categoricals {
            v.push("static categorical features".to_string());
        }
        if request.multivariate_target && !caps.multivariate_target {
            v.push("multivariate target".to_string());
        }
        if request.samples && caps.output != OutputKind::Samples {
            v.push("sample output".to_string());
        }
        if v.is_empty() {
            Ok(())
        } else {
            Err(ForecastError::IncompatibleFeatureSet {
                architecture: self.label().to_string(),
                violations: v,
            })
        }
    }
}

/// Input and output sizes a network is built for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDims {
    pub context_length: usize,
    pub horizon: usize,
    /// Dynamic features read from each window row (a prefix of the schema's).
    pub num_dynamic: usize,
    pub num_static_real: usize,
    pub cardinalities: Vec<usize>,
    pub season_length: usize,
}

impl ModelDims {
    pub fn new(
        context_length: usize,
        horizon: usize,
        schema: &FeatureSchema,
        use_dynamic: bool,
        use_static: bool,
        season_length: usize,
    ) -> Self {
        Self {
            context_length,
            horizon,
            num_dynamic: if use_dynamic { schema.num_dynamic() } else { 0 },
            num_static_real: if use_static { schema.static_real.len() } else { 0 },
            cardinalities: if use_static {
                schema.cardinalities()
            } else {
                Vec::new()
            },
            season_length: season_length.max(1),
        }
    }

    pub(crate) fn check_window(&self, window: &Window) -> Result<()> {
        if window.context_length() != self.context_length {
            return Err(ForecastError::DimensionMismatch {
                expected: self.context_length,
                got: window.context_length(),
            });
        }
        if window.horizon() != self.horizon {
            return Err(ForecastError::DimensionMismatch {
                expected: self.horizon,
                got: window.horizon(),
            });
        }
        Ok(())
    }
}

/// Raw model output for one window, in original target units.
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    /// Independent Gaussian marginals per step.
    Gaussian { mean: Vec<f64>, scale: Vec<f64> },
    /// Sample paths: `paths[sample][step]`.
    Samples(Vec<Vec<f64>>),
}

/// Common contract of all window models.
///
/// Parameters live outside the model in one flat vector so the orchestrator
/// can update, clip and snapshot them uniformly.
pub trait WindowModel: Send + Sync {
    /// Label matching [`Architecture::label`].
    fn name(&self) -> &str;

    fn num_params(&self) -> usize;

    /// Seeded initial parameters.
    fn init_params(&self, seed: u64) -> Vec<f64>;

    /// Masked mean negative log-likelihood over `windows`. When `grad` is
    /// given, the gradient with respect to `params` is added to it.
    ///
    /// Positions with a zero observed mask never influence the result.
    fn loss(&self, params: &[f64], windows: &[Window], grad: Option<&mut [f64]>) -> Result<f64>;

    /// Forecast the horizon of `window`. Sample-emitting models draw
    /// `num_samples` paths from `rng`.
    fn predict(
        &self,
        params: &[f64],
        window: &Window,
        num_samples: usize,
        rng: &mut StdRng,
    ) -> Result<Prediction>;
}

/// Count of observed horizon positions across windows, for loss averaging.
pub(crate) fn observed_targets(windows: &[Window]) -> usize {
    windows.iter().map(Window::observed_future).sum()
}

pub(crate) fn check_params(params: &[f64], expected: usize) -> Result<()> {
    if params.len() != expected {
        return Err(ForecastError::DimensionMismatch {
            expected,
            got: params.len(),
        });
    }
    Ok(())
}
