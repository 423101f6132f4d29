//! Epoch loop: sampling, gradient steps, validation and early stopping.

use super::early_stopping::{EarlyStopping, Verdict};
use super::optimizer::{clip_global_norm, Adam};
use crate::catalog::SeriesCatalog;
use crate::context::RunContext;
use crate::error::{ForecastError, Result};
use crate::models::{
    build_model, season_length, FeatureRequest, ModelArtifact, ModelDims, WindowModel,
    ARTIFACT_FORMAT_VERSION,
};
use crate::utils::derive_seed;
use crate::window::{prefetch_batches, BatchSampler, Windower};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Seed stream for parameter initialization, apart from batch sampling.
const PARAM_INIT_STREAM: u64 = u64::MAX;

/// Lifecycle of one fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingState {
    Initialized,
    Training,
    EarlyStopped,
    MaxEpochsReached,
    Failed,
    Finalized,
}

/// Why a fit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EarlyStopped,
    MaxEpochsReached,
    /// Baselines have nothing to train.
    NotTrainable,
    Diverged,
    Cancelled,
}

/// Record of a fit, stored in the artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub epochs_run: usize,
    pub best_epoch: Option<usize>,
    pub train_losses: Vec<f64>,
    pub validation_losses: Vec<f64>,
    pub best_validation_loss: Option<f64>,
    pub stop_reason: StopReason,
    pub wall_time_secs: f64,
    /// Final early-stopping state; absent for untrained baselines.
    #[serde(default)]
    pub early_stopping: Option<EarlyStopping>,
    /// Every state the fit passed through, starting at `Initialized`.
    pub states: Vec<TrainingState>,
}

impl TrainingSummary {
    /// State the fit ended in.
    pub fn final_state(&self) -> TrainingState {
        self.states
            .last()
            .copied()
            .unwrap_or(TrainingState::Initialized)
    }

    fn untrained(started: Instant, lifecycle: &Lifecycle) -> Self {
        Self {
            epochs_run: 0,
            best_epoch: None,
            train_losses: Vec::new(),
            validation_losses: Vec::new(),
            best_validation_loss: None,
            stop_reason: StopReason::NotTrainable,
            wall_time_secs: started.elapsed().as_secs_f64(),
            early_stopping: None,
            states: lifecycle.states.clone(),
        }
    }
}

/// Train the configured architecture on `catalog`.
///
/// Fails before training when the catalog's frequency differs from the
/// configuration, when the catalog asks for capabilities the architecture
/// lacks, or when series are too short. The returned artifact holds the
/// parameters of the best validation epoch.
pub fn fit(ctx: &RunContext, catalog: &SeriesCatalog) -> Result<ModelArtifact> {
    let config = ctx.config();
    let frequency = catalog.calendar().frequency();
    if frequency != config.frequency {
        return Err(ForecastError::InvalidConfiguration {
            violations: vec![format!(
                "catalog frequency {frequency} differs from configured frequency {}",
                config.frequency
            )],
        });
    }

    let request = FeatureRequest::new(
        catalog.schema(),
        config.use_dynamic_features,
        config.use_static_features,
        &config.output,
    );
    config.model.check_request(&request)?;

    let dims = ModelDims::new(
        config.context_length,
        config.horizon,
        catalog.schema(),
        request.dynamic_features,
        config.use_static_features,
        season_length(&config.model, config.frequency),
    );
    let model = build_model(&config.model, &dims);
    fit_model(ctx, catalog, model.as_ref(), dims)
}

/// Run the training loop for an already built model.
pub(crate) fn fit_model(
    ctx: &RunContext,
    catalog: &SeriesCatalog,
    model: &dyn WindowModel,
    dims: ModelDims,
) -> Result<ModelArtifact> {
    let trainer = Trainer {
        ctx,
        catalog,
        model,
        dims,
        started: Instant::now(),
    };
    if ctx.config().model.capabilities().trainable {
        trainer.train()
    } else {
        trainer.finalize_untrained()
    }
}

struct Trainer<'a> {
    ctx: &'a RunContext,
    catalog: &'a SeriesCatalog,
    model: &'a dyn WindowModel,
    dims: ModelDims,
    started: Instant,
}

#[derive(Default)]
struct History {
    train: Vec<f64>,
    validation: Vec<f64>,
}

/// Recorded state machine of a fit.
struct Lifecycle {
    states: Vec<TrainingState>,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            states: vec![TrainingState::Initialized],
        }
    }

    fn transition(&mut self, next: TrainingState) {
        let from = self.states.last().copied();
        debug!(from = ?from, to = ?next, "training state change");
        self.states.push(next);
    }
}

impl<'a> Trainer<'a> {
    fn artifact(&self, parameters: Vec<f64>, summary: TrainingSummary) -> ModelArtifact {
        let config = self.ctx.config();
        ModelArtifact {
            format_version: ARTIFACT_FORMAT_VERSION,
            architecture: config.model.clone(),
            frequency: config.frequency,
            context_length: config.context_length,
            horizon: config.horizon,
            padding: config.padding,
            schema: self.catalog.schema().clone(),
            dims: self.dims.clone(),
            parameters,
            summary,
        }
    }

    fn summary(
        &self,
        history: &History,
        stopper: &EarlyStopping,
        stop_reason: StopReason,
        lifecycle: &Lifecycle,
    ) -> TrainingSummary {
        TrainingSummary {
            epochs_run: history.train.len(),
            best_epoch: stopper.best_epoch(),
            train_losses: history.train.clone(),
            validation_losses: history.validation.clone(),
            best_validation_loss: stopper.best(),
            stop_reason,
            wall_time_secs: self.started.elapsed().as_secs_f64(),
            early_stopping: Some(stopper.clone()),
            states: lifecycle.states.clone(),
        }
    }

    fn finalize_untrained(self) -> Result<ModelArtifact> {
        let config = self.ctx.config();
        let windower = Windower::new(
            self.catalog,
            config.context_length,
            config.horizon,
            config.padding,
        )?;
        self.catalog.validate(&windower.prediction_requirements())?;
        let mut lifecycle = Lifecycle::new();
        lifecycle.transition(TrainingState::Finalized);
        info!(
            model = config.model.label(),
            series = self.catalog.len(),
            "baseline needs no training"
        );
        Ok(self.artifact(
            self.model.init_params(config.seed),
            TrainingSummary::untrained(self.started, &lifecycle),
        ))
    }

    fn train(self) -> Result<ModelArtifact> {
        let ctx = self.ctx;
        let config = ctx.config();
        let model = self.model;
        let mut lifecycle = Lifecycle::new();

        let windower = Windower::new(
            self.catalog,
            config.context_length,
            config.horizon,
            config.padding,
        )?;
        self.catalog.validate(&windower.training_requirements())?;
        let plan = windower.training_plan()?;
        let validation = windower.validation_windows(&plan)?;
        let candidates = plan.total_candidates();
        let dropped = plan.dropped.len();
        let sampler = BatchSampler::new(
            windower,
            plan,
            config.sampling_strategy,
            config.batch_size,
            config.seed,
        )?;

        let mut params = model.init_params(derive_seed(config.seed, &[PARAM_INIT_STREAM]));
        let mut grad = vec![0.0; params.len()];
        let mut adam = Adam::new(config.learning_rate);
        let mut stopper = EarlyStopping::new(config.patience, config.min_delta);
        let mut history = History::default();
        let mut best: Option<Vec<f64>> = None;
        let mut stop_reason = StopReason::MaxEpochsReached;

        info!(
            model = model.name(),
            series = self.catalog.len(),
            dropped,
            candidates,
            parameters = params.len(),
            epochs = config.num_epochs,
            "starting training"
        );
        lifecycle.transition(TrainingState::Training);

        for epoch in 1..=config.num_epochs {
            let mut total = 0.0;
            let mut steps = 0usize;
            let mut diverged = false;

            let consumed = prefetch_batches(
                &sampler,
                epoch,
                config.num_batches_per_epoch,
                config.num_workers,
                config.prefetch_capacity,
                ctx.cancellation(),
                |batch| {
                    grad.iter_mut().for_each(|g| *g = 0.0);
                    let loss = model.loss(&params, &batch.windows, Some(&mut grad))?;
                    if !loss.is_finite() || grad.iter().any(|g| !g.is_finite()) {
                        diverged = true;
                        return Ok(false);
                    }
                    if let Some(clip) = config.gradient_clip {
                        clip_global_norm(&mut grad, clip);
                    }
                    adam.step(&mut params, &grad);
                    total += loss;
                    steps += 1;
                    Ok(true)
                },
            );
            if let Err(err) = consumed {
                lifecycle.transition(TrainingState::Failed);
                return Err(err);
            }

            if ctx.cancellation().is_cancelled() {
                lifecycle.transition(TrainingState::Failed);
                warn!(epoch, "training cancelled");
                let summary =
                    self.summary(&history, &stopper, StopReason::Cancelled, &lifecycle);
                return Err(ForecastError::Cancelled {
                    epoch,
                    last_good: best.map(|p| Box::new(self.artifact(p, summary))),
                });
            }

            let train_loss = if steps > 0 { total / steps as f64 } else { 0.0 };
            let validation_loss = if diverged {
                f64::NAN
            } else {
                model.loss(&params, &validation, None)?
            };
            if diverged || !validation_loss.is_finite() {
                lifecycle.transition(TrainingState::Failed);
                warn!(epoch, train_loss, validation_loss, "training diverged");
                let summary =
                    self.summary(&history, &stopper, StopReason::Diverged, &lifecycle);
                return Err(ForecastError::TrainingDiverged {
                    epoch,
                    last_good: best.map(|p| Box::new(self.artifact(p, summary))),
                });
            }

            history.train.push(train_loss);
            history.validation.push(validation_loss);
            debug!(epoch, train_loss, validation_loss, "epoch finished");

            match stopper.observe(epoch, validation_loss) {
                Verdict::Improved => best = Some(params.clone()),
                Verdict::Waiting => {}
                Verdict::Stop => {
                    stop_reason = StopReason::EarlyStopped;
                    break;
                }
            }
        }

        lifecycle.transition(match stop_reason {
            StopReason::EarlyStopped => TrainingState::EarlyStopped,
            _ => TrainingState::MaxEpochsReached,
        });
        lifecycle.transition(TrainingState::Finalized);
        let summary = self.summary(&history, &stopper, stop_reason, &lifecycle);
        info!(
            epochs = summary.epochs_run,
            best_epoch = ?summary.best_epoch,
            best_validation_loss = ?summary.best_validation_loss,
            reason = ?stop_reason,
            secs = summary.wall_time_secs,
            "training finished"
        );
        Ok(self.artifact(best.unwrap_or(params), summary))
    }
}
