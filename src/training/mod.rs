//! Training orchestration: device placement, optimizer, early stopping and
//! the epoch loop that turns a catalog into a [`ModelArtifact`].
//!
//! [`ModelArtifact`]: crate::models::ModelArtifact

pub mod device;
mod early_stopping;
mod optimizer;
mod orchestrator;

pub use device::{Device, DeviceHandle};
pub use early_stopping::{EarlyStopping, Verdict};
pub use optimizer::{clip_global_norm, Adam};
pub use orchestrator::{fit, StopReason, TrainingState, TrainingSummary};
