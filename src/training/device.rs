//! Compute device selection.

use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a run places its computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Device {
    #[default]
    Cpu,
    Gpu { ordinal: usize },
}

impl Device {
    /// Claim the device for a run.
    ///
    /// This build carries no GPU backend, so GPU requests always fail rather
    /// than falling back to the CPU.
    pub fn acquire(&self) -> Result<DeviceHandle> {
        match self {
            Device::Cpu => Ok(DeviceHandle { device: *self }),
            Device::Gpu { .. } => Err(ForecastError::DeviceUnavailable {
                device: self.to_string(),
                reason: "no GPU compute backend is available in this build".to_string(),
            }),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Gpu { ordinal } => write!(f, "gpu:{ordinal}"),
        }
    }
}

/// An acquired device, held by the run context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    device: Device,
}

impl DeviceHandle {
    pub fn device(&self) -> Device {
        self.device
    }
}
