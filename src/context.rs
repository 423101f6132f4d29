//! Explicit run context: validated configuration, device handle and
//! cancellation token threaded through training and prediction.

use crate::config::ForecastConfig;
use crate::error::Result;
use crate::training::device::DeviceHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between the caller and a run.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect at the next batch boundary.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Everything a run needs besides its data.
#[derive(Debug, Clone)]
pub struct RunContext {
    config: ForecastConfig,
    device: DeviceHandle,
    cancel: CancellationToken,
}

impl RunContext {
    /// Validate `config` and acquire its device.
    pub fn new(config: ForecastConfig) -> Result<Self> {
        config.validate()?;
        let device = config.device.acquire()?;
        Ok(Self {
            config,
            device,
            cancel: CancellationToken::new(),
        })
    }

    /// Share an existing cancellation token with this run.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Same device and token, different configuration.
    pub fn with_config(&self, config: ForecastConfig) -> Result<Self> {
        config.validate()?;
        let device = if config.device == self.config.device {
            self.device.clone()
        } else {
            config.device.acquire()?
        };
        Ok(Self {
            config,
            device,
            cancel: self.cancel.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_shared_between_clones() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }
}
