//! Early stopping on the validation loss.

use serde::{Deserialize, Serialize};

/// Outcome of one observed epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// New best loss; snapshot the parameters.
    Improved,
    /// No improvement, patience not yet exhausted.
    Waiting,
    /// Patience exhausted; stop training.
    Stop,
}

/// Tracks the best validation loss and the epochs since it.
///
/// An epoch improves when its loss is below `best - min_delta`. Training
/// stops once the count of non-improving epochs exceeds `patience`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f64,
    best: Option<f64>,
    best_epoch: Option<usize>,
    bad_epochs: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f64) -> Self {
        Self {
            patience,
            min_delta,
            best: None,
            best_epoch: None,
            bad_epochs: 0,
        }
    }

    pub fn observe(&mut self, epoch: usize, loss: f64) -> Verdict {
        let improved = match self.best {
            None => true,
            Some(best) => loss < best - self.min_delta,
        };
        if improved {
            self.best = Some(loss);
            self.best_epoch = Some(epoch);
            self.bad_epochs = 0;
            return Verdict::Improved;
        }
        self.bad_epochs += 1;
        if self.bad_epochs > self.patience {
            Verdict::Stop
        } else {
            Verdict::Waiting
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn bad_epochs(&self) -> usize {
        self.bad_epochs
    }
}
