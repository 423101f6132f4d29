//! Gaussian output head: parameter projection, negative log-likelihood and
//! its gradient.

use rand::Rng;
use rand_distr::StandardNormal;
use std::f64::consts::PI;

/// Lower bound added to the softplus scale.
pub const MIN_SCALE: f64 = 1e-3;

pub fn softplus(x: f64) -> f64 {
    if x > 30.0 {
        x
    } else {
        x.exp().ln_1p()
    }
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Gaussian with scale `softplus(raw_scale) + MIN_SCALE`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gaussian {
    pub mean: f64,
    pub scale: f64,
    raw_scale: f64,
}

/// Gradient of the NLL with respect to the head's two raw outputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadGradient {
    pub d_mean: f64,
    pub d_raw_scale: f64,
}

impl Gaussian {
    pub fn from_raw(mean: f64, raw_scale: f64) -> Self {
        Self {
            mean,
            scale: softplus(raw_scale) + MIN_SCALE,
            raw_scale,
        }
    }

    pub fn nll(&self, y: f64) -> f64 {
        let z = (y - self.mean) / self.scale;
        0.5 * (2.0 * PI).ln() + self.scale.ln() + 0.5 * z * z
    }

    pub fn nll_gradient(&self, y: f64) -> HeadGradient {
        let diff = y - self.mean;
        let s2 = self.scale * self.scale;
        let d_scale = 1.0 / self.scale - diff * diff / (s2 * self.scale);
        HeadGradient {
            d_mean: -diff / s2,
            d_raw_scale: d_scale * sigmoid(self.raw_scale),
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let z: f64 = rng.sample(StandardNormal);
        self.mean + self.scale * z
    }
}
