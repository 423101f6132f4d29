//! Multilayer perceptron from the scaled context to per-step Gaussians.
//!
//! Uses the target only: the input is the scaled context followed by its
//! observed mask.

use super::distribution::Gaussian;
use super::linalg::{axpy, matvec_add, matvec_t_add, outer_add, tanh_backward, tanh_in_place};
use super::params::{Block, Init, ParamLayout};
use super::scaling::{mean_abs_scale, scaled_target};
use super::traits::{check_params, observed_targets, ModelDims, Prediction, WindowModel};
use crate::error::Result;
use crate::window::Window;
use rand::rngs::StdRng;

#[derive(Debug, Clone)]
pub struct SimpleFeedForward {
    dims: ModelDims,
    hidden: usize,
    layout: ParamLayout,
    w_1: Block,
    b_1: Block,
    w_mu: Block,
    b_mu: Block,
    w_sig: Block,
    b_sig: Block,
}

impl SimpleFeedForward {
    pub fn new(dims: &ModelDims, hidden_size: usize) -> Self {
        let mut layout = ParamLayout::new();
        let w_1 = layout.add(hidden_size, 2 * dims.context_length, Init::Uniform);
        let b_1 = layout.add(hidden_size, 1, Init::Zeros);
        let w_mu = layout.add(dims.horizon, hidden_size, Init::Uniform);
        let b_mu = layout.add(dims.horizon, 1, Init::Zeros);
        let w_sig = layout.add(dims.horizon, hidden_size, Init::Uniform);
        let b_sig = layout.add(dims.horizon, 1, Init::Zeros);
        Self {
            dims: dims.clone(),
            hidden: hidden_size,
            layout,
            w_1,
            b_1,
            w_mu,
            b_mu,
            w_sig,
            b_sig,
        }
    }

    fn input(&self, window: &Window, scale: f64) -> Vec<f64> {
        let c = self.dims.context_length;
        let mut x = vec![0.0; 2 * c];
        for i in 0..c {
            let (z, m) = scaled_target(window.past_target[i], window.past_observed[i], scale);
            x[i] = z;
            x[c + i] = m;
        }
        x
    }

    fn forward(&self, params: &[f64], x: &[f64]) -> (Vec<f64>, Vec<Gaussian>) {
        let h_len = self.dims.horizon;
        let mut hidden = self.b_1.of(params).to_vec();
        matvec_add(self.w_1.of(params), self.hidden, x.len(), x, &mut hidden);
        tanh_in_place(&mut hidden);

        let mut mu = self.b_mu.of(params).to_vec();
        matvec_add(self.w_mu.of(params), h_len, self.hidden, &hidden, &mut mu);
        let mut raw = self.b_sig.of(params).to_vec();
        matvec_add(self.w_sig.of(params), h_len, self.hidden, &hidden, &mut raw);
        let heads = mu
            .into_iter()
            .zip(raw)
            .map(|(m, r)| Gaussian::from_raw(m, r))
            .collect();
        (hidden, heads)
    }
}

impl WindowModel for SimpleFeedForward {
    fn name(&self) -> &str {
        "simplefeedforward"
    }

    fn num_params(&self) -> usize {
        self.layout.len()
    }

    fn init_params(&self, seed: u64) -> Vec<f64> {
        self.layout.initialize(seed)
    }

    fn loss(&self, params: &[f64], windows: &[Window], mut grad: Option<&mut [f64]>) -> Result<f64> {
        check_params(params, self.num_params())?;
        for w in windows {
            self.dims.check_window(w)?;
        }
        let count = observed_targets(windows);
        if count == 0 {
            return Ok(0.0);
        }
        let norm = 1.0 / count as f64;
        let h_len = self.dims.horizon;

        let mut total = 0.0;
        for w in windows {
            let scale = mean_abs_scale(w);
            let x = self.input(w, scale);
            let (hidden, heads) = self.forward(params, &x);
            let mut d_mu = vec![0.0; h_len];
            let mut d_sig = vec![0.0; h_len];
            for (t, head) in heads.iter().enumerate() {
                let (z, m) = scaled_target(w.future_target[t], w.future_observed[t], scale);
                if m == 0.0 {
                    continue;
                }
                total += head.nll(z);
                let g = head.nll_gradient(z);
                d_mu[t] = g.d_mean * norm;
                d_sig[t] = g.d_raw_scale * norm;
            }

            if let Some(g) = grad.as_deref_mut() {
                outer_add(self.w_mu.of_mut(g), h_len, self.hidden, &d_mu, &hidden);
                axpy(1.0, &d_mu, self.b_mu.of_mut(g));
                outer_add(self.w_sig.of_mut(g), h_len, self.hidden, &d_sig, &hidden);
                axpy(1.0, &d_sig, self.b_sig.of_mut(g));

                let mut d_hidden = vec![0.0; self.hidden];
                matvec_t_add(self.w_mu.of(params), h_len, self.hidden, &d_mu, &mut d_hidden);
                matvec_t_add(self.w_sig.of(params), h_len, self.hidden, &d_sig, &mut d_hidden);
                let dz = tanh_backward(&hidden, &d_hidden);
                outer_add(self.w_1.of_mut(g), self.hidden, x.len(), &dz, &x);
                axpy(1.0, &dz, self.b_1.of_mut(g));
            }
        }
        Ok(total * norm)
    }

    fn predict(
        &self,
        params: &[f64],
        window: &Window,
        _num_samples: usize,
        _rng: &mut StdRng,
    ) -> Result<Prediction> {
        check_params(params, self.num_params())?;
        self.dims.check_window(window)?;
        let scale = mean_abs_scale(window);
        let (_, heads) = self.forward(params, &self.input(window, scale));
        Ok(Prediction::Gaussian {
            mean: heads.iter().map(|g| g.mean * scale).collect(),
            scale: heads.iter().map(|g| g.scale * scale).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testing::{gradient_check, toy_window};
    use rand::SeedableRng;

    fn dims() -> ModelDims {
        ModelDims {
            context_length: 6,
            horizon: 3,
            num_dynamic: 0,
            num_static_real: 0,
            cardinalities: vec![],
            season_length: 1,
        }
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let model = SimpleFeedForward::new(&dims(), 5);
        let params = model.init_params(4);
        let windows = vec![toy_window(6, 3, 0, 0), toy_window(6, 3, 0, 1)];
        gradient_check(&model, &params, &windows);
    }

    #[test]
    fn forecasts_scale_with_the_window() {
        let model = SimpleFeedForward::new(&dims(), 5);
        let params = model.init_params(4);
        let small = toy_window(6, 3, 0, 0);
        let mut large = small.clone();
        for v in large.past_target.iter_mut() {
            *v *= 10.0;
        }
        let mut rng = StdRng::seed_from_u64(0);
        let (a, b) = (
            model.predict(&params, &small, 0, &mut rng).unwrap(),
            model.predict(&params, &large, 0, &mut rng).unwrap(),
        );
        match (a, b) {
            (Prediction::Gaussian { mean: ma, .. }, Prediction::Gaussian { mean: mb, .. }) => {
                for (x, y) in ma.iter().zip(&mb) {
                    approx::assert_relative_eq!(x * 10.0, *y, max_relative = 1e-9);
                }
            }
            other => panic!("unexpected predictions {other:?}"),
        }
    }

    #[test]
    fn all_masked_horizon_has_zero_loss() {
        let model = SimpleFeedForward::new(&dims(), 5);
        let params = model.init_params(4);
        let mut w = toy_window(6, 3, 0, 0);
        w.future_observed = vec![0.0; 3];
        let mut grad = vec![0.0; model.num_params()];
        assert_eq!(model.loss(&params, &[w], Some(&mut grad)).unwrap(), 0.0);
        assert!(grad.iter().all(|g| *g == 0.0));
    }
}
