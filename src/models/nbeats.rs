//! Stacked residual blocks in the N-BEATS style.
//!
//! Every block reads the part of the scaled context its predecessors have not
//! explained, emits a backcast that is removed from that residual and a
//! forecast that is added to the horizon mean. The spread comes from a linear
//! head on the final residual.

use super::distribution::Gaussian;
use super::linalg::{axpy, matvec_add, matvec_t_add, outer_add, tanh_backward, tanh_in_place};
use super::params::{Block, Init, ParamLayout};
use super::scaling::{mean_abs_scale, scaled_target};
use super::traits::{check_params, observed_targets, ModelDims, Prediction, WindowModel};
use crate::error::Result;
use crate::window::Window;
use rand::rngs::StdRng;

#[derive(Debug, Clone, Copy)]
struct ResidualBlock {
    w_1: Block,
    b_1: Block,
    w_2: Block,
    b_2: Block,
    w_back: Block,
    b_back: Block,
    w_fore: Block,
    b_fore: Block,
}

#[derive(Debug, Clone)]
pub struct NBeats {
    dims: ModelDims,
    hidden: usize,
    layout: ParamLayout,
    blocks: Vec<ResidualBlock>,
    w_sig: Block,
    b_sig: Block,
}

/// Activations of one forward pass.
struct Pass {
    /// Block inputs, plus the final residual last.
    residuals: Vec<Vec<f64>>,
    hidden: Vec<(Vec<f64>, Vec<f64>)>,
    heads: Vec<Gaussian>,
}

impl NBeats {
    pub fn new(dims: &ModelDims, num_blocks: usize, hidden_size: usize) -> Self {
        let (c, h) = (dims.context_length, dims.horizon);
        let mut layout = ParamLayout::new();
        let blocks = (0..num_blocks)
            .map(|_| ResidualBlock {
                w_1: layout.add(hidden_size, c, Init::Uniform),
                b_1: layout.add(hidden_size, 1, Init::Zeros),
                w_2: layout.add(hidden_size, hidden_size, Init::Uniform),
                b_2: layout.add(hidden_size, 1, Init::Zeros),
                w_back: layout.add(c, hidden_size, Init::Uniform),
                b_back: layout.add(c, 1, Init::Zeros),
                w_fore: layout.add(h, hidden_size, Init::Uniform),
                b_fore: layout.add(h, 1, Init::Zeros),
            })
            .collect();
        let w_sig = layout.add(h, c, Init::Uniform);
        let b_sig = layout.add(h, 1, Init::Zeros);
        Self {
            dims: dims.clone(),
            hidden: hidden_size,
            layout,
            blocks,
            w_sig,
            b_sig,
        }
    }

    /// Scaled context (zero where masked) and its mask.
    fn input(&self, window: &Window, scale: f64) -> (Vec<f64>, Vec<f64>) {
        (0..self.dims.context_length)
            .map(|i| scaled_target(window.past_target[i], window.past_observed[i], scale))
            .unzip()
    }

    fn forward(&self, params: &[f64], x: Vec<f64>, mask: &[f64]) -> Pass {
        let (c, h_len, hid) = (self.dims.context_length, self.dims.horizon, self.hidden);
        let mut mean = vec![0.0; h_len];
        let mut residuals = vec![x];
        let mut hidden = Vec::with_capacity(self.blocks.len());

        for block in &self.blocks {
            let r = &residuals[residuals.len() - 1];
            let mut h1 = block.b_1.of(params).to_vec();
            matvec_add(block.w_1.of(params), hid, c, r, &mut h1);
            tanh_in_place(&mut h1);
            let mut h2 = block.b_2.of(params).to_vec();
            matvec_add(block.w_2.of(params), hid, hid, &h1, &mut h2);
            tanh_in_place(&mut h2);

            let mut backcast = block.b_back.of(params).to_vec();
            matvec_add(block.w_back.of(params), c, hid, &h2, &mut backcast);
            matvec_add(block.w_fore.of(params), h_len, hid, &h2, &mut mean);
            axpy(1.0, block.b_fore.of(params), &mut mean);

            let next = r
                .iter()
                .zip(&backcast)
                .zip(mask)
                .map(|((r, b), m)| r - m * b)
                .collect();
            residuals.push(next);
            hidden.push((h1, h2));
        }

        let mut raw = self.b_sig.of(params).to_vec();
        matvec_add(self.w_sig.of(params), h_len, c, &residuals[residuals.len() - 1], &mut raw);
        let heads = mean
            .into_iter()
            .zip(raw)
            .map(|(m, r)| Gaussian::from_raw(m, r))
            .collect();
        Pass {
            residuals,
            hidden,
            heads,
        }
    }

    fn backward(
        &self,
        params: &[f64],
        grad: &mut [f64],
        pass: &Pass,
        mask: &[f64],
        d_mu: &[f64],
        d_sig: &[f64],
    ) {
        let (c, h_len, hid) = (self.dims.context_length, self.dims.horizon, self.hidden);
        let last = &pass.residuals[self.blocks.len()];
        outer_add(self.w_sig.of_mut(grad), h_len, c, d_sig, last);
        axpy(1.0, d_sig, self.b_sig.of_mut(grad));
        let mut d_res = vec![0.0; c];
        matvec_t_add(self.w_sig.of(params), h_len, c, d_sig, &mut d_res);

        for (k, block) in self.blocks.iter().enumerate().rev() {
            let (h1, h2) = &pass.hidden[k];
            let input = &pass.residuals[k];
            let d_back: Vec<f64> = d_res.iter().zip(mask).map(|(d, m)| -d * m).collect();

            outer_add(block.w_fore.of_mut(grad), h_len, hid, d_mu, h2);
            axpy(1.0, d_mu, block.b_fore.of_mut(grad));
            outer_add(block.w_back.of_mut(grad), c, hid, &d_back, h2);
            axpy(1.0, &d_back, block.b_back.of_mut(grad));

            let mut d_h2 = vec![0.0; hid];
            matvec_t_add(block.w_fore.of(params), h_len, hid, d_mu, &mut d_h2);
            matvec_t_add(block.w_back.of(params), c, hid, &d_back, &mut d_h2);
            let dz2 = tanh_backward(h2, &d_h2);
            outer_add(block.w_2.of_mut(grad), hid, hid, &dz2, h1);
            axpy(1.0, &dz2, block.b_2.of_mut(grad));

            let mut d_h1 = vec![0.0; hid];
            matvec_t_add(block.w_2.of(params), hid, hid, &dz2, &mut d_h1);
            let dz1 = tanh_backward(h1, &d_h1);
            outer_add(block.w_1.of_mut(grad), hid, c, &dz1, input);
            axpy(1.0, &dz1, block.b_1.of_mut(grad));

            // The residual passes straight through as well as through block k.
            matvec_t_add(block.w_1.of(params), hid, c, &dz1, &mut d_res);
        }
    }
}

impl WindowModel for NBeats {
    fn name(&self) -> &str {
        "nbeats"
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
            let (x, mask) = self.input(w, scale);
            let pass = self.forward(params, x, &mask);
            let mut d_mu = vec![0.0; h_len];
            let mut d_sig = vec![0.0; h_len];
            for (t, head) in pass.heads.iter().enumerate() {
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
                self.backward(params, g, &pass, &mask, &d_mu, &d_sig);
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
        let (x, mask) = self.input(window, scale);
        let pass = self.forward(params, x, &mask);
        Ok(Prediction::Gaussian {
            mean: pass.heads.iter().map(|g| g.mean * scale).collect(),
            scale: pass.heads.iter().map(|g| g.scale * scale).collect(),
        })
    }
}
