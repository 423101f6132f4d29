//! Autoregressive recurrent network (DeepAR style).
//!
//! An Elman network runs over the context and horizon of each window. At step
//! `j` it sees the scaled target of step `j - 1` (times its observed mask),
//! that mask, the dynamic features of step `j` and the static inputs, and
//! emits a Gaussian for the scaled target of step `j`. Training uses the true
//! observed lags and full back-propagation through time; prediction
//! samples the horizon ancestrally, feeding each draw back as the next lag.

use super::distribution::Gaussian;
use super::embedding::StaticInputs;
use super::linalg::{axpy, dot, matvec_add, matvec_t_add, outer_add, tanh_backward, tanh_in_place};
use super::params::{Block, Init, ParamLayout};
use super::scaling::{mean_abs_scale, scaled_target};
use super::traits::{check_params, ModelDims, Prediction, WindowModel};
use crate::error::Result;
use crate::window::Window;
use rand::rngs::StdRng;

#[derive(Debug, Clone)]
pub struct DeepAr {
    dims: ModelDims,
    hidden: usize,
    layout: ParamLayout,
    statics: StaticInputs,
    w_x: Block,
    w_h: Block,
    b: Block,
    w_mu: Block,
    b_mu: Block,
    w_sig: Block,
    b_sig: Block,
}

struct Trace {
    inputs: Vec<Vec<f64>>,
    hidden: Vec<Vec<f64>>,
    heads: Vec<Gaussian>,
}

impl DeepAr {
    pub fn new(dims: &ModelDims, hidden_size: usize, embedding_dim: usize) -> Self {
        let mut layout = ParamLayout::new();
        let statics = StaticInputs::new(
            &mut layout,
            &dims.cardinalities,
            embedding_dim,
            dims.num_static_real,
        );
        let input = 2 + dims.num_dynamic + statics.width();
        let w_x = layout.add(hidden_size, input, Init::Uniform);
        let w_h = layout.add(hidden_size, hidden_size, Init::Uniform);
        let b = layout.add(hidden_size, 1, Init::Zeros);
        let w_mu = layout.add(1, hidden_size, Init::Uniform);
        let b_mu = layout.add(1, 1, Init::Zeros);
        let w_sig = layout.add(1, hidden_size, Init::Uniform);
        let b_sig = layout.add(1, 1, Init::Zeros);
        Self {
            dims: dims.clone(),
            hidden: hidden_size,
            layout,
            statics,
            w_x,
            w_h,
            b,
            w_mu,
            b_mu,
            w_sig,
            b_sig,
        }
    }

    fn input_width(&self) -> usize {
        2 + self.dims.num_dynamic + self.statics.width()
    }

    fn steps(&self) -> usize {
        self.dims.context_length + self.dims.horizon
    }

    /// Scaled target and observed mask at sequence position `j`.
    fn target_at(&self, window: &Window, j: usize, scale: f64) -> (f64, f64) {
        let c = self.dims.context_length;
        if j < c {
            scaled_target(window.past_target[j], window.past_observed[j], scale)
        } else {
            scaled_target(window.future_target[j - c], window.future_observed[j - c], scale)
        }
    }

    fn dynamic_at<'w>(&self, window: &'w Window, j: usize) -> &'w [f64] {
        let c = self.dims.context_length;
        let row = if j < c {
            window.past_dynamic_row(j)
        } else {
            window.future_dynamic_row(j - c)
        };
        &row[..self.dims.num_dynamic.min(row.len())]
    }

    fn input(&self, lag: f64, lag_mask: f64, dynamic: &[f64], statics: &[f64]) -> Vec<f64> {
        let mut x = Vec::with_capacity(self.input_width());
        x.push(lag * lag_mask);
        x.push(lag_mask);
        x.extend_from_slice(dynamic);
        x.resize(2 + self.dims.num_dynamic, 0.0);
        x.extend_from_slice(statics);
        x
    }

    fn cell(&self, params: &[f64], x: &[f64], h_prev: &[f64]) -> Vec<f64> {
        let mut h = self.b.of(params).to_vec();
        matvec_add(self.w_x.of(params), self.hidden, self.input_width(), x, &mut h);
        matvec_add(self.w_h.of(params), self.hidden, self.hidden, h_prev, &mut h);
        tanh_in_place(&mut h);
        h
    }

    fn head(&self, params: &[f64], h: &[f64]) -> Gaussian {
        Gaussian::from_raw(
            dot(self.w_mu.of(params), h) + params[self.b_mu.offset],
            dot(self.w_sig.of(params), h) + params[self.b_sig.offset],
        )
    }

    /// Pass over the whole window, conditioning each step on the observed target.
    fn unroll(&self, params: &[f64], window: &Window, scale: f64, statics: &[f64]) -> Trace {
        let steps = self.steps();
        let mut trace = Trace {
            inputs: Vec::with_capacity(steps),
            hidden: Vec::with_capacity(steps),
            heads: Vec::with_capacity(steps),
        };
        let mut h = vec![0.0; self.hidden];
        for j in 0..steps {
            let (lag, lag_mask) = if j == 0 {
                (0.0, 0.0)
            } else {
                self.target_at(window, j - 1, scale)
            };
            let x = self.input(lag, lag_mask, self.dynamic_at(window, j), statics);
            h = self.cell(params, &x, &h);
            trace.heads.push(self.head(params, &h));
            trace.inputs.push(x);
            trace.hidden.push(h.clone());
        }
        trace
    }

    fn backward(
        &self,
        params: &[f64],
        grad: &mut [f64],
        window: &Window,
        trace: &Trace,
        scale: f64,
        norm: f64,
    ) -> Result<()> {
        let hid = self.hidden;
        let width = self.input_width();
        let static_offset = 2 + self.dims.num_dynamic;
        let mut d_static = vec![0.0; self.statics.width()];
        let mut dh_next = vec![0.0; hid];

        for j in (0..self.steps()).rev() {
            let mut dh = dh_next;
            let (z, m) = self.target_at(window, j, scale);
            if j >= 1 && m > 0.0 {
                let g = trace.heads[j].nll_gradient(z);
                let (d_mu, d_sig) = (g.d_mean * norm, g.d_raw_scale * norm);
                axpy(d_mu, &trace.hidden[j], self.w_mu.of_mut(grad));
                grad[self.b_mu.offset] += d_mu;
                axpy(d_sig, &trace.hidden[j], self.w_sig.of_mut(grad));
                grad[self.b_sig.offset] += d_sig;
                axpy(d_mu, self.w_mu.of(params), &mut dh);
                axpy(d_sig, self.w_sig.of(params), &mut dh);
            }

            let dz = tanh_backward(&trace.hidden[j], &dh);
            outer_add(self.w_x.of_mut(grad), hid, width, &dz, &trace.inputs[j]);
            if j > 0 {
                outer_add(self.w_h.of_mut(grad), hid, hid, &dz, &trace.hidden[j - 1]);
            }
            axpy(1.0, &dz, self.b.of_mut(grad));

            let mut dx = vec![0.0; width];
            matvec_t_add(self.w_x.of(params), hid, width, &dz, &mut dx);
            axpy(1.0, &dx[static_offset..], &mut d_static);

            dh_next = vec![0.0; hid];
            matvec_t_add(self.w_h.of(params), hid, hid, &dz, &mut dh_next);
        }
        self.statics.backward(grad, window, &d_static)
    }
}

impl WindowModel for DeepAr {
    fn name(&self) -> &str {
        "deepar"
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
        let count: usize = windows
            .iter()
            .map(|w| {
                (1..self.steps())
                    .filter(|&j| self.target_at(w, j, 1.0).1 > 0.0)
                    .count()
            })
            .sum();
        if count == 0 {
            return Ok(0.0);
        }
        let norm = 1.0 / count as f64;

        let mut total = 0.0;
        for w in windows {
            let scale = mean_abs_scale(w);
            let statics = self.statics.encode(params, w, scale)?;
            let trace = self.unroll(params, w, scale, &statics);
            for j in 1..self.steps() {
                let (z, m) = self.target_at(w, j, scale);
                if m > 0.0 {
                    total += trace.heads[j].nll(z);
                }
            }
            if let Some(g) = grad.as_deref_mut() {
                self.backward(params, g, w, &trace, scale, norm)?;
            }
        }
        Ok(total * norm)
    }

    fn predict(
        &self,
        params: &[f64],
        window: &Window,
        num_samples: usize,
        rng: &mut StdRng,
    ) -> Result<Prediction> {
        check_params(params, self.num_params())?;
        self.dims.check_window(window)?;
        let c = self.dims.context_length;
        let scale = mean_abs_scale(window);
        let statics = self.statics.encode(params, window, scale)?;

        let mut h = vec![0.0; self.hidden];
        let mut lag = (0.0, 0.0);
        for j in 0..c {
            let x = self.input(lag.0, lag.1, self.dynamic_at(window, j), &statics);
            h = self.cell(params, &x, &h);
            lag = self.target_at(window, j, scale);
        }

        let mut paths = Vec::with_capacity(num_samples);
        for _ in 0..num_samples {
            let mut state = h.clone();
            let (mut prev, mut prev_mask) = lag;
            let mut path = Vec::with_capacity(self.dims.horizon);
            for t in 0..self.dims.horizon {
                let x = self.input(prev, prev_mask, self.dynamic_at(window, c + t), &statics);
                state = self.cell(params, &x, &state);
                let draw = self.head(params, &state).sample(rng);
                path.push(draw * scale);
                prev = draw;
                prev_mask = 1.0;
            }
            paths.push(path);
        }
        Ok(Prediction::Samples(paths))
    }
}
