//! Encoder-decoder attention network.
//!
//! Each context position is encoded from its scaled target, observed mask,
//! dynamic features, position and static inputs into keys and values. Each
//! horizon position builds a query from its known dynamic features, position
//! and static inputs, attends over the observed context positions only, and
//! emits a Gaussian marginal for its scaled target.

use super::distribution::Gaussian;
use super::embedding::StaticInputs;
use super::linalg::{axpy, dot, matvec_add, matvec_t_add, outer_add, tanh_backward, tanh_in_place};
use super::params::{Block, Init, ParamLayout};
use super::scaling::{mean_abs_scale, scaled_target};
use super::traits::{check_params, observed_targets, ModelDims, Prediction, WindowModel};
use crate::error::Result;
use crate::window::Window;
use rand::rngs::StdRng;
use std::f64::consts::PI;

#[derive(Debug, Clone)]
pub struct Transformer {
    dims: ModelDims,
    model_dim: usize,
    layout: ParamLayout,
    statics: StaticInputs,
    w_e: Block,
    b_e: Block,
    w_k: Block,
    w_v: Block,
    w_d: Block,
    b_d: Block,
    w_q: Block,
    w_o: Block,
    b_o: Block,
    w_mu: Block,
    b_mu: Block,
    w_sig: Block,
    b_sig: Block,
}

struct Encoded {
    inputs: Vec<Vec<f64>>,
    hidden: Vec<Vec<f64>>,
    keys: Vec<Vec<f64>>,
    values: Vec<Vec<f64>>,
    observed: Vec<usize>,
}

struct Decoded {
    input: Vec<f64>,
    hidden: Vec<f64>,
    query: Vec<f64>,
    /// Attention weights, aligned with `Encoded::observed`.
    weights: Vec<f64>,
    joint: Vec<f64>,
    out: Vec<f64>,
    head: Gaussian,
}

impl Transformer {
    pub fn new(dims: &ModelDims, model_dim: usize, embedding_dim: usize) -> Self {
        let mut layout = ParamLayout::new();
        let statics = StaticInputs::new(
            &mut layout,
            &dims.cardinalities,
            embedding_dim,
            dims.num_static_real,
        );
        let m = model_dim;
        let enc_width = 4 + dims.num_dynamic + statics.width();
        let dec_width = 2 + dims.num_dynamic + statics.width();
        let w_e = layout.add(m, enc_width, Init::Uniform);
        let b_e = layout.add(m, 1, Init::Zeros);
        let w_k = layout.add(m, m, Init::Uniform);
        let w_v = layout.add(m, m, Init::Uniform);
        let w_d = layout.add(m, dec_width, Init::Uniform);
        let b_d = layout.add(m, 1, Init::Zeros);
        let w_q = layout.add(m, m, Init::Uniform);
        let w_o = layout.add(m, 2 * m, Init::Uniform);
        let b_o = layout.add(m, 1, Init::Zeros);
        let w_mu = layout.add(1, m, Init::Uniform);
        let b_mu = layout.add(1, 1, Init::Zeros);
        let w_sig = layout.add(1, m, Init::Uniform);
        let b_sig = layout.add(1, 1, Init::Zeros);
        Self {
            dims: dims.clone(),
            model_dim,
            layout,
            statics,
            w_e,
            b_e,
            w_k,
            w_v,
            w_d,
            b_d,
            w_q,
            w_o,
            b_o,
            w_mu,
            b_mu,
            w_sig,
            b_sig,
        }
    }

    fn enc_width(&self) -> usize {
        4 + self.dims.num_dynamic + self.statics.width()
    }

    fn dec_width(&self) -> usize {
        2 + self.dims.num_dynamic + self.statics.width()
    }

    fn position(&self, j: usize) -> [f64; 2] {
        let angle = 2.0 * PI * j as f64 / (self.dims.context_length + self.dims.horizon) as f64;
        [angle.sin(), angle.cos()]
    }

    fn push_dynamic(&self, x: &mut Vec<f64>, row: &[f64]) {
        let d = self.dims.num_dynamic;
        let start = x.len();
        x.extend_from_slice(&row[..d.min(row.len())]);
        x.resize(start + d, 0.0);
    }

    fn project(&self, params: &[f64], w: Block, b: Block, cols: usize, x: &[f64]) -> Vec<f64> {
        let mut out = b.of(params).to_vec();
        matvec_add(w.of(params), self.model_dim, cols, x, &mut out);
        tanh_in_place(&mut out);
        out
    }

    fn linear(&self, params: &[f64], w: Block, x: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.model_dim];
        matvec_add(w.of(params), self.model_dim, self.model_dim, x, &mut out);
        out
    }

    fn encode(&self, params: &[f64], window: &Window, scale: f64, statics: &[f64]) -> Encoded {
        let c = self.dims.context_length;
        let mut enc = Encoded {
            inputs: Vec::with_capacity(c),
            hidden: Vec::with_capacity(c),
            keys: Vec::with_capacity(c),
            values: Vec::with_capacity(c),
            observed: Vec::new(),
        };
        for i in 0..c {
            let (z, m) = scaled_target(window.past_target[i], window.past_observed[i], scale);
            if m > 0.0 {
                enc.observed.push(i);
            }
            let mut x = Vec::with_capacity(self.enc_width());
            x.push(z);
            x.push(m);
            self.push_dynamic(&mut x, window.past_dynamic_row(i));
            x.extend_from_slice(&self.position(i));
            x.extend_from_slice(statics);
            let u = self.project(params, self.w_e, self.b_e, self.enc_width(), &x);
            enc.keys.push(self.linear(params, self.w_k, &u));
            enc.values.push(self.linear(params, self.w_v, &u));
            enc.inputs.push(x);
            enc.hidden.push(u);
        }
        enc
    }

    fn decode(&self, params: &[f64], window: &Window, enc: &Encoded, statics: &[f64], t: usize) -> Decoded {
        let m = self.model_dim;
        let mut input = Vec::with_capacity(self.dec_width());
        self.push_dynamic(&mut input, window.future_dynamic_row(t));
        input.extend_from_slice(&self.position(self.dims.context_length + t));
        input.extend_from_slice(statics);
        let hidden = self.project(params, self.w_d, self.b_d, self.dec_width(), &input);
        let query = self.linear(params, self.w_q, &hidden);

        let temperature = (m as f64).sqrt();
        let scores: Vec<f64> = enc
            .observed
            .iter()
            .map(|&i| dot(&query, &enc.keys[i]) / temperature)
            .collect();
        let weights = softmax(&scores);

        let mut joint = vec![0.0; 2 * m];
        for (&i, &a) in enc.observed.iter().zip(&weights) {
            axpy(a, &enc.values[i], &mut joint[..m]);
        }
        joint[m..].copy_from_slice(&hidden);

        let mut out = self.b_o.of(params).to_vec();
        matvec_add(self.w_o.of(params), m, 2 * m, &joint, &mut out);
        tanh_in_place(&mut out);
        let head = Gaussian::from_raw(
            dot(self.w_mu.of(params), &out) + params[self.b_mu.offset],
            dot(self.w_sig.of(params), &out) + params[self.b_sig.offset],
        );
        Decoded {
            input,
            hidden,
            query,
            weights,
            joint,
            out,
            head,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn backward_step(
        &self,
        params: &[f64],
        grad: &mut [f64],
        enc: &Encoded,
        dec: &Decoded,
        d_mu: f64,
        d_sig: f64,
        d_keys: &mut [Vec<f64>],
        d_values: &mut [Vec<f64>],
        d_static: &mut [f64],
    ) {
        let m = self.model_dim;
        axpy(d_mu, &dec.out, self.w_mu.of_mut(grad));
        grad[self.b_mu.offset] += d_mu;
        axpy(d_sig, &dec.out, self.w_sig.of_mut(grad));
        grad[self.b_sig.offset] += d_sig;

        let mut d_out = vec![0.0; m];
        axpy(d_mu, self.w_mu.of(params), &mut d_out);
        axpy(d_sig, self.w_sig.of(params), &mut d_out);
        let dz_out = tanh_backward(&dec.out, &d_out);
        outer_add(self.w_o.of_mut(grad), m, 2 * m, &dz_out, &dec.joint);
        axpy(1.0, &dz_out, self.b_o.of_mut(grad));
        let mut d_joint = vec![0.0; 2 * m];
        matvec_t_add(self.w_o.of(params), m, 2 * m, &dz_out, &mut d_joint);
        let (d_context, d_hidden_direct) = d_joint.split_at(m);

        // Attention read-out and softmax.
        let d_weights: Vec<f64> = enc
            .observed
            .iter()
            .zip(&dec.weights)
            .map(|(&i, &a)| {
                axpy(a, d_context, &mut d_values[i]);
                dot(d_context, &enc.values[i])
            })
            .collect();
        let mean_dw: f64 = dec.weights.iter().zip(&d_weights).map(|(a, d)| a * d).sum();
        let temperature = (m as f64).sqrt();
        let mut d_query = vec![0.0; m];
        for ((&i, &a), &dw) in enc.observed.iter().zip(&dec.weights).zip(&d_weights) {
            let d_score = a * (dw - mean_dw) / temperature;
            axpy(d_score, &enc.keys[i], &mut d_query);
            axpy(d_score, &dec.query, &mut d_keys[i]);
        }

        outer_add(self.w_q.of_mut(grad), m, m, &d_query, &dec.hidden);
        let mut d_hidden = d_hidden_direct.to_vec();
        matvec_t_add(self.w_q.of(params), m, m, &d_query, &mut d_hidden);
        let dz_dec = tanh_backward(&dec.hidden, &d_hidden);
        outer_add(self.w_d.of_mut(grad), m, self.dec_width(), &dz_dec, &dec.input);
        axpy(1.0, &dz_dec, self.b_d.of_mut(grad));
        let mut d_input = vec![0.0; self.dec_width()];
        matvec_t_add(self.w_d.of(params), m, self.dec_width(), &dz_dec, &mut d_input);
        axpy(1.0, &d_input[2 + self.dims.num_dynamic..], d_static);
    }

    fn backward_encoder(
        &self,
        params: &[f64],
        grad: &mut [f64],
        enc: &Encoded,
        d_keys: &[Vec<f64>],
        d_values: &[Vec<f64>],
        d_static: &mut [f64],
    ) {
        let m = self.model_dim;
        let width = self.enc_width();
        for &i in &enc.observed {
            outer_add(self.w_k.of_mut(grad), m, m, &d_keys[i], &enc.hidden[i]);
            outer_add(self.w_v.of_mut(grad), m, m, &d_values[i], &enc.hidden[i]);
            let mut d_hidden = vec![0.0; m];
            matvec_t_add(self.w_k.of(params), m, m, &d_keys[i], &mut d_hidden);
            matvec_t_add(self.w_v.of(params), m, m, &d_values[i], &mut d_hidden);
            let dz = tanh_backward(&enc.hidden[i], &d_hidden);
            outer_add(self.w_e.of_mut(grad), m, width, &dz, &enc.inputs[i]);
            axpy(1.0, &dz, self.b_e.of_mut(grad));
            let mut d_input = vec![0.0; width];
            matvec_t_add(self.w_e.of(params), m, width, &dz, &mut d_input);
            axpy(1.0, &d_input[4 + self.dims.num_dynamic..], d_static);
        }
    }
}

fn softmax(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

impl WindowModel for Transformer {
    fn name(&self) -> &str {
        "transformer"
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
        let c = self.dims.context_length;
        let m = self.model_dim;

        let mut total = 0.0;
        for w in windows {
            let scale = mean_abs_scale(w);
            let statics = self.statics.encode(params, w, scale)?;
            let enc = self.encode(params, w, scale, &statics);
            let mut d_keys = vec![vec![0.0; m]; c];
            let mut d_values = vec![vec![0.0; m]; c];
            let mut d_static = vec![0.0; self.statics.width()];

            for t in 0..self.dims.horizon {
                let (z, observed) = scaled_target(w.future_target[t], w.future_observed[t], scale);
                if observed == 0.0 {
                    continue;
                }
                let dec = self.decode(params, w, &enc, &statics, t);
                total += dec.head.nll(z);
                if let Some(g) = grad.as_deref_mut() {
                    let hg = dec.head.nll_gradient(z);
                    self.backward_step(
                        params,
                        g,
                        &enc,
                        &dec,
                        hg.d_mean * norm,
                        hg.d_raw_scale * norm,
                        &mut d_keys,
                        &mut d_values,
                        &mut d_static,
                    );
                }
            }
            if let Some(g) = grad.as_deref_mut() {
                self.backward_encoder(params, g, &enc, &d_keys, &d_values, &mut d_static);
                self.statics.backward(g, w, &d_static)?;
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
        let statics = self.statics.encode(params, window, scale)?;
        let enc = self.encode(params, window, scale, &statics);
        let (mean, spread) = (0..self.dims.horizon)
            .map(|t| {
                let head = self.decode(params, window, &enc, &statics, t).head;
                (head.mean * scale, head.scale * scale)
            })
            .unzip();
        Ok(Prediction::Gaussian {
            mean,
            scale: spread,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testing::{gradient_check, toy_window};
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    fn dims() -> ModelDims {
        ModelDims {
            context_length: 5,
            horizon: 2,
            num_dynamic: 1,
            num_static_real: 1,
            cardinalities: vec![3],
            season_length: 1,
        }
    }

    #[test]
    fn softmax_normalizes() {
        let w = softmax(&[1.0, 2.0, 3.0]);
        assert_relative_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(w[2] > w[1] && w[1] > w[0]);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let model = Transformer::new(&dims(), 4, 2);
        let params = model.init_params(11);
        let windows = vec![toy_window(5, 2, 1, 0), toy_window(5, 2, 1, 1)];
        gradient_check(&model, &params, &windows);
    }

    #[test]
    fn masked_context_values_do_not_matter() {
        let model = Transformer::new(&dims(), 4, 2);
        let params = model.init_params(2);
        let mut a = toy_window(5, 2, 1, 2);
        a.past_observed[3] = 0.0;
        let mut b = a.clone();
        a.past_target[3] = 0.0;
        b.past_target[3] = -1e7;
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            model.predict(&params, &a, 1, &mut rng).unwrap(),
            model.predict(&params, &b, 1, &mut rng).unwrap()
        );
    }

    #[test]
    fn predicts_positive_spread() {
        let model = Transformer::new(&dims(), 4, 2);
        let params = model.init_params(2);
        let mut rng = StdRng::seed_from_u64(0);
        match model.predict(&params, &toy_window(5, 2, 1, 0), 1, &mut rng).unwrap() {
            Prediction::Gaussian { mean, scale } => {
                assert_eq!(mean.len(), 2);
                assert!(scale.iter().all(|s| *s > 0.0));
            }
            other => panic!("unexpected prediction {other:?}"),
        }
    }
}
