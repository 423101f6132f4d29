//! Static covariate encoding: categorical embeddings, static reals and the
//! log of the window scale.

use super::params::{Block, Init, ParamLayout};
use crate::error::{ForecastError, Result};
use crate::window::Window;

/// One embedding table per static categorical feature.
#[derive(Debug, Clone, PartialEq)]
pub struct Embeddings {
    tables: Vec<(Block, usize)>,
    dim: usize,
}

impl Embeddings {
    pub fn new(layout: &mut ParamLayout, cardinalities: &[usize], dim: usize) -> Self {
        let tables = cardinalities
            .iter()
            .map(|&card| {
                let rows = card.max(1);
                (layout.add(rows, dim, Init::Uniform), rows)
            })
            .collect();
        Self { tables, dim }
    }

    pub fn width(&self) -> usize {
        self.tables.len() * self.dim
    }

    /// Row of table `feature` for the window's code. Codes the table was not
    /// trained with are an error.
    fn row_of(&self, feature: usize, codes: &[usize]) -> Result<usize> {
        let rows = self.tables[feature].1;
        match codes.get(feature) {
            Some(&code) if code < rows => Ok(code),
            Some(&code) => Err(ForecastError::ArtifactMismatch {
                violations: vec![format!(
                    "static categorical {feature} has code {code}, the model embeds {rows} levels"
                )],
            }),
            None => Err(ForecastError::ArtifactMismatch {
                violations: vec![format!(
                    "window carries {} static categorical codes, the model embeds {}",
                    codes.len(),
                    self.tables.len()
                )],
            }),
        }
    }

    pub fn lookup(&self, params: &[f64], codes: &[usize], out: &mut Vec<f64>) -> Result<()> {
        for (i, (block, _)) in self.tables.iter().enumerate() {
            out.extend_from_slice(block.row(params, self.row_of(i, codes)?));
        }
        Ok(())
    }

    /// Accumulate `d_out` (one slice of `width()` values) into the table rows.
    pub fn backward(&self, grad: &mut [f64], codes: &[usize], d_out: &[f64]) -> Result<()> {
        for (i, (block, _)) in self.tables.iter().enumerate() {
            let row = block.row_mut(grad, self.row_of(i, codes)?);
            for (g, d) in row.iter_mut().zip(&d_out[i * self.dim..(i + 1) * self.dim]) {
                *g += d;
            }
        }
        Ok(())
    }
}

/// Per-window static input vector: `[static reals, embeddings, ln(scale)]`.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticInputs {
    embeddings: Embeddings,
    num_real: usize,
}

impl StaticInputs {
    pub fn new(
        layout: &mut ParamLayout,
        cardinalities: &[usize],
        embedding_dim: usize,
        num_real: usize,
    ) -> Self {
        Self {
            embeddings: Embeddings::new(layout, cardinalities, embedding_dim),
            num_real,
        }
    }

    pub fn width(&self) -> usize {
        self.num_real + self.embeddings.width() + 1
    }

    pub fn encode(&self, params: &[f64], window: &Window, scale: f64) -> Result<Vec<f64>> {
        let mut out = Vec::with_capacity(self.width());
        for i in 0..self.num_real {
            out.push(window.static_real.get(i).copied().unwrap_or(0.0));
        }
        self.embeddings
            .lookup(params, &window.static_categorical, &mut out)?;
        out.push(scale.ln());
        Ok(out)
    }

    /// Route the gradient of the static vector into the embedding tables.
    pub fn backward(&self, grad: &mut [f64], window: &Window, d_static: &[f64]) -> Result<()> {
        let start = self.num_real;
        let end = start + self.embeddings.width();
        self.embeddings
            .backward(grad, &window.static_categorical, &d_static[start..end])
    }
}
