//! Flat parameter vectors and their block layout.
//!
//! Every network keeps its weights in one `Vec<f64>` so that the optimizer,
//! gradient clipping, best-epoch snapshots and the serialized artifact all
//! work on a single buffer. A [`ParamLayout`] names the matrix blocks inside
//! that buffer.

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Initial values of a block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Init {
    /// Uniform in `±sqrt(1 / fan_in)`.
    Uniform,
    Zeros,
    Constant(f64),
}

/// A `rows x cols` row-major matrix inside the flat parameter vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub offset: usize,
    pub rows: usize,
    pub cols: usize,
}

impl Block {
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len()
    }

    pub fn of<'p>(&self, params: &'p [f64]) -> &'p [f64] {
        &params[self.range()]
    }

    pub fn of_mut<'p>(&self, params: &'p mut [f64]) -> &'p mut [f64] {
        &mut params[self.range()]
    }

    /// Row `r` of the block.
    pub fn row<'p>(&self, params: &'p [f64], r: usize) -> &'p [f64] {
        let start = self.offset + r * self.cols;
        &params[start..start + self.cols]
    }

    pub fn row_mut<'p>(&self, params: &'p mut [f64], r: usize) -> &'p mut [f64] {
        let start = self.offset + r * self.cols;
        &mut params[start..start + self.cols]
    }
}

/// Ordered blocks of a network's parameter vector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamLayout {
    blocks: Vec<(Block, Init)>,
    len: usize,
}

impl ParamLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a `rows x cols` block.
    pub fn add(&mut self, rows: usize, cols: usize, init: Init) -> Block {
        let block = Block {
            offset: self.len,
            rows,
            cols,
        };
        self.len += block.len();
        self.blocks.push((block, init));
        block
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Seeded initial parameter vector.
    pub fn initialize(&self, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut params = vec![0.0; self.len];
        for (block, init) in &self.blocks {
            let values = block.of_mut(&mut params);
            match *init {
                Init::Zeros => {}
                Init::Constant(c) => values.fill(c),
                Init::Uniform => {
                    let limit = (1.0 / block.cols.max(1) as f64).sqrt();
                    let dist = Uniform::new_inclusive(-limit, limit);
                    for v in values.iter_mut() {
                        *v = dist.sample(&mut rng);
                    }
                }
            }
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_are_laid_out_back_to_back() {
        let mut layout = ParamLayout::new();
        let w = layout.add(3, 4, Init::Uniform);
        let b = layout.add(3, 1, Init::Constant(0.5));
        assert_eq!(w.range(), 0..12);
        assert_eq!(b.range(), 12..15);
        assert_eq!(layout.len(), 15);

        let params = layout.initialize(1);
        assert!(w.of(&params).iter().all(|v| v.abs() <= 0.5));
        assert_eq!(b.of(&params), &[0.5, 0.5, 0.5]);
        assert_eq!(w.row(&params, 1), &params[4..8]);
    }

    #[test]
    fn initialization_is_seeded() {
        let mut layout = ParamLayout::new();
        layout.add(5, 5, Init::Uniform);
        assert_eq!(layout.initialize(3), layout.initialize(3));
        assert_ne!(layout.initialize(3), layout.initialize(4));
    }
}
