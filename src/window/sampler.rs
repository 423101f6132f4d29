//! Seeded minibatch sampling over training candidates.

use super::{Batch, TrainingPlan, Windower};
use crate::error::{ForecastError, Result};
use crate::utils::derive_seed;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// How series are chosen for each window of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    /// Every eligible series is equally likely.
    #[default]
    Uniform,
    /// Series are chosen in proportion to their number of candidate windows.
    Weighted,
}

/// Draws reproducible batches: batch `(epoch, index)` depends only on the
/// seed, never on which thread builds it or in which order.
#[derive(Debug, Clone)]
pub struct BatchSampler<'a> {
    windower: Windower<'a>,
    plan: TrainingPlan,
    strategy: SamplingStrategy,
    batch_size: usize,
    seed: u64,
    cumulative: Vec<usize>,
}

impl<'a> BatchSampler<'a> {
    pub fn new(
        windower: Windower<'a>,
        plan: TrainingPlan,
        strategy: SamplingStrategy,
        batch_size: usize,
        seed: u64,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(ForecastError::InvalidParameter(
                "batch_size must be positive".to_string(),
            ));
        }
        if plan.total_candidates() == 0 {
            return Err(ForecastError::InsufficientData { needed: 1, got: 0 });
        }
        let cumulative = plan
            .series
            .iter()
            .scan(0usize, |acc, s| {
                *acc += s.starts.len();
                Some(*acc)
            })
            .collect();
        Ok(Self {
            windower,
            plan,
            strategy,
            batch_size,
            seed,
            cumulative,
        })
    }

    pub fn plan(&self) -> &TrainingPlan {
        &self.plan
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Build batch `index` of `epoch`.
    pub fn batch(&self, epoch: usize, index: usize) -> Result<Batch> {
        let mut rng = StdRng::seed_from_u64(derive_seed(self.seed, &[epoch as u64, index as u64]));
        let total = self.cumulative.last().copied().unwrap_or(0);

        let windows = (0..self.batch_size)
            .map(|_| {
                let slot = match self.strategy {
                    SamplingStrategy::Uniform => rng.gen_range(0..self.plan.series.len()),
                    SamplingStrategy::Weighted => {
                        let r = rng.gen_range(0..total);
                        self.cumulative.partition_point(|&c| c <= r)
                    }
                };
                let series = &self.plan.series[slot];
                let start = series.starts[rng.gen_range(0..series.starts.len())];
                self.windower.window_at(series.series_index, start, true)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Batch {
            epoch,
            index,
            windows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{SeriesCatalog, SeriesId};
    use crate::core::{Calendar, OffCalendarPolicy};
    use crate::window::PaddingPolicy;
    use chrono::{TimeZone, Utc};

    fn catalog(lengths: &[usize]) -> SeriesCatalog {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let calendar = Calendar::new("H".parse().unwrap(), t0, OffCalendarPolicy::Reject).unwrap();
        let mut catalog = SeriesCatalog::new(calendar);
        for (i, &len) in lengths.iter().enumerate() {
            catalog
                .register(SeriesId::new(format!("s{i}")), t0, &vec![1.0; len], None, None)
                .unwrap();
        }
        catalog
    }

    fn sampler(catalog: &SeriesCatalog, strategy: SamplingStrategy) -> BatchSampler<'_> {
        let windower = Windower::new(catalog, 4, 2, PaddingPolicy::Drop).unwrap();
        let plan = windower.training_plan().unwrap();
        BatchSampler::new(windower, plan, strategy, 16, 7).unwrap()
    }

    #[test]
    fn batches_are_reproducible() {
        let catalog = catalog(&[20, 30, 40]);
        let s = sampler(&catalog, SamplingStrategy::Uniform);
        assert_eq!(s.batch(3, 5).unwrap(), s.batch(3, 5).unwrap());
        assert_ne!(s.batch(3, 5).unwrap(), s.batch(3, 6).unwrap());
        let b = s.batch(0, 0).unwrap();
        assert_eq!(b.len(), 16);
        assert!(b
            .windows
            .iter()
            .all(|w| w.context_length() == 4 && w.horizon() == 2));
    }

    #[test]
    fn weighted_sampling_favours_long_series() {
        // Candidates: 2 for the short series, 194 for the long one.
        let catalog = catalog(&[9, 201]);
        let s = sampler(&catalog, SamplingStrategy::Weighted);
        let mut short = 0;
        for i in 0..20 {
            short += s
                .batch(0, i)
                .unwrap()
                .windows
                .iter()
                .filter(|w| w.series_index == 0)
                .count();
        }
        assert!(short < 40, "short series drawn {short} times of 320");
    }

    #[test]
    fn every_window_is_a_candidate() {
        let catalog = catalog(&[12, 15]);
        let s = sampler(&catalog, SamplingStrategy::Uniform);
        for i in 0..5 {
            for w in s.batch(1, i).unwrap().windows {
                let entry = catalog.get(w.series_index).unwrap();
                let offset = w.forecast_start - entry.start_step();
                assert!(offset >= 4 && offset <= entry.len() as i64 - 4);
            }
        }
    }
}
