//! Bounded, ordered batch prefetching on scoped worker threads.

use super::{Batch, BatchSampler};
use crate::context::CancellationToken;
use crate::error::Result;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

/// How often parked workers re-check the cancellation token.
const PARK_INTERVAL: Duration = Duration::from_millis(5);

/// Build `num_batches` batches of `epoch` and hand them to `consume` in
/// batch-index order.
///
/// With `num_workers > 0` batches are built on scoped threads. Workers only
/// claim indices below `delivered + capacity`, so at most `capacity` finished
/// batches wait for the consumer, in the channel or the reorder buffer, and
/// idle workers block until the consumer catches up. `consume` returns
/// `Ok(false)` to stop early. Workers stop when the consumer stops, fails, or
/// the token is cancelled. Returns the number of batches consumed.
pub fn prefetch_batches<F>(
    sampler: &BatchSampler<'_>,
    epoch: usize,
    num_batches: usize,
    num_workers: usize,
    capacity: usize,
    cancel: &CancellationToken,
    consume: F,
) -> Result<usize>
where
    F: FnMut(Batch) -> Result<bool>,
{
    let build = |index: usize| sampler.batch(epoch, index);
    prefetch_ordered(num_batches, num_workers, capacity, cancel, &build, consume)
        .map(|run| run.consumed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PrefetchRun {
    consumed: usize,
    /// Largest number of out-of-order items held back at once.
    peak_buffered: usize,
}

/// Claim window shared by workers and the consumer.
#[derive(Debug, Default)]
struct Gate {
    next: usize,
    delivered: usize,
    stopped: bool,
}

fn prefetch_ordered<T, F>(
    num_batches: usize,
    num_workers: usize,
    capacity: usize,
    cancel: &CancellationToken,
    build: &(dyn Fn(usize) -> Result<T> + Sync),
    mut consume: F,
) -> Result<PrefetchRun>
where
    T: Send,
    F: FnMut(T) -> Result<bool>,
{
    if num_workers == 0 {
        let mut consumed = 0;
        for index in 0..num_batches {
            if cancel.is_cancelled() {
                break;
            }
            consumed += 1;
            if !consume(build(index)?)? {
                break;
            }
        }
        return Ok(PrefetchRun {
            consumed,
            peak_buffered: 0,
        });
    }

    let capacity = capacity.max(1);
    let gate = Mutex::new(Gate::default());
    let wake = Condvar::new();
    let stop = AtomicBool::new(false);
    let (tx, rx) = mpsc::sync_channel::<(usize, Result<T>)>(capacity);

    let claim = || -> Option<usize> {
        let mut g = gate.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if g.stopped || cancel.is_cancelled() || g.next >= num_batches {
                return None;
            }
            if g.next < g.delivered + capacity {
                g.next += 1;
                return Some(g.next - 1);
            }
            g = wake
                .wait_timeout(g, PARK_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    };
    let advance = |delivered: usize, stopped: bool| {
        let mut g = gate.lock().unwrap_or_else(PoisonError::into_inner);
        g.delivered = delivered;
        g.stopped |= stopped;
        wake.notify_all();
    };

    thread::scope(|scope| {
        for _ in 0..num_workers {
            let tx = tx.clone();
            let (claim, stop) = (&claim, &stop);
            scope.spawn(move || {
                while let Some(index) = claim() {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    if tx.send((index, build(index))).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut pending: BTreeMap<usize, Result<T>> = BTreeMap::new();
        let mut peak_buffered = 0;
        let mut expected = 0;
        let mut outcome = Ok(0);
        'receive: while expected < num_batches {
            while let Some(item) = pending.remove(&expected) {
                if cancel.is_cancelled() {
                    break 'receive;
                }
                expected += 1;
                advance(expected, false);
                outcome = Ok(expected);
                match item.and_then(&mut consume) {
                    Ok(true) => {}
                    Ok(false) => break 'receive,
                    Err(err) => {
                        outcome = Err(err);
                        break 'receive;
                    }
                }
            }
            if expected >= num_batches {
                break;
            }
            match rx.recv() {
                Ok((index, item)) => {
                    pending.insert(index, item);
                    peak_buffered = peak_buffered.max(pending.len());
                }
                Err(_) => break,
            }
        }

        stop.store(true, Ordering::Relaxed);
        advance(expected, true);
        drop(rx);
        outcome.map(|consumed| PrefetchRun {
            consumed,
            peak_buffered,
        })
    })
}
