use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc::{self, Receiver},
    },
    thread,
};

use crate::{vol::Vol, Float, Result};

/// The unit the network trains on: an image, the side values fused after the
/// image branch and the target class.
#[derive(Debug, Clone)]
pub struct TrainSample {
    pub image: Vol,
    pub side: Vec<Float>,
    pub target: usize,
}

impl TrainSample {
    pub fn new(image: Vol, side: Vec<Float>, target: usize) -> Self {
        Self {
            image,
            side,
            target,
        }
    }
}

/// Indexed batches for one epoch. `get` may be called concurrently from
/// prefetch workers.
pub trait Sequence: Send + Sync {
    /// Number of batches per epoch.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Result<Vec<TrainSample>>;

    fn on_epoch_end(&mut self) {}
}

/// Loads batches ahead of the consumer on worker threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefetcher {
    /// 0 loads every batch on the calling thread
    pub workers: usize,
    /// loaded batches that may wait for the consumer
    pub max_queue_size: usize,
}

impl Default for Prefetcher {
    fn default() -> Self {
        Self {
            workers: 1,
            max_queue_size: 10,
        }
    }
}

type Loaded = (usize, Result<Vec<TrainSample>>);

impl Prefetcher {
    /// Hands every batch of `seq` to `consume` exactly once, in index order.
    /// The first loader or consumer error ends the pass and is returned.
    pub fn for_each_batch<S, F>(&self, seq: &S, mut consume: F) -> Result<()>
    where
        S: Sequence + ?Sized,
        F: FnMut(usize, Vec<TrainSample>) -> Result<()>,
    {
        let n = seq.len();
        if self.workers == 0 || n == 0 {
            for index in 0..n {
                consume(index, seq.get(index)?)?;
            }
            return Ok(());
        }

        let next = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);
        let (tx, rx) = mpsc::sync_channel::<Loaded>(self.max_queue_size.max(1));

        thread::scope(|s| {
            for _ in 0..self.workers.min(n) {
                let tx = tx.clone();
                let (next, stop) = (&next, &stop);
                s.spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        if index >= n {
                            break;
                        }
                        // the consumer hung up
                        if tx.send((index, seq.get(index))).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            let result = drain(rx, n, &mut consume);
            stop.store(true, Ordering::Relaxed);
            result
        })
    }
}

// Reorders loaded batches by index. Dropping `rx` on return unblocks workers
// waiting on a full queue.
fn drain<F>(rx: Receiver<Loaded>, n: usize, consume: &mut F) -> Result<()>
where
    F: FnMut(usize, Vec<TrainSample>) -> Result<()>,
{
    let mut pending = BTreeMap::new();
    let mut expected = 0;
    for (index, batch) in rx.iter() {
        pending.insert(index, batch);
        while let Some(batch) = pending.remove(&expected) {
            consume(expected, batch?)?;
            expected += 1;
        }
        if expected == n {
            break;
        }
    }
    tracing::trace!(batches = expected, "prefetch pass done");
    Ok(())
}
