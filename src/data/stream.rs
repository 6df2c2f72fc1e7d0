use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use crate::data::dataset::{fetch_with_fallback, FailureCounter, SegDataset};
use crate::data::sample::{Batch, Sample};
use crate::error::{Result, SegError};

/// Endless sequence of dataset indices.
///
/// Each pass over the dataset is a fresh permutation drawn from an RNG seeded
/// once with `seed`, so two samplers with the same seed and length produce the
/// same sequence forever. This iterator never returns `None`.
#[derive(Debug)]
pub struct InfiniteSampler {
    len: usize,
    rng: StdRng,
    order: Vec<usize>,
    pos: usize,
}

impl InfiniteSampler {
    pub fn new(len: usize, seed: u64) -> Result<InfiniteSampler> {
        if len == 0 {
            return Err(SegError::config("cannot sample from an empty dataset"));
        }
        Ok(InfiniteSampler { len, rng: StdRng::seed_from_u64(seed), order: Vec::new(), pos: 0 })
    }
}

impl Iterator for InfiniteSampler {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.pos == self.order.len() {
            self.order = (0..self.len).collect();
            self.order.shuffle(&mut self.rng);
            self.pos = 0;
        }
        let index = self.order[self.pos];
        self.pos += 1;
        Some(index)
    }
}

/// Infinite training batches decoded ahead of time on a worker thread.
///
/// The worker keeps at most `depth` batches queued; `next` blocks until one
/// is ready. An undecodable batch is delivered as an `Err` and ends the
/// stream; later calls report the worker as disconnected.
pub struct TrainStream {
    rx: Option<Receiver<Result<Batch>>>,
    worker: Option<JoinHandle<()>>,
    failures: FailureCounter,
}

impl TrainStream {
    pub fn spawn(dataset: Arc<dyn SegDataset>, batch_size: usize, seed: u64, depth: usize) -> Result<TrainStream> {
        if batch_size == 0 {
            return Err(SegError::config("batch size must be positive"));
        }
        let mut sampler = InfiniteSampler::new(dataset.len(), seed)?;
        let failures = FailureCounter::default();
        let worker_failures = failures.clone();
        let (tx, rx) = mpsc::sync_channel(depth.max(1));

        let worker = thread::Builder::new()
            .name("train-prefetch".to_string())
            .spawn(move || loop {
                let batch = (&mut sampler)
                    .take(batch_size)
                    .map(|i| fetch_with_fallback(dataset.as_ref(), i, &worker_failures))
                    .collect::<Result<Vec<Sample>>>()
                    .and_then(|samples| Batch::collate(&samples));
                let failed = batch.is_err();
                if tx.send(batch).is_err() || failed {
                    debug!("train prefetch worker exiting");
                    return;
                }
            })?;

        Ok(TrainStream { rx: Some(rx), worker: Some(worker), failures })
    }

    /// Number of samples replaced by the fallback so far.
    pub fn failures(&self) -> usize {
        self.failures.get()
    }

    /// Shared handle on the fallback count that outlives boxing the stream.
    pub fn failure_counter(&self) -> FailureCounter {
        self.failures.clone()
    }
}

impl Iterator for TrainStream {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Result<Batch>> {
        let rx = self.rx.as_ref()?;
        Some(
            rx.recv()
                .unwrap_or_else(|_| Err(SegError::WorkerDisconnected("training stream worker stopped".to_string()))),
        )
    }
}

impl Drop for TrainStream {
    fn drop(&mut self) {
        // Closing the channel first unblocks a worker waiting on a full queue.
        self.rx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Single ordered pass over a dataset in batches; the last batch may be short.
pub struct EvalStream {
    dataset: Arc<dyn SegDataset>,
    batch_size: usize,
    pos: usize,
    failures: FailureCounter,
}

impl EvalStream {
    pub fn new(dataset: Arc<dyn SegDataset>, batch_size: usize) -> EvalStream {
        EvalStream { dataset, batch_size: batch_size.max(1), pos: 0, failures: FailureCounter::default() }
    }

    pub fn failures(&self) -> usize {
        self.failures.get()
    }

    pub fn failure_counter(&self) -> FailureCounter {
        self.failures.clone()
    }
}

impl Iterator for EvalStream {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Result<Batch>> {
        let len = self.dataset.len();
        if self.pos >= len {
            return None;
        }
        let end = (self.pos + self.batch_size).min(len);
        let batch = (self.pos..end)
            .map(|i| fetch_with_fallback(self.dataset.as_ref(), i, &self.failures))
            .collect::<Result<Vec<Sample>>>()
            .and_then(|samples| Batch::collate(&samples));
        self.pos = end;
        Some(batch)
    }
}
