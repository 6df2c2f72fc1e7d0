use std::path::Path;
use std::time::Instant;

use crate::checkpoint::{CheckpointStore, SnapshotRef, Stateful};
use crate::error::Result;
use crate::network::SegmentationModel;
use crate::optim::{Optimizer, StepLr};
use crate::train::options::TrainingOptions;
use crate::util::PeakMemory;

/// Where the training loop stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Streams, model and visualization subset are being prepared.
    Initializing,
    /// One optimization step per advance.
    Running,
    /// A tick boundary was reached; bookkeeping is due.
    TickMaintenance,
    /// Training finished or was skipped.
    Stopped,
}

/// Everything the loop mutates between iterations.
///
/// Only `model`, `optimizer`, `schedule` and `cur_iter` survive a restart;
/// the tick anchors are rebuilt from the resumed iteration.
pub struct TrainingState<M> {
    pub cur_iter: usize,
    pub cur_tick: usize,
    pub model: M,
    pub optimizer: Optimizer,
    pub schedule: StepLr,
    pub tick_start_iter: usize,
    pub tick_start_time: Instant,
    /// Seconds spent outside optimization before the current tick began.
    pub maintenance_secs: f64,
    pub peak_memory: PeakMemory,
}

impl<M: SegmentationModel> TrainingState<M> {
    pub fn new(model: M, opts: &TrainingOptions) -> Self {
        TrainingState {
            cur_iter: 0,
            cur_tick: 0,
            model,
            optimizer: Optimizer::new(opts.optimizer, opts.lr),
            schedule: StepLr::new(opts.lr, opts.lr_steps, opts.lr_decay),
            tick_start_iter: 0,
            tick_start_time: Instant::now(),
            maintenance_secs: 0.0,
            peak_memory: PeakMemory::default(),
        }
    }

    /// Snapshot sections in the order they are written.
    pub fn sections(&self) -> [(&str, &dyn Stateful); 3] {
        [("model", &self.model), ("opt", &self.optimizer), ("lr_sch", &self.schedule)]
    }

    pub fn sections_mut(&mut self) -> [(&str, &mut dyn Stateful); 3] {
        [("model", &mut self.model), ("opt", &mut self.optimizer), ("lr_sch", &mut self.schedule)]
    }

    /// Restores model, optimizer and schedule from `path`; the iteration
    /// counter is left alone.
    pub fn restore(&mut self, path: &Path) -> Result<usize> {
        let iteration = CheckpointStore::load(path, &mut self.sections_mut())?;
        self.optimizer.set_learning_rate(self.schedule.current_lr());
        Ok(iteration)
    }

    /// Continues from the newest snapshot in `dir`.
    pub fn resume_latest(&mut self, dir: &Path) -> Result<SnapshotRef> {
        let snapshot = CheckpointStore::resume_latest(dir, &mut self.sections_mut())?;
        self.optimizer.set_learning_rate(self.schedule.current_lr());
        self.cur_iter = snapshot.iteration;
        Ok(snapshot)
    }

    /// Starts a new tick at the current iteration.
    pub fn reset_anchors(&mut self, now: Instant) {
        self.tick_start_iter = self.cur_iter;
        self.tick_start_time = now;
    }
}
