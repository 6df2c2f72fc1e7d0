use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::augment::{augment_batch, Augment, AugmentPipe};
use crate::checkpoint::{CheckpointStore, SnapshotRef};
use crate::data::{Batch, EvalStream, FailureCounter, SegDataset};
use crate::error::{Result, SegError};
use crate::ledger::{snapshot_reference, LedgerEntry, MetricLedger};
use crate::loss::CrossEntropyLoss;
use crate::math::{LabelBatch, Tensor4};
use crate::metrics::evaluate;
use crate::network::{Mode, SegmentationModel};
use crate::train::options::TrainingOptions;
use crate::train::state::{Phase, TrainingState};
use crate::train::stats::{StatsCollector, StatsWriter};
use crate::util::format_time;
use crate::viz::{save_seg_grid, GridPanel};

const GIB: f64 = (1u64 << 30) as f64;

/// Source of training batches. Never expected to run dry.
pub type BatchSource = Box<dyn Iterator<Item = Result<Batch>>>;

/// Number of batches needed to fill a `gw × gh` visualization grid.
pub fn grid_batch_count(grid: (usize, usize), batch: usize) -> usize {
    (grid.0 * grid.1).saturating_sub(1) / batch.max(1) + 1
}

/// Pulls `count` batches from `source` and joins them into one.
pub fn take_grid<I>(source: &mut I, count: usize) -> Result<Batch>
where
    I: Iterator<Item = Result<Batch>> + ?Sized,
{
    let batches = source.take(count).collect::<Result<Vec<Batch>>>()?;
    if batches.is_empty() {
        return Err(SegError::config("no batches available for the visualization grid"));
    }
    let images: Vec<Tensor4> = batches.iter().map(|b| b.images.clone()).collect();
    let masks: Vec<LabelBatch> = batches.into_iter().map(|b| b.masks).collect();
    Batch::new(Tensor4::concat(&images)?, LabelBatch::concat(&masks)?)
}

/// Warns when `counter` shows samples replaced by the fallback during an
/// evaluation pass over `split`.
pub(crate) fn log_eval_failures(split: &str, counter: &FailureCounter) {
    let failures = counter.get();
    if failures > 0 {
        warn!(split, failures, "evaluation used fallback samples");
    }
}

/// Renders `[image, prediction, ground truth]` for every sample of `grid`.
pub fn save_prediction_grid<M>(model: &mut M, grid: &Batch, path: &Path, size: (usize, usize)) -> Result<()>
where
    M: SegmentationModel + ?Sized,
{
    let pred = model.predict(&grid.images)?;
    save_seg_grid(
        &[GridPanel::Image(&grid.images), GridPanel::Labels(&pred), GridPanel::Labels(&grid.masks)],
        path,
        size,
    )
}

/// Tick-scheduled optimization of one model.
///
/// Created by `initialize`, driven by `advance` (or `run`) through the
/// `Phase` states until `Stopped`.
pub struct TrainingLoop<M: SegmentationModel> {
    opts: TrainingOptions,
    run_dir: PathBuf,
    state: TrainingState<M>,
    phase: Phase,
    train: BatchSource,
    val: Arc<dyn SegDataset>,
    augment: Option<AugmentPipe>,
    store: CheckpointStore,
    val_ledger: MetricLedger,
    stats: StatsCollector,
    stats_writer: StatsWriter,
    grid: Batch,
    decode_failures: FailureCounter,
    start_time: Instant,
}

impl<M: SegmentationModel> TrainingLoop<M> {
    /// Prepares a run: visualization subset, preview images, optional
    /// resume, fresh tick anchors.
    pub fn initialize(
        opts: TrainingOptions,
        run_dir: &Path,
        mut model: M,
        mut train: BatchSource,
        val: Arc<dyn SegDataset>,
    ) -> Result<Self> {
        let start_time = Instant::now();
        model.set_mode(Mode::Train);
        let num_classes = model.num_classes();
        let mut augment = opts.aug_policy()?.map(|policy| AugmentPipe::new(policy, opts.random_seed));

        let grid = take_grid(&mut train, grid_batch_count(opts.grid_size, opts.batch))?;
        save_prediction_grid(&mut model, &grid, &run_dir.join("seg-train_init.png"), opts.grid_size)?;
        let preview = augment_batch(augment.as_mut().map(|a| a as &mut dyn Augment), grid.clone(), num_classes)?;
        save_seg_grid(
            &[
                GridPanel::Image(&grid.images),
                GridPanel::Labels(&grid.masks),
                GridPanel::Image(&preview.images),
                GridPanel::Labels(&preview.masks),
            ],
            &run_dir.join("augment.png"),
            opts.grid_size,
        )?;

        let stats_writer = StatsWriter::open(run_dir)?;
        let val_ledger = MetricLedger::open(run_dir, "val")?;

        let mut state = TrainingState::new(model, &opts);
        if let Some(dir) = &opts.resume_from {
            state.resume_latest(dir)?;
        }
        let now = Instant::now();
        state.reset_anchors(now);
        state.cur_tick = 0;
        state.maintenance_secs = (now - start_time).as_secs_f64();

        let phase = if opts.test_only {
            info!("training is skipped");
            Phase::Stopped
        } else if state.cur_iter >= opts.total_iter {
            info!(iter = state.cur_iter, total_iter = opts.total_iter, "resumed past the iteration budget; training is skipped");
            Phase::Stopped
        } else {
            info!(total_iter = opts.total_iter, start_iter = state.cur_iter, "training");
            Phase::Running
        };

        Ok(TrainingLoop {
            opts,
            run_dir: run_dir.to_path_buf(),
            state,
            phase,
            train,
            val,
            augment,
            store: CheckpointStore::new(run_dir),
            val_ledger,
            stats: StatsCollector::new(),
            stats_writer,
            grid,
            decode_failures: FailureCounter::default(),
            start_time,
        })
    }

    /// Reports `counter` as `Data/decode_failures` at every tick. Pass the
    /// counter of the stream behind `train`.
    pub fn with_decode_failures(mut self, counter: FailureCounter) -> Self {
        self.decode_failures = counter;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &TrainingState<M> {
        &self.state
    }

    /// Performs the work of the current phase and moves to the next one.
    pub fn advance(&mut self) -> Result<Phase> {
        self.phase = match self.phase {
            Phase::Initializing => {
                return Err(SegError::state("training loop advanced before initialization finished"))
            }
            Phase::Running => {
                self.step()?;
                if self.tick_due() {
                    Phase::TickMaintenance
                } else {
                    Phase::Running
                }
            }
            Phase::TickMaintenance => {
                let done = self.done();
                self.maintenance(done)?;
                if done {
                    Phase::Stopped
                } else {
                    Phase::Running
                }
            }
            Phase::Stopped => Phase::Stopped,
        };
        Ok(self.phase)
    }

    /// Advances until `Stopped` and hands back the final state.
    pub fn run(mut self) -> Result<TrainingState<M>> {
        while self.advance()? != Phase::Stopped {}
        Ok(self.state)
    }

    fn done(&self) -> bool {
        self.state.cur_iter >= self.opts.total_iter
    }

    fn tick_due(&self) -> bool {
        self.done() || self.state.cur_iter >= self.state.tick_start_iter + self.opts.niter_per_tick
    }

    fn step(&mut self) -> Result<()> {
        let batch = self
            .train
            .next()
            .ok_or_else(|| SegError::WorkerDisconnected("training stream ended".to_string()))??;
        let num_classes = self.state.model.num_classes();
        let batch = augment_batch(self.augment.as_mut().map(|a| a as &mut dyn Augment), batch, num_classes)?;

        let state = &mut self.state;
        let logits = state.model.forward(&batch.images)?;
        let (loss, grad) = CrossEntropyLoss::loss_and_grad(&logits, &batch.masks)?;
        self.stats.report("Loss/loss", loss);
        let grads = state.model.backward(&grad)?;
        state.optimizer.step(state.model.parameters_mut(), &grads)?;
        let lr = state.schedule.step();
        state.optimizer.set_learning_rate(lr);

        state.cur_iter += 1;
        state.peak_memory.sample();
        Ok(())
    }

    fn maintenance(&mut self, done: bool) -> Result<()> {
        let tick_end = Instant::now();
        self.log_status(tick_end);

        let tick = self.state.cur_tick;
        let due = |period: Option<usize>| period.is_some_and(|p| done || tick % p == 0);

        if due(self.opts.image_snapshot_ticks) {
            let path = self.run_dir.join(format!("seg-train_{:06}.png", self.state.cur_iter));
            save_prediction_grid(&mut self.state.model, &self.grid, &path, self.opts.grid_size)?;
        }

        let snapshot = if due(self.opts.network_snapshot_ticks) {
            Some(self.store.save(&self.state.sections(), self.state.cur_iter)?)
        } else {
            None
        };

        if let Some(snapshot) = snapshot.filter(|_| !self.opts.metrics.is_empty()) {
            self.validate(&snapshot)?;
        }

        self.stats_writer.write(self.stats.as_dict())?;

        let now = Instant::now();
        self.state.cur_tick += 1;
        self.state.reset_anchors(now);
        self.state.maintenance_secs = (now - tick_end).as_secs_f64();
        Ok(())
    }

    fn log_status(&mut self, tick_end: Instant) {
        let state = &mut self.state;
        let total_sec = (tick_end - self.start_time).as_secs_f64();
        let sec_per_tick = (tick_end - state.tick_start_time).as_secs_f64();
        let sec_per_iter = sec_per_tick / (state.cur_iter - state.tick_start_iter).max(1) as f64;
        let cpu_mem_gb = state.peak_memory.sample() as f64 / GIB;
        let peak_mem_gb = state.peak_memory.peak() as f64 / GIB;
        state.peak_memory.reset();

        let stats = &mut self.stats;
        let mut report = |name: &str, value: f64| {
            stats.report(name, value);
            value
        };
        let fields = [
            format!("tick {:<5}", report("Progress/tick", state.cur_tick as f64) as usize),
            format!("niter {:<8}", report("Progress/niter", state.cur_iter as f64) as usize),
            format!("time {:<12}", format_time(report("Timing/total_sec", total_sec))),
            format!("sec/tick {:<7.1}", report("Timing/sec_per_tick", sec_per_tick)),
            format!("sec/iter {:<7.2}", report("Timing/sec_per_iter", sec_per_iter)),
            format!("maintenance {:<6.1}", report("Timing/maintenance_sec", state.maintenance_secs)),
            format!("cpumem {:<6.2}", report("Resources/cpu_mem_gb", cpu_mem_gb)),
            format!("peakmem {:<6.2}", report("Resources/peak_mem_gb", peak_mem_gb)),
        ];
        report("Data/decode_failures", self.decode_failures.get() as f64);
        report("Timing/total_hours", total_sec / (60.0 * 60.0));
        report("Timing/total_days", total_sec / (24.0 * 60.0 * 60.0));
        info!(target: "synseg::train", "{}", fields.join(" "));
    }

    fn validate(&mut self, snapshot: &SnapshotRef) -> Result<()> {
        info!("evaluating metrics");
        let batches = EvalStream::new(Arc::clone(&self.val), self.opts.batch);
        let failures = batches.failure_counter();
        let bundle = evaluate(&mut self.state.model, batches, &self.opts.metrics)?;
        log_eval_failures("val", &failures);
        let reference = snapshot_reference(&self.run_dir, &snapshot.path);
        self.val_ledger.append(&LedgerEntry::new(bundle, Some(reference)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_needs_enough_batches_to_fill_every_cell() {
        assert_eq!(grid_batch_count((7, 32), 64), 4);
        assert_eq!(grid_batch_count((2, 2), 4), 1);
        assert_eq!(grid_batch_count((2, 2), 3), 2);
    }

    #[test]
    fn grid_batches_are_concatenated() {
        let batch = || Batch::new(Tensor4::zeros([2, 3, 4, 4]), LabelBatch::zeros(2, 4, 4));
        let mut source = vec![batch(), batch(), batch()].into_iter();
        let grid = take_grid(&mut source, 2).unwrap();
        assert_eq!(grid.len(), 4);
        assert_eq!(source.count(), 1);
    }
}
