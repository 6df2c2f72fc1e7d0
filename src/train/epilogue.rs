use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::data::{EvalStream, SegDataset};
use crate::error::{Result, SegError};
use crate::ledger::{LedgerEntry, MetricLedger};
use crate::metrics::evaluate;
use crate::network::SegmentationModel;
use crate::train::loop_fn::{grid_batch_count, log_eval_failures, save_prediction_grid, take_grid};
use crate::train::options::TrainingOptions;
use crate::train::state::TrainingState;

/// Tests the chosen checkpoints on the real dataset.
///
/// With `test_all` every snapshot referenced by the validation ledger is
/// scored under `test_all`; otherwise only the one with the best validation
/// `IoU`, under `test`. Returns the entries written.
pub fn run_epilogue<M: SegmentationModel>(
    state: &mut TrainingState<M>,
    opts: &TrainingOptions,
    run_dir: &Path,
    test: Arc<dyn SegDataset>,
) -> Result<Vec<LedgerEntry>> {
    let history = MetricLedger::read_all(run_dir, "val")?;
    let (split, references) = if opts.test_all {
        let references = history.all_checkpoint_references();
        if references.is_empty() {
            return Err(SegError::EmptyLedger(history.path.clone()));
        }
        info!(count = references.len(), "testing every intermediate checkpoint");
        ("test_all", references)
    } else {
        let (index, best) = history.best_by("IoU")?;
        let reference = best
            .snapshot_pth
            .clone()
            .ok_or_else(|| SegError::EmptyLedger(history.path.clone()))?;
        info!(entry = index, snapshot = %reference, "restoring the checkpoint with the best validation IoU");
        ("test", vec![reference])
    };

    let mut ledger = MetricLedger::open(run_dir, split)?;
    let mut written = Vec::with_capacity(references.len());
    for reference in references {
        state.restore(&run_dir.join(&reference))?;
        let batches = EvalStream::new(Arc::clone(&test), opts.batch);
        let failures = batches.failure_counter();
        let bundle = evaluate(&mut state.model, batches, &opts.metrics)?;
        log_eval_failures(split, &failures);
        let entry = LedgerEntry::new(bundle, Some(reference));
        ledger.append(&entry)?;
        written.push(entry);

        let mut batches = EvalStream::new(Arc::clone(&test), opts.batch);
        let grid = take_grid(&mut batches, grid_batch_count(opts.grid_size, opts.batch))?;
        save_prediction_grid(&mut state.model, &grid, &run_dir.join("seg-test.png"), opts.grid_size)?;
    }
    Ok(written)
}
