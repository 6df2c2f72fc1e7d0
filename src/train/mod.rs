pub mod epilogue;
pub mod loop_fn;
pub mod options;
pub mod run;
pub mod state;
pub mod stats;

pub use epilogue::run_epilogue;
pub use loop_fn::{grid_batch_count, save_prediction_grid, take_grid, BatchSource, TrainingLoop};
pub use options::{TrainingOptions, DEFAULT_REAL_ROOT};
pub use run::{assign_run_dir, launch, next_run_id, prepare_run_dir, run_dir_name, RunData, OPTIONS_FILE};
pub use state::{Phase, TrainingState};
pub use stats::{ScalarSummary, StatsCollector, StatsLine, StatsWriter};
