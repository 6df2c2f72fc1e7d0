use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::data::{DataSplit, RealDataset, SegDataset, SynSegDataset, TrainStream};
use crate::error::{Result, SegError};
use crate::ledger::LedgerEntry;
use crate::network::PatchNet;
use crate::train::epilogue::run_epilogue;
use crate::train::loop_fn::TrainingLoop;
use crate::train::options::TrainingOptions;

pub const OPTIONS_FILE: &str = "training_options.json";

/// One more than the largest numeric prefix among the sub-directories of
/// `outdir`; 0 when there are none.
pub fn next_run_id(outdir: &Path) -> Result<usize> {
    if !outdir.is_dir() {
        return Ok(0);
    }
    let mut next = 0;
    for entry in fs::read_dir(outdir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let digits: String = name.chars().take_while(char::is_ascii_digit).collect();
        if let Ok(id) = digits.parse::<usize>() {
            next = next.max(id + 1);
        }
    }
    Ok(next)
}

/// `<id:05>-DRCreal`, then `-<aug>_aug`, `-<scale>` and `-CropRatio<r>` for
/// the settings given explicitly.
pub fn run_dir_name(id: usize, aug: Option<&str>, scale: Option<u32>, crop_ratio: Option<f64>) -> String {
    let mut name = format!("{id:05}-DRCreal");
    if let Some(aug) = aug {
        name.push_str(&format!("-{aug}_aug"));
    }
    if let Some(scale) = scale {
        name.push_str(&format!("-{scale}"));
    }
    if let Some(ratio) = crop_ratio {
        name.push_str(&format!("-CropRatio{ratio:?}"));
    }
    name
}

/// Picks a fresh run directory under the synthetic data root and stores it
/// in `opts.run_dir`. A resumed run reuses `resume_from` instead.
pub fn assign_run_dir(opts: &mut TrainingOptions, scale: Option<u32>, crop_ratio: Option<f64>) -> Result<()> {
    let id = next_run_id(&opts.syn_data)?;
    let fresh = opts.syn_data.join(run_dir_name(id, opts.aug.as_deref(), scale, crop_ratio));
    if fresh.exists() {
        return Err(SegError::RunDirExists(fresh));
    }
    opts.run_dir = match &opts.resume_from {
        Some(dir) => dir.clone(),
        None => fresh,
    };
    Ok(())
}

/// Datasets of one run: synthetic train/val halves and the real test split.
pub struct RunData {
    pub train: Arc<dyn SegDataset>,
    pub val: Arc<dyn SegDataset>,
    pub test: Arc<dyn SegDataset>,
}

impl RunData {
    /// The first 90% of the sorted synthetic files train, the rest validate.
    pub fn open(opts: &TrainingOptions) -> Result<RunData> {
        let files = SynSegDataset::list_images(&opts.syn_data)?;
        let split = files.len() * 9 / 10;
        let train = SynSegDataset::open(&opts.syn_data, 0..split, opts.scale, opts.crop_ratio)?;
        let val = SynSegDataset::open(&opts.syn_data, split..files.len(), opts.scale, opts.crop_ratio)?;

        let kind = opts.real_kind()?;
        let test = RealDataset::open(kind, &opts.real_root()?, DataSplit::Test, opts.scale)?;
        info!(train = train.len(), val = val.len(), test = test.len(), real = %test.kind(), "datasets ready");
        Ok(RunData { train: Arc::new(train), val: Arc::new(val), test: Arc::new(test) })
    }
}

/// Creates the run directory and records the resolved options in it.
pub fn prepare_run_dir(opts: &TrainingOptions) -> Result<PathBuf> {
    fs::create_dir_all(&opts.run_dir)?;
    opts.save_json(&opts.run_dir.join(OPTIONS_FILE))?;
    Ok(opts.run_dir.clone())
}

/// Trains, validates and tests one run end to end. Returns the test entries.
pub fn launch(opts: TrainingOptions) -> Result<Vec<LedgerEntry>> {
    opts.validate()?;
    let data = RunData::open(&opts)?;
    let run_dir = prepare_run_dir(&opts)?;

    let mut rng = StdRng::seed_from_u64(opts.random_seed);
    let model = PatchNet::new(opts.model.clone(), &mut rng)?;
    let train = TrainStream::spawn(Arc::clone(&data.train), opts.batch, opts.random_seed, opts.prefetch_depth)?;

    let decode_failures = train.failure_counter();
    let training = TrainingLoop::initialize(opts.clone(), &run_dir, model, Box::new(train), Arc::clone(&data.val))?
        .with_decode_failures(decode_failures);
    let mut state = training.run()?;
    let entries = run_epilogue(&mut state, &opts, &run_dir, data.test)?;
    info!(run_dir = %run_dir.display(), "done");
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_dir_name_lists_explicit_settings() {
        assert_eq!(run_dir_name(3, None, None, None), "00003-DRCreal");
        assert_eq!(run_dir_name(12, Some("gc"), Some(64), Some(1.0)), "00012-DRCreal-gc_aug-64-CropRatio1.0");
        assert_eq!(run_dir_name(0, None, None, Some(0.8)), "00000-DRCreal-CropRatio0.8");
    }

    #[test]
    fn run_ids_follow_the_largest_numeric_prefix() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(next_run_id(dir.path()).unwrap(), 0);
        for name in ["img", "mask", "00002-DRCreal", "00007-DRCreal-geom_aug"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("00042-notes.txt"), "").unwrap();
        assert_eq!(next_run_id(dir.path()).unwrap(), 8);
    }

    #[test]
    fn resuming_reuses_the_given_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = TrainingOptions {
            syn_data: dir.path().to_path_buf(),
            resume_from: Some(dir.path().join("00000-DRCreal")),
            ..TrainingOptions::default()
        };
        assign_run_dir(&mut opts, None, None).unwrap();
        assert_eq!(opts.run_dir, dir.path().join("00000-DRCreal"));
    }
}
