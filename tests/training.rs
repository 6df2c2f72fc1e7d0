mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use common::{batch_from_masks, write_dog_layout, write_synthetic, ThresholdModel};
use synseg::activation::ActivationFunction;
use synseg::data::{fetch_with_fallback, Batch, FailureCounter, Sample, SegDataset, SynSegDataset};
use synseg::ledger::MetricLedger;
use synseg::math::LabelBatch;
use synseg::network::{LayerSpec, ModelSpec};
use synseg::train::{assign_run_dir, launch, Phase, StatsWriter, TrainingLoop, TrainingOptions};
use synseg::SegError;

fn tiny_options(root: &Path) -> TrainingOptions {
    let syn = root.join("syn");
    let real = root.join("dogs");
    write_synthetic(&syn, 10, 8);
    write_dog_layout(&real, 1, 3, 8);

    let mut opts = TrainingOptions {
        syn_data: syn,
        real_data: "dog".to_string(),
        real_root: Some(real),
        aug: Some("gc".to_string()),
        batch: 2,
        total_iter: 4,
        lr_steps: 2,
        niter_per_tick: 2,
        network_snapshot_ticks: Some(1),
        image_snapshot_ticks: Some(1),
        scale: 8,
        grid_size: (2, 2),
        model: ModelSpec {
            hidden: vec![LayerSpec { size: 4, activation: ActivationFunction::ReLU }],
            ..ModelSpec::default()
        },
        ..TrainingOptions::default()
    };
    assign_run_dir(&mut opts, None, None).unwrap();
    opts
}

fn snapshots_in(ledger: &[synseg::LedgerEntry]) -> Vec<String> {
    ledger.iter().filter_map(|e| e.snapshot_pth.clone()).collect()
}

#[test]
fn full_run_writes_every_artifact() {
    let tmp = tempfile::tempdir().unwrap();
    let opts = tiny_options(tmp.path());
    let run_dir = opts.run_dir.clone();
    assert_eq!(run_dir.file_name().unwrap(), "00000-DRCreal-gc_aug");

    let tested = launch(opts).unwrap();

    for name in [
        "training_options.json",
        "seg-train_init.png",
        "augment.png",
        "seg-train_000002.png",
        "seg-train_000004.png",
        "network-snapshot-000002.json",
        "network-snapshot-000004.json",
        "seg-test.png",
    ] {
        assert!(run_dir.join(name).is_file(), "missing {name}");
    }

    let val = MetricLedger::read_all(&run_dir, "val").unwrap();
    assert_eq!(
        snapshots_in(&val.entries),
        vec!["network-snapshot-000002.json", "network-snapshot-000004.json"]
    );
    for entry in &val.entries {
        for metric in ["pACC", "IoU", "mIoU", "DRC_IoU", "DRC_DICE"] {
            assert!(entry.results.contains_key(metric), "{metric}");
        }
    }

    let best = val.best_by("IoU").unwrap().1.snapshot_pth.clone();
    assert_eq!(tested.len(), 1);
    assert_eq!(tested[0].snapshot_pth, best);
    let test = MetricLedger::read_all(&run_dir, "test").unwrap();
    assert_eq!(test.entries.len(), 1);

    let stats = StatsWriter::read_all(&run_dir).unwrap();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].scalars["Loss/loss"].n, 2);
    assert_eq!(stats[1].scalars["Progress/niter"].mean, 4.0);
    assert_eq!(stats[1].scalars["Progress/tick"].mean, 1.0);
    assert!(stats[0].scalars.contains_key("Timing/sec_per_iter"));
}

#[test]
fn resumed_run_continues_from_the_latest_snapshot() {
    let tmp = tempfile::tempdir().unwrap();
    let opts = tiny_options(tmp.path());
    let run_dir = opts.run_dir.clone();
    launch(opts.clone()).unwrap();

    let mut resumed = opts.clone();
    resumed.resume_from = Some(run_dir.clone());
    resumed.total_iter = 6;
    assign_run_dir(&mut resumed, None, None).unwrap();
    assert_eq!(resumed.run_dir, run_dir);
    launch(resumed).unwrap();

    let val = MetricLedger::read_all(&run_dir, "val").unwrap();
    assert_eq!(
        snapshots_in(&val.entries),
        vec![
            "network-snapshot-000002.json",
            "network-snapshot-000004.json",
            "network-snapshot-000006.json"
        ]
    );
    // Anchors restart at the resumed iteration: one tick of two steps.
    let stats = StatsWriter::read_all(&run_dir).unwrap();
    assert_eq!(stats.len(), 3);
    assert_eq!(stats[2].scalars["Progress/tick"].mean, 0.0);
    assert_eq!(stats[2].scalars["Loss/loss"].n, 2);
}

#[test]
fn test_all_scores_every_checkpoint_without_training() {
    let tmp = tempfile::tempdir().unwrap();
    let opts = tiny_options(tmp.path());
    let run_dir = opts.run_dir.clone();
    launch(opts.clone()).unwrap();

    let again = TrainingOptions {
        resume_from: Some(run_dir.clone()),
        run_dir: run_dir.clone(),
        test_only: true,
        test_all: true,
        ..opts
    };
    let tested = launch(again).unwrap();
    assert_eq!(
        snapshots_in(&tested),
        vec!["network-snapshot-000002.json", "network-snapshot-000004.json"]
    );
    assert_eq!(MetricLedger::read_all(&run_dir, "test_all").unwrap().entries.len(), 2);
    assert!(!run_dir.join("network-snapshot-000006.json").exists());
}

#[test]
fn center_crop_request_fails_before_the_run_dir_exists() {
    let tmp = tempfile::tempdir().unwrap();
    let opts = TrainingOptions { extra_center_crop: true, ..tiny_options(tmp.path()) };
    let run_dir = opts.run_dir.clone();
    assert!(matches!(launch(opts), Err(SegError::NotImplemented(_))));
    assert!(!run_dir.exists());
}

#[test]
fn run_dir_name_clash_is_refused() {
    let tmp = tempfile::tempdir().unwrap();
    let mut opts = tiny_options(tmp.path());
    // Run ids only count directories, so a stray file can hold the name.
    fs::write(&opts.run_dir, "").unwrap();
    assert!(matches!(assign_run_dir(&mut opts, None, None), Err(SegError::RunDirExists(_))));

    fs::remove_file(&opts.run_dir).unwrap();
    fs::create_dir(&opts.run_dir).unwrap();
    assign_run_dir(&mut opts, None, None).unwrap();
    assert_eq!(opts.run_dir.file_name().unwrap(), "00001-DRCreal-gc_aug");
}

struct Fixed(Batch);

impl SegDataset for Fixed {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn load(&self, index: usize) -> synseg::Result<Sample> {
        let b = &self.0;
        Sample::new(
            b.images.sample(index).to_vec(),
            b.masks.sample(index).to_vec(),
            b.images.c(),
            b.images.h(),
            b.images.w(),
        )
    }
}

fn loop_options(run_dir: &Path) -> TrainingOptions {
    TrainingOptions {
        run_dir: run_dir.to_path_buf(),
        batch: 2,
        total_iter: 3,
        niter_per_tick: 2,
        network_snapshot_ticks: None,
        image_snapshot_ticks: None,
        grid_size: (2, 1),
        ..TrainingOptions::default()
    }
}

fn fixed_batch() -> Batch {
    batch_from_masks(LabelBatch::from_vec(2, 2, 2, vec![1, 0, 0, 1, 0, 0, 1, 1]).unwrap())
}

#[test]
fn phases_follow_the_tick_schedule() {
    let dir = tempfile::tempdir().unwrap();
    let batch = fixed_batch();
    let source = Box::new(std::iter::repeat_with(move || Ok::<_, SegError>(batch.clone())));
    let val: Arc<dyn SegDataset> = Arc::new(Fixed(fixed_batch()));

    let mut training =
        TrainingLoop::initialize(loop_options(dir.path()), dir.path(), ThresholdModel::default(), source, val).unwrap();
    assert_eq!(training.phase(), Phase::Running);

    let mut phases = Vec::new();
    while training.phase() != Phase::Stopped {
        phases.push(training.advance().unwrap());
    }
    assert_eq!(
        phases,
        vec![
            Phase::Running,
            Phase::TickMaintenance,
            Phase::Running,
            Phase::TickMaintenance,
            Phase::Stopped
        ]
    );
    assert_eq!(training.state().cur_iter, 3);
    assert_eq!(training.state().cur_tick, 2);
    assert_eq!(StatsWriter::read_all(dir.path()).unwrap().len(), 2);
    assert!(dir.path().join("seg-train_init.png").is_file());
    assert!(MetricLedger::read_all(dir.path(), "val").unwrap().entries.is_empty());
}

#[test]
fn final_tick_always_snapshots_and_periods_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let batch = fixed_batch();
    let source = Box::new(std::iter::repeat_with(move || Ok::<_, SegError>(batch.clone())));
    let val: Arc<dyn SegDataset> = Arc::new(Fixed(fixed_batch()));
    let opts = TrainingOptions {
        total_iter: 5,
        network_snapshot_ticks: Some(5),
        image_snapshot_ticks: Some(3),
        ..loop_options(dir.path())
    };

    let training = TrainingLoop::initialize(opts, dir.path(), ThresholdModel::default(), source, val).unwrap();
    let state = training.run().unwrap();
    assert_eq!((state.cur_iter, state.cur_tick), (5, 3));

    let mut written: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("network-snapshot-") || name.starts_with("seg-train_0"))
        .collect();
    written.sort();
    // Tick 0 is due for both periods; the last tick is due regardless.
    assert_eq!(
        written,
        vec![
            "network-snapshot-000002.json",
            "network-snapshot-000005.json",
            "seg-train_000002.png",
            "seg-train_000005.png"
        ]
    );
    assert!(!dir.path().join("network-snapshot-000004.json").exists());
    assert!(!dir.path().join("seg-train_000004.png").exists());

    let val = MetricLedger::read_all(dir.path(), "val").unwrap();
    assert_eq!(
        snapshots_in(&val.entries),
        vec!["network-snapshot-000002.json", "network-snapshot-000005.json"]
    );
}

/// Like `Fixed`, but sample #1 never decodes.
struct HalfBroken(Batch);

impl SegDataset for HalfBroken {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn load(&self, index: usize) -> synseg::Result<Sample> {
        if index == 1 {
            return Err(SegError::decode(index, "truncated png"));
        }
        Fixed(self.0.clone()).load(index)
    }
}

#[test]
fn decode_failures_are_reported_every_tick() {
    let dir = tempfile::tempdir().unwrap();
    let data: Arc<dyn SegDataset> = Arc::new(HalfBroken(fixed_batch()));
    let failures = FailureCounter::default();
    let source_failures = failures.clone();
    let source = Box::new(std::iter::repeat_with(move || {
        (0..2)
            .map(|i| fetch_with_fallback(data.as_ref(), i, &source_failures))
            .collect::<synseg::Result<Vec<Sample>>>()
            .and_then(|samples| Batch::collate(&samples))
    }));
    let val: Arc<dyn SegDataset> = Arc::new(Fixed(fixed_batch()));

    let training = TrainingLoop::initialize(loop_options(dir.path()), dir.path(), ThresholdModel::default(), source, val)
        .unwrap()
        .with_decode_failures(failures.clone());
    training.run().unwrap();

    // One broken sample per batch: the grid batch, then one per step.
    let stats = StatsWriter::read_all(dir.path()).unwrap();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].scalars["Data/decode_failures"].mean, 3.0);
    assert_eq!(stats[1].scalars["Data/decode_failures"].mean, 4.0);
    assert_eq!(failures.get(), 4);
}

#[test]
fn test_only_never_steps() {
    let dir = tempfile::tempdir().unwrap();
    let batch = fixed_batch();
    let source = Box::new(std::iter::repeat_with(move || Ok::<_, SegError>(batch.clone())));
    let val: Arc<dyn SegDataset> = Arc::new(Fixed(fixed_batch()));
    let opts = TrainingOptions { test_only: true, ..loop_options(dir.path()) };

    let training = TrainingLoop::initialize(opts, dir.path(), ThresholdModel::default(), source, val).unwrap();
    assert_eq!(training.phase(), Phase::Stopped);
    let state = training.run().unwrap();
    assert_eq!(state.cur_iter, 0);
    assert!(state.model.forward_modes.iter().all(|m| *m == synseg::Mode::Eval));
}

#[test]
fn synthetic_split_is_ninety_ten() {
    let tmp = tempfile::tempdir().unwrap();
    write_synthetic(tmp.path(), 15, 8);
    let files = SynSegDataset::list_images(tmp.path()).unwrap();
    let split = files.len() * 9 / 10;
    let train = SynSegDataset::open(tmp.path(), 0..split, 8, 1.0).unwrap();
    let val = SynSegDataset::open(tmp.path(), split..files.len(), 8, 1.0).unwrap();
    assert_eq!((train.len(), val.len()), (13, 2));
}
