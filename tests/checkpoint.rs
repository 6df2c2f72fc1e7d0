mod common;

use std::fs;

use rand::rngs::StdRng;
use rand::SeedableRng;

use synseg::checkpoint::CheckpointStore;
use synseg::loss::CrossEntropyLoss;
use synseg::math::{LabelBatch, Tensor4};
use synseg::network::{ModelSpec, PatchNet, SegmentationModel};
use synseg::train::{TrainingOptions, TrainingState};
use synseg::SegError;

fn images() -> Tensor4 {
    let data = (0..2 * 3 * 4 * 4).map(|i| ((i * 37 % 17) as f64 / 8.0) - 1.0).collect();
    Tensor4::from_vec([2, 3, 4, 4], data).unwrap()
}

fn state(seed: u64) -> TrainingState<PatchNet> {
    let opts = TrainingOptions { lr: 0.01, lr_steps: 2, ..TrainingOptions::default() };
    let model = PatchNet::new(ModelSpec::default(), &mut StdRng::seed_from_u64(seed)).unwrap();
    TrainingState::new(model, &opts)
}

fn train_steps(state: &mut TrainingState<PatchNet>, steps: usize) {
    let x = images();
    let targets = LabelBatch::from_vec(2, 4, 4, (0..32).map(|i| (i % 3 == 0) as u8).collect()).unwrap();
    for _ in 0..steps {
        let logits = state.model.forward(&x).unwrap();
        let (_, grad) = CrossEntropyLoss::loss_and_grad(&logits, &targets).unwrap();
        let grads = state.model.backward(&grad).unwrap();
        state.optimizer.step(state.model.parameters_mut(), &grads).unwrap();
        let lr = state.schedule.step();
        state.optimizer.set_learning_rate(lr);
        state.cur_iter += 1;
    }
}

#[test]
fn restored_snapshot_gives_identical_logits_and_continues_identically() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());

    let mut original = state(1);
    train_steps(&mut original, 3);
    let snap = store.save(&original.sections(), original.cur_iter).unwrap();
    assert_eq!(snap.iteration, 3);

    let mut restored = state(2);
    restored.resume_latest(dir.path()).unwrap();
    assert_eq!(restored.cur_iter, 3);
    assert_eq!(restored.optimizer, original.optimizer);
    assert_eq!(restored.schedule, original.schedule);

    let x = images();
    assert_eq!(original.model.predict(&x).unwrap(), restored.model.predict(&x).unwrap());
    assert_eq!(original.model.forward(&x).unwrap(), restored.model.forward(&x).unwrap());

    // Adam moments came along, so the next updates match too.
    train_steps(&mut original, 2);
    train_steps(&mut restored, 2);
    assert_eq!(original.model.forward(&x).unwrap(), restored.model.forward(&x).unwrap());
}

#[test]
fn resume_picks_the_newest_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    let mut s = state(1);
    for _ in 0..3 {
        train_steps(&mut s, 1);
        store.save(&s.sections(), s.cur_iter).unwrap();
    }
    fs::write(dir.path().join("training_options.json"), "{}").unwrap();

    let snapshots = CheckpointStore::list_snapshots(dir.path()).unwrap();
    assert_eq!(snapshots.len(), 3);

    let mut fresh = state(5);
    let snap = fresh.resume_latest(dir.path()).unwrap();
    assert_eq!(snap.iteration, 3);
    assert_eq!(snap.path, dir.path().join("network-snapshot-000003.json"));
}

#[test]
fn snapshot_of_another_architecture_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    let s = state(1);
    store.save(&s.sections(), 0).unwrap();

    let opts = TrainingOptions::default();
    let spec = ModelSpec { patch_radius: 2, ..ModelSpec::default() };
    let model = PatchNet::new(spec, &mut StdRng::seed_from_u64(0)).unwrap();
    let mut other = TrainingState::new(model, &opts);
    assert!(matches!(other.resume_latest(dir.path()), Err(SegError::InvalidState(_))));
}

#[test]
fn snapshot_without_optimizer_section_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let s = state(1);
    let model = serde_json::to_value(&s.model).unwrap();
    let path = dir.path().join(CheckpointStore::snapshot_name(10));
    fs::write(&path, serde_json::json!({ "cur_iter": 10, "model": model }).to_string()).unwrap();

    let mut target = state(2);
    let err = target.restore(&path).unwrap_err();
    assert!(matches!(err, SegError::CorruptSnapshot { section, .. } if section == "opt"));
}

#[test]
fn resuming_an_empty_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut s = state(1);
    assert!(matches!(s.resume_latest(dir.path()), Err(SegError::SnapshotNotFound(_))));
}
