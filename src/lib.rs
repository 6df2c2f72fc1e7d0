pub mod error;
pub mod math;
pub mod activation;
pub mod layers;
pub mod network;
pub mod loss;
pub mod optim;
pub mod checkpoint;
pub mod metrics;
pub mod ledger;
pub mod data;
pub mod augment;
pub mod viz;
pub mod util;
pub mod train;

// Convenience re-exports
pub use error::{Result, SegError};
pub use math::{LabelBatch, Matrix, Tensor4};
pub use activation::ActivationFunction;
pub use layers::Layer;
pub use network::{Mode, ModeGuard, ModelSpec, PatchNet, SegmentationModel};
pub use loss::CrossEntropyLoss;
pub use optim::{Adam, Optimizer, OptimizerKind, Sgd, StepLr};
pub use checkpoint::{CheckpointStore, SnapshotRef, Stateful};
pub use metrics::{evaluate, Metric, MetricResultBundle};
pub use ledger::{LedgerEntry, LedgerHistory, MetricLedger};
pub use data::{Batch, RealDataset, RealDatasetKind, SegDataset, SynSegDataset};
pub use train::{launch, TrainingLoop, TrainingOptions};
