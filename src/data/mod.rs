pub mod dataset;
pub mod image_io;
pub mod real;
pub mod sample;
pub mod stream;
pub mod synthetic;

pub use dataset::{fetch_with_fallback, FailureCounter, SegDataset};
pub use real::{check_center_crop, describe, DataSplit, DatasetLayout, IndexSource, RealDataset, RealDatasetKind};
pub use sample::{Batch, Sample};
pub use stream::{EvalStream, InfiniteSampler, TrainStream};
pub use synthetic::SynSegDataset;
