//! Error types for the synseg crate.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for training, evaluation and run bookkeeping.
#[derive(Debug, Error)]
pub enum SegError {
    #[error("unsupported metric: {0}")]
    UnsupportedMetric(String),

    #[error("unknown real dataset: {0} (expected one of cub, dog, car, sss)")]
    UnknownDataset(String),

    #[error("unknown augmentation policy: {0} (expected one of geom, color, gc)")]
    UnknownAugment(String),

    #[error("run directory already exists: {}", .0.display())]
    RunDirExists(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to decode sample #{index}: {reason}")]
    Decode { index: usize, reason: String },

    #[error("no snapshot found in {}", .0.display())]
    SnapshotNotFound(PathBuf),

    #[error("snapshot {} is missing section `{section}`", .path.display())]
    CorruptSnapshot { path: PathBuf, section: String },

    #[error("metric ledger {} has no checkpoint entries", .0.display())]
    EmptyLedger(PathBuf),

    #[error("no ledger entry carries a comparable value for `{0}`")]
    MetricUnavailable(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("data worker disconnected: {0}")]
    WorkerDisconnected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl SegError {
    pub fn decode(index: usize, reason: impl ToString) -> Self {
        Self::Decode { index, reason: reason.to_string() }
    }

    pub fn shape(msg: impl Into<String>) -> Self {
        Self::ShapeMismatch(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, SegError>;
