use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::augment::AugPolicy;
use crate::data::{check_center_crop, describe, RealDatasetKind};
use crate::error::{Result, SegError};
use crate::metrics::Metric;
use crate::network::ModelSpec;
use crate::optim::OptimizerKind;

/// Where processed real datasets live when no root is given.
pub const DEFAULT_REAL_ROOT: &str = "datasets_local/DRC_processed";

/// Every knob of a training run.
///
/// Missing JSON fields fall back to the defaults below, so a config file only
/// needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingOptions {
    pub syn_data: PathBuf,
    pub real_data: String,
    pub real_root: Option<PathBuf>,
    pub aug: Option<String>,
    pub extra_center_crop: bool,
    pub resume_from: Option<PathBuf>,
    pub run_dir: PathBuf,
    pub test_only: bool,
    pub test_all: bool,
    pub metrics: Vec<String>,

    pub batch: usize,
    pub total_iter: usize,
    pub lr: f64,
    pub lr_steps: usize,
    pub lr_decay: f64,
    pub optimizer: OptimizerKind,

    pub niter_per_tick: usize,
    pub network_snapshot_ticks: Option<usize>,
    pub image_snapshot_ticks: Option<usize>,

    pub random_seed: u64,
    pub scale: u32,
    pub crop_ratio: f64,
    /// Visualization grid as (columns, rows).
    pub grid_size: (usize, usize),
    /// Batches the training worker may decode ahead.
    pub prefetch_depth: usize,

    pub model: ModelSpec,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        TrainingOptions {
            syn_data: PathBuf::new(),
            real_data: "cub".to_string(),
            real_root: None,
            aug: None,
            extra_center_crop: false,
            resume_from: None,
            run_dir: PathBuf::new(),
            test_only: false,
            test_all: false,
            metrics: ["pACC", "IoU", "mIoU", "DRC_IoU", "DRC_DICE"].map(String::from).to_vec(),
            batch: 64,
            total_iter: 6000,
            lr: 0.001,
            lr_steps: 4000,
            lr_decay: 0.2,
            optimizer: OptimizerKind::Adam,
            niter_per_tick: 20,
            network_snapshot_ticks: Some(50),
            image_snapshot_ticks: Some(50),
            random_seed: 0,
            scale: 128,
            crop_ratio: 1.0,
            grid_size: (7, 32),
            prefetch_depth: 2,
            model: ModelSpec::default(),
        }
    }
}

impl TrainingOptions {
    pub fn load_json(path: &Path) -> Result<TrainingOptions> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn real_kind(&self) -> Result<RealDatasetKind> {
        self.real_data.parse()
    }

    pub fn aug_policy(&self) -> Result<Option<AugPolicy>> {
        self.aug.as_deref().map(str::parse).transpose()
    }

    pub fn real_root(&self) -> Result<PathBuf> {
        let kind = self.real_kind()?;
        Ok(match &self.real_root {
            Some(root) => root.clone(),
            None => Path::new(DEFAULT_REAL_ROOT).join(describe(kind).dir_name),
        })
    }

    /// Checks everything that can be checked without touching the disk.
    pub fn validate(&self) -> Result<()> {
        Metric::parse_all(&self.metrics)?;
        let kind = self.real_kind()?;
        self.aug_policy()?;
        if self.extra_center_crop {
            check_center_crop(kind)?;
        }
        if !(self.crop_ratio > 0.0 && self.crop_ratio <= 1.0) {
            return Err(SegError::config(format!("crop_ratio must be in (0, 1], got {}", self.crop_ratio)));
        }
        if self.batch == 0 || self.niter_per_tick == 0 || self.scale == 0 {
            return Err(SegError::config("batch, niter_per_tick and scale must be positive"));
        }
        if self.network_snapshot_ticks == Some(0) || self.image_snapshot_ticks == Some(0) {
            return Err(SegError::config("snapshot tick periods must be positive"));
        }
        if self.grid_size.0 == 0 || self.grid_size.1 == 0 {
            return Err(SegError::config("grid_size must be positive"));
        }
        if !(self.lr > 0.0) {
            return Err(SegError::config(format!("learning rate must be positive, got {}", self.lr)));
        }
        self.model.validate()
    }
}
