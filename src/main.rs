use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use synseg::train::{assign_run_dir, launch, TrainingOptions};

/// Train a segmentation network on synthetic data and test it on real images.
#[derive(Parser, Debug)]
#[command(name = "synseg", version, about)]
struct Cli {
    /// Synthetic dataset root holding `img/` and `mask/`; runs are created inside it
    #[arg(long, value_name = "DIR")]
    syn_data: PathBuf,

    /// Real dataset to test on: cub, dog, car or sss
    #[arg(long)]
    real_data: String,

    /// Directory of the processed real dataset
    #[arg(long, value_name = "DIR")]
    real_root: Option<PathBuf>,

    /// Augmentation policy: geom, color or gc
    #[arg(long)]
    aug: Option<String>,

    /// Extra evaluation on a center-cropped test split
    #[arg(long)]
    extra_center_crop: bool,

    /// Run directory to continue from its latest snapshot
    #[arg(long, value_name = "DIR")]
    resume_from: Option<PathBuf>,

    /// Skip training and only test
    #[arg(long)]
    test_only: bool,

    /// Test every intermediate checkpoint instead of the best one
    #[arg(long)]
    test_all: bool,

    /// Image side length [default: 128]
    #[arg(long)]
    scale: Option<u32>,

    /// Center-crop ratio of synthetic images [default: 1.0]
    #[arg(long)]
    crop_ratio: Option<f64>,

    /// Random seed [default: 0]
    #[arg(long)]
    seed: Option<u64>,

    /// JSON file with training options; flags take precedence
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Total optimization steps
    #[arg(long)]
    total_iter: Option<usize>,

    /// Batch size
    #[arg(long)]
    batch: Option<usize>,

    /// Print training options and exit
    #[arg(short = 'n', long)]
    dry_run: bool,
}

impl Cli {
    fn into_options(self) -> anyhow::Result<(TrainingOptions, Option<u32>, Option<f64>)> {
        let mut opts = match &self.config {
            Some(path) => TrainingOptions::load_json(path)
                .with_context(|| format!("reading options from {}", path.display()))?,
            None => TrainingOptions::default(),
        };
        opts.syn_data = self.syn_data;
        opts.real_data = self.real_data;
        if self.real_root.is_some() {
            opts.real_root = self.real_root;
        }
        if self.aug.is_some() {
            opts.aug = self.aug;
        }
        opts.extra_center_crop |= self.extra_center_crop;
        if self.resume_from.is_some() {
            opts.resume_from = self.resume_from;
        }
        opts.test_only |= self.test_only;
        opts.test_all |= self.test_all;
        if let Some(scale) = self.scale {
            opts.scale = scale;
        }
        if let Some(ratio) = self.crop_ratio {
            opts.crop_ratio = ratio;
        }
        if let Some(seed) = self.seed {
            opts.random_seed = seed;
        }
        if let Some(total_iter) = self.total_iter {
            opts.total_iter = total_iter;
        }
        if let Some(batch) = self.batch {
            opts.batch = batch;
        }
        Ok((opts, self.scale, self.crop_ratio))
    }
}

/// Human-readable stderr output plus `log.txt` in the run directory.
fn init_tracing(run_dir: &Path) -> WorkerGuard {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    let appender = tracing_appender::rolling::never(run_dir, "log.txt");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(EnvFilter::new("info"));

    tracing_subscriber::registry().with(stderr_layer).with(file_layer).init();
    guard
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let dry_run = cli.dry_run;
    let (mut opts, scale, crop_ratio) = cli.into_options()?;

    opts.validate().context("invalid training options")?;
    assign_run_dir(&mut opts, scale, crop_ratio).context("choosing the run directory")?;

    println!();
    println!("Training options:");
    println!("{}", serde_json::to_string_pretty(&opts)?);
    println!();
    println!("Output directory:   {}", opts.run_dir.display());
    println!();

    if dry_run {
        println!("Dry run; exiting.");
        return Ok(());
    }

    std::fs::create_dir_all(&opts.run_dir)
        .with_context(|| format!("creating {}", opts.run_dir.display()))?;
    let _guard = init_tracing(&opts.run_dir);

    let run_dir = opts.run_dir.clone();
    let entries = launch(opts).with_context(|| format!("run in {} failed", run_dir.display()))?;
    for entry in &entries {
        let results = serde_json::to_string(&entry.results)?;
        tracing::info!(snapshot = entry.snapshot_pth.as_deref().unwrap_or("-"), %results, "test result");
    }
    Ok(())
}
