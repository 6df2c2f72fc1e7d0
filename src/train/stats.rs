use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Result;
use crate::ledger::unix_now;

/// Summary of one scalar over a tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalarSummary {
    /// Number of values reported.
    pub n: usize,
    #[serde(deserialize_with = "nan_if_null")]
    pub mean: f64,
    /// Population standard deviation.
    #[serde(deserialize_with = "nan_if_null")]
    pub std: f64,
}

// A diverged loss is written as `null`.
fn nan_if_null<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    n: usize,
    sum: f64,
    sum_sq: f64,
}

/// Collects named scalars between two ticks.
#[derive(Debug, Default)]
pub struct StatsCollector {
    scalars: BTreeMap<String, Accumulator>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, name: &str, value: f64) {
        let acc = self.scalars.entry(name.to_string()).or_default();
        acc.n += 1;
        acc.sum += value;
        acc.sum_sq += value * value;
    }

    /// Summaries of everything reported since the last call; clears the
    /// collector.
    pub fn as_dict(&mut self) -> BTreeMap<String, ScalarSummary> {
        let summaries = self
            .scalars
            .iter()
            .map(|(name, acc)| {
                let n = acc.n as f64;
                let mean = acc.sum / n;
                let var = (acc.sum_sq / n - mean * mean).max(0.0);
                (name.clone(), ScalarSummary { n: acc.n, mean, std: var.sqrt() })
            })
            .collect();
        self.scalars.clear();
        summaries
    }
}

/// One line of `stats.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsLine {
    #[serde(flatten)]
    pub scalars: BTreeMap<String, ScalarSummary>,
    pub timestamp: f64,
}

/// Append-only writer for `stats.jsonl`.
pub struct StatsWriter {
    file: File,
}

impl StatsWriter {
    pub const FILE_NAME: &'static str = "stats.jsonl";

    pub fn open(run_dir: &Path) -> Result<StatsWriter> {
        let file = OpenOptions::new().create(true).append(true).open(run_dir.join(Self::FILE_NAME))?;
        Ok(StatsWriter { file })
    }

    pub fn write(&mut self, scalars: BTreeMap<String, ScalarSummary>) -> Result<()> {
        let line = StatsLine { scalars, timestamp: unix_now() };
        let mut text = serde_json::to_string(&line)?;
        text.push('\n');
        self.file.write_all(text.as_bytes())?;
        self.file.flush()?;
        Ok(())
    }

    /// Reads every line written so far; a missing file yields nothing.
    pub fn read_all(run_dir: &Path) -> Result<Vec<StatsLine>> {
        let path = run_dir.join(Self::FILE_NAME);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| Ok(serde_json::from_str(l)?))
            .collect()
    }
}
