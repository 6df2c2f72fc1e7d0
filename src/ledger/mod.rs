use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SegError};
use crate::metrics::engine::{nullable_scores, MetricResultBundle};

/// One evaluation result as stored in `metric-<split>.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(deserialize_with = "nullable_scores")]
    pub results: BTreeMap<String, f64>,
    pub metrics: Vec<String>,
    pub total_time: f64,
    pub total_time_str: String,
    /// Snapshot path relative to the run directory.
    pub snapshot_pth: Option<String>,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

impl LedgerEntry {
    pub fn new(bundle: MetricResultBundle, snapshot: Option<String>) -> LedgerEntry {
        LedgerEntry {
            results: bundle.results,
            metrics: bundle.metrics,
            total_time: bundle.total_time,
            total_time_str: bundle.total_time_str,
            snapshot_pth: snapshot,
            timestamp: unix_now(),
        }
    }

    pub fn score(&self, metric: &str) -> Option<f64> {
        self.results.get(metric).copied().filter(|v| !v.is_nan())
    }
}

pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Path of `snapshot` as recorded in the ledger: relative to `run_dir` when
/// it lives inside it.
pub fn snapshot_reference(run_dir: &Path, snapshot: &Path) -> String {
    snapshot
        .strip_prefix(run_dir)
        .unwrap_or(snapshot)
        .to_string_lossy()
        .into_owned()
}

/// Append-only writer for one split of a run.
pub struct MetricLedger {
    file: File,
}

impl MetricLedger {
    pub fn file_path(run_dir: &Path, split: &str) -> PathBuf {
        run_dir.join(format!("metric-{split}.jsonl"))
    }

    pub fn open(run_dir: &Path, split: &str) -> Result<MetricLedger> {
        let path = Self::file_path(run_dir, split);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(MetricLedger { file })
    }

    /// Writes `entry` as a single line and flushes it before returning.
    pub fn append(&mut self, entry: &LedgerEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        report(&line);
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        Ok(())
    }

    /// Every entry of `split` in file order; a missing file reads as empty.
    pub fn read_all(run_dir: &Path, split: &str) -> Result<LedgerHistory> {
        let path = Self::file_path(run_dir, split);
        let entries = match fs::read_to_string(&path) {
            Ok(text) => text
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(serde_json::from_str)
                .collect::<std::result::Result<Vec<LedgerEntry>, _>>()?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(LedgerHistory { path, entries })
    }
}

/// Echoes a ledger line to the log.
pub fn report(line: &str) {
    info!(target: "synseg::ledger", "{line}");
}

/// Entries read back from one ledger file.
#[derive(Debug, Clone)]
pub struct LedgerHistory {
    pub path: PathBuf,
    pub entries: Vec<LedgerEntry>,
}

impl LedgerHistory {
    /// Entry with the highest `metric` among those tied to a snapshot.
    ///
    /// The scan is stable, so the earliest of equal maxima wins. Entries
    /// where the metric is missing or NaN never win.
    pub fn best_by(&self, metric: &str) -> Result<(usize, &LedgerEntry)> {
        let mut candidates = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.snapshot_pth.is_some())
            .peekable();
        if candidates.peek().is_none() {
            return Err(SegError::EmptyLedger(self.path.clone()));
        }

        let mut best: Option<(usize, &LedgerEntry, f64)> = None;
        for (i, entry) in candidates {
            let Some(score) = entry.score(metric) else {
                continue;
            };
            if best.map_or(true, |(_, _, top)| score > top) {
                best = Some((i, entry, score));
            }
        }
        best.map(|(i, e, _)| (i, e))
            .ok_or_else(|| SegError::MetricUnavailable(metric.to_string()))
    }

    /// Distinct snapshot references, sorted.
    pub fn all_checkpoint_references(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter_map(|e| e.snapshot_pth.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(iou: f64, snapshot: Option<&str>) -> LedgerEntry {
        let mut results = BTreeMap::new();
        results.insert("IoU".to_string(), iou);
        LedgerEntry {
            results,
            metrics: vec!["IoU".to_string()],
            total_time: 0.0,
            total_time_str: "0s".to_string(),
            snapshot_pth: snapshot.map(str::to_string),
            timestamp: 0.0,
        }
    }

    fn history(entries: Vec<LedgerEntry>) -> LedgerHistory {
        LedgerHistory { path: PathBuf::from("metric-val.jsonl"), entries }
    }

    #[test]
    fn first_maximum_wins() {
        let h = history(vec![entry(0.5, Some("a")), entry(0.7, Some("b")), entry(0.7, Some("c"))]);
        let (idx, best) = h.best_by("IoU").unwrap();
        assert_eq!(idx, 1);
        assert_eq!(best.snapshot_pth.as_deref(), Some("b"));
    }

    #[test]
    fn entries_without_snapshot_or_value_are_skipped() {
        let h = history(vec![entry(0.9, None), entry(f64::NAN, Some("a")), entry(0.1, Some("b"))]);
        assert_eq!(h.best_by("IoU").unwrap().0, 2);
        assert!(matches!(h.best_by("mIoU"), Err(SegError::MetricUnavailable(_))));
        assert!(matches!(history(vec![entry(0.9, None)]).best_by("IoU"), Err(SegError::EmptyLedger(_))));
    }

    #[test]
    fn references_are_distinct_and_sorted() {
        let h = history(vec![entry(0.1, Some("b")), entry(0.2, None), entry(0.3, Some("a")), entry(0.4, Some("b"))]);
        assert_eq!(h.all_checkpoint_references(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn nested_snapshot_reference_is_relative() {
        let run = Path::new("/runs/00001");
        assert_eq!(snapshot_reference(run, &run.join("network-snapshot-000020.json")), "network-snapshot-000020.json");
    }
}
