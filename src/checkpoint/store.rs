use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::checkpoint::Stateful;
use crate::error::{Result, SegError};

const SNAPSHOT_PREFIX: &str = "network-snapshot-";
const SNAPSHOT_EXT: &str = ".json";
const ITER_KEY: &str = "cur_iter";

/// Location and iteration of a persisted snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRef {
    pub path: PathBuf,
    pub iteration: usize,
}

/// Writes and restores full optimization state in a run directory.
///
/// Each snapshot is one JSON object holding a section per named component
/// plus the iteration counter. Files are named
/// `network-snapshot-<iter:06>.json`, so lexical order is numeric order.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        CheckpointStore { dir: dir.into() }
    }

    pub fn snapshot_name(iteration: usize) -> String {
        format!("{SNAPSHOT_PREFIX}{iteration:06}{SNAPSHOT_EXT}")
    }

    /// Persists every section under its name together with `iteration`.
    ///
    /// The file is written to a temporary sibling first and renamed into
    /// place, so a crash never leaves a half-written snapshot behind.
    pub fn save(&self, sections: &[(&str, &dyn Stateful)], iteration: usize) -> Result<SnapshotRef> {
        let mut root = Map::new();
        for (name, component) in sections {
            root.insert((*name).to_string(), component.state_dict()?);
        }
        root.insert(ITER_KEY.to_string(), Value::from(iteration));

        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(Self::snapshot_name(iteration));
        let tmp = path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(&mut writer, &Value::Object(root))?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        debug!(iter = iteration, path = %path.display(), "saved snapshot");
        Ok(SnapshotRef { path, iteration })
    }

    /// Restores each named target from the snapshot at `path` and returns the
    /// recorded iteration (0 when the snapshot predates the counter).
    pub fn load(path: &Path, targets: &mut [(&str, &mut dyn Stateful)]) -> Result<usize> {
        if !path.is_file() {
            return Err(SegError::SnapshotNotFound(path.to_path_buf()));
        }
        let reader = BufReader::new(File::open(path)?);
        let mut root: Map<String, Value> = match serde_json::from_reader(reader)? {
            Value::Object(map) => map,
            _ => {
                return Err(SegError::CorruptSnapshot {
                    path: path.to_path_buf(),
                    section: "<root>".to_string(),
                })
            }
        };

        for (name, target) in targets.iter_mut() {
            let section = root.remove(*name).ok_or_else(|| SegError::CorruptSnapshot {
                path: path.to_path_buf(),
                section: (*name).to_string(),
            })?;
            target.load_state_dict(section)?;
        }

        let iteration = root
            .get(ITER_KEY)
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(0);
        Ok(iteration)
    }

    /// All snapshot files in `dir`, sorted by file name. A missing directory
    /// has no snapshots.
    pub fn list_snapshots(dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(SNAPSHOT_PREFIX) && name.ends_with(SNAPSHOT_EXT) && entry.path().is_file() {
                found.push(entry.path());
            }
        }
        found.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(found)
    }

    /// Loads the most recent snapshot of `dir` into `targets`.
    pub fn resume_latest(dir: &Path, targets: &mut [(&str, &mut dyn Stateful)]) -> Result<SnapshotRef> {
        let latest = Self::list_snapshots(dir)?
            .pop()
            .ok_or_else(|| SegError::SnapshotNotFound(dir.to_path_buf()))?;
        let iteration = Self::load(&latest, targets)?;
        info!(iter = iteration, path = %latest.display(), "resumed from snapshot");
        Ok(SnapshotRef { path: latest, iteration })
    }
}
