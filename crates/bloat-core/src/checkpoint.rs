//! Accepted-result persistence for resumable sessions.
//!
//! The checkpoint is a JSON list of accepted [`CompileResult`]s. Loading
//! tolerates a missing file so a fresh run and a resumed run share one code
//! path; saving goes through a temp file and rename so an interrupt never
//! leaves a half-written checkpoint behind.

use crate::oracle::CompileResult;
use bloat_common::error::{FuzzError, FuzzResult};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Handle on one checkpoint file.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    /// Create a store backed by `path`. The file need not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the accepted-results set, or an empty set when the checkpoint
    /// file does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed;
    /// a corrupt checkpoint should be surfaced, not silently discarded.
    pub fn load(&self) -> FuzzResult<Vec<CompileResult>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no checkpoint, starting fresh");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(FuzzError::Checkpoint(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };
        let results: Vec<CompileResult> = serde_json::from_str(&text).map_err(|e| {
            FuzzError::Checkpoint(format!("failed to parse {}: {e}", self.path.display()))
        })?;
        info!(
            path = %self.path.display(),
            accepted = results.len(),
            "checkpoint loaded"
        );
        Ok(results)
    }

    /// Atomically replace the checkpoint with `results`.
    ///
    /// # Errors
    ///
    /// Returns an error when serialization or any filesystem step fails.
    pub fn save(&self, results: &[CompileResult]) -> FuzzResult<()> {
        let text = serde_json::to_string_pretty(results)
            .map_err(|e| FuzzError::Checkpoint(format!("failed to serialize: {e}")))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    FuzzError::Checkpoint(format!("failed to create {}: {e}", parent.display()))
                })?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(|e| {
            FuzzError::Checkpoint(format!("failed to write {}: {e}", tmp.display()))
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            FuzzError::Checkpoint(format!("failed to rename into {}: {e}", self.path.display()))
        })?;
        debug!(path = %self.path.display(), accepted = results.len(), "checkpoint saved");
        Ok(())
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutate::StrategyKind;
    use crate::oracle::CURRENT_KEY;
    use std::collections::BTreeMap;

    fn sample_result(path: &str, ratio: f64) -> CompileResult {
        let mut counts = BTreeMap::new();
        counts.insert(CURRENT_KEY.to_string(), 30);
        counts.insert("gcc-10".to_string(), 10);
        CompileResult {
            source_path: PathBuf::from(path),
            source_text: "int main() { return 0; }\n".to_string(),
            line_counts: counts,
            max_ratio: Some(crate::oracle::RatioEntry {
                ratio,
                compiler: "gcc-10".to_string(),
            }),
            asan_checked: true,
            strategy: StrategyKind::Random,
            diagnostic: None,
        }
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        let results = vec![sample_result("a.c", 3.0), sample_result("b.c", 2.5)];
        store.save(&results).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].source_path, PathBuf::from("a.c"));
        assert!((loaded[1].ratio() - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("nested/deep/checkpoint.json"));
        store.save(&[sample_result("a.c", 2.0)]).unwrap();
        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(CheckpointStore::new(path).load().is_err());
    }
}
