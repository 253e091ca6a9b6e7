//! Append-only CSV telemetry.
//!
//! Three sinks: accepted regressions, per-round ratio improvements, and
//! individual strategy invocations. Telemetry is advisory; every write
//! failure is logged at warn level and otherwise ignored so a full disk
//! never aborts a long fuzzing session.

use crate::mutate::StrategyKind;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::warn;

const ACCEPTED_FILE: &str = "accepted.csv";
const IMPROVEMENTS_FILE: &str = "improvements.csv";
const STRATEGIES_FILE: &str = "strategies.csv";

/// CSV sinks rooted at one output directory.
#[derive(Debug, Clone)]
pub struct Analytics {
    dir: PathBuf,
}

impl Analytics {
    /// Create sinks under `dir`. Files are created lazily on first append.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Record one accepted regression.
    pub fn record_accepted(&self, file: &Path, ratio: f64, compiler: &str, round: u64) {
        let timestamp = humantime::format_rfc3339_seconds(SystemTime::now()).to_string();
        self.append(
            ACCEPTED_FILE,
            &["file", "ratio", "compiler", "round", "timestamp"],
            &[
                &file.display().to_string(),
                &format!("{ratio}"),
                compiler,
                &round.to_string(),
                &timestamp,
            ],
        );
    }

    /// Record a ratio improvement on one candidate.
    pub fn record_improvement(&self, file: &Path, new_ratio: f64, old_ratio: f64, strategy: StrategyKind) {
        self.append(
            IMPROVEMENTS_FILE,
            &["file", "new_ratio", "old_ratio", "strategy"],
            &[
                &file.display().to_string(),
                &format!("{new_ratio}"),
                &format!("{old_ratio}"),
                &strategy.to_string(),
            ],
        );
    }

    /// Record one mutation-strategy invocation and the value it produced.
    pub fn record_strategy(&self, strategy: StrategyKind, value: &str) {
        self.append(
            STRATEGIES_FILE,
            &["strategy", "value"],
            &[&strategy.to_string(), value],
        );
    }

    /// Append one record, writing the header when the file is new.
    fn append(&self, name: &str, header: &[&str], record: &[&str]) {
        if let Err(e) = self.try_append(name, header, record) {
            warn!(file = name, error = %e, "analytics write failed");
        }
    }

    fn try_append(&self, name: &str, header: &[&str], record: &[&str]) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        let is_new = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new().from_writer(file);
        if is_new {
            writer.write_record(header)?;
        }
        writer.write_record(record)?;
        writer.flush()?;
        Ok(())
    }
}
