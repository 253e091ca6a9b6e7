//! Report files for accepted regressions.
//!
//! Every accepted result yields two files in the output directory: the
//! materialized mutant source, prefixed by a machine-readable ratio line,
//! and a unified diff against the original seed. The ratio line format is
//! `file, currentId, minId, currentCount, minCount, ratio` and is what
//! downstream triage tooling parses.

use crate::oracle::{CompileResult, CURRENT_KEY};
use bloat_common::error::{FuzzError, FuzzResult};
use similar::TextDiff;
use std::path::{Path, PathBuf};
use tracing::info;

/// Writes accepted-result artifacts into one output directory.
#[derive(Debug)]
pub struct ReportWriter {
    dir: PathBuf,
    current_id: String,
    counter: u64,
}

impl ReportWriter {
    /// Create a writer rooted at `dir`. `current_id` names the current
    /// compiler in ratio lines (its line count is keyed anonymously in
    /// [`CompileResult::line_counts`]).
    pub fn new(dir: impl Into<PathBuf>, current_id: &str) -> Self {
        Self {
            dir: dir.into(),
            current_id: current_id.to_string(),
            counter: 0,
        }
    }

    /// Write the mutant source and diff for one accepted result. Returns
    /// the path of the mutant file.
    ///
    /// # Errors
    ///
    /// Returns an error when the output directory or either file cannot be
    /// written.
    pub fn write(&mut self, result: &CompileResult) -> FuzzResult<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| FuzzError::Report(format!("failed to create {}: {e}", self.dir.display())))?;

        let stem = result
            .source_path
            .file_stem()
            .map_or_else(|| "mutant".to_string(), |s| s.to_string_lossy().into_owned());
        self.counter += 1;
        let base = format!("{stem}_{:04}", self.counter);

        let mutant_path = self.dir.join(format!("{base}.c"));
        let body = format!("{}\n{}", self.ratio_line(result), result.source_text);
        std::fs::write(&mutant_path, body).map_err(|e| {
            FuzzError::Report(format!("failed to write {}: {e}", mutant_path.display()))
        })?;

        let diff_path = self.dir.join(format!("{base}.diff"));
        std::fs::write(&diff_path, self.unified_diff(result)).map_err(|e| {
            FuzzError::Report(format!("failed to write {}: {e}", diff_path.display()))
        })?;

        info!(
            mutant = %mutant_path.display(),
            ratio = result.ratio(),
            "regression report written"
        );
        Ok(mutant_path)
    }

    /// `file, currentId, minId, currentCount, minCount, ratio`
    fn ratio_line(&self, result: &CompileResult) -> String {
        let (ratio, min_id) = result
            .max_ratio
            .as_ref()
            .map_or((0.0, ""), |entry| (entry.ratio, entry.compiler.as_str()));
        let current_count = result.line_counts.get(CURRENT_KEY).copied().unwrap_or(0);
        let min_count = result.line_counts.get(min_id).copied().unwrap_or(0);
        format!(
            "// {}, {}, {}, {}, {}, {}",
            result.source_path.display(),
            self.current_id,
            min_id,
            current_count,
            min_count,
            ratio
        )
    }

    /// Unified diff of the original seed against the mutant. When the seed
    /// is no longer readable the diff degrades to the mutant alone.
    fn unified_diff(&self, result: &CompileResult) -> String {
        let original = std::fs::read(&result.source_path)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default();
        TextDiff::from_lines(&original, &result.source_text)
            .unified_diff()
            .context_radius(3)
            .header("original", "mutant")
            .to_string()
    }
}
