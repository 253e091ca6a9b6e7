//! Seed corpus loading.
//!
//! Walks a directory tree for C files, parameterizes each one, and keeps
//! only templates the search can actually fuzz. Unusable seeds are logged
//! and skipped, never fatal to the run.

use crate::template::{parameterize, Template};
use bloat_common::error::{FuzzError, FuzzResult};
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Load all fuzzable templates under `dir`.
///
/// Files are decoded lossily (seed corpora routinely contain non-UTF-8
/// bytes in comments); unreadable files are skipped with a log line.
///
/// # Errors
///
/// Returns an error only when the corpus directory itself is missing.
pub fn load_corpus(dir: &Path, max_source_lines: usize) -> FuzzResult<Vec<Template>> {
    if !dir.is_dir() {
        return Err(FuzzError::Corpus(format!(
            "seed directory {} does not exist",
            dir.display()
        )));
    }

    let mut templates = Vec::new();
    let mut scanned = 0usize;

    for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().map_or(true, |ext| ext != "c") {
            continue;
        }
        scanned += 1;

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "failed to read seed");
                continue;
            }
        };
        let source = String::from_utf8_lossy(&bytes);

        let Some(template) = parameterize(path, &source, max_source_lines) else {
            continue;
        };
        if !template.is_fuzzable() {
            debug!(
                path = %path.display(),
                inputs = template.inputs.len(),
                "skipping template with unresolved input types"
            );
            continue;
        }
        templates.push(template);
    }

    info!(
        scanned,
        fuzzable = templates.len(),
        dir = %dir.display(),
        "seed corpus loaded"
    );
    Ok(templates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_seed(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_load_corpus_filters_unusable_seeds() {
        let dir = tempfile::tempdir().unwrap();
        write_seed(
            dir.path(),
            "good.c",
            "int a = 0;\nint main() { return a; }\n",
        );
        write_seed(dir.path(), "no_main.c", "int a = 0;\n");
        write_seed(
            dir.path(),
            "untyped.c",
            "int main() {\n    x = 1;\n    return 0;\n}\n",
        );
        write_seed(dir.path(), "notes.txt", "int main() {}\n");

        let templates = load_corpus(dir.path(), 500).unwrap();
        assert_eq!(templates.len(), 1);
        assert!(templates[0].path.ends_with("good.c"));
    }

    #[test]
    fn test_load_corpus_recurses() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        write_seed(
            &dir.path().join("sub"),
            "nested.c",
            "int a = 1;\nint main() { return a; }\n",
        );
        let templates = load_corpus(dir.path(), 500).unwrap();
        assert_eq!(templates.len(), 1);
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(load_corpus(&missing, 500).is_err());
    }
}
