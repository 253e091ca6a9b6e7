//! Differential compilation oracle.
//!
//! Materializes a candidate, compiles it to assembly with the current
//! compiler and every configured older version, measures codegen size as a
//! filtered assembly line count, and computes the regression ratio. Also
//! hosts the ASAN/UBSAN safety gate that rejects regressions caused by
//! undefined behavior.
//!
//! Compiler invocations are failure-prone by design: timeouts, diagnostics,
//! and spawn errors all collapse to a zero line count for that compiler,
//! excluding it from the ratio rather than aborting the candidate.

use crate::mutate::StrategyKind;
use crate::template::{Input, Template};
use bloat_common::config::FuzzConfig;
use bloat_common::error::{FuzzError, FuzzResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Map key identifying the current compiler in [`CompileResult::line_counts`].
pub const CURRENT_KEY: &str = "last";

/// A self-contained candidate description handed to a worker.
#[derive(Debug, Clone)]
pub struct CandidateJob {
    /// The template being fuzzed.
    pub template: Arc<Template>,
    /// Concrete input values for this candidate.
    pub inputs: Vec<Input>,
    /// The strategy that produced the most recent mutation, for telemetry.
    pub strategy: StrategyKind,
}

/// The regression ratio and which older compiler produced its denominator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioEntry {
    /// Current-compiler line count divided by the smallest older count.
    pub ratio: f64,
    /// The older compiler that achieved the smallest count.
    pub compiler: String,
}

/// Oracle output for one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileResult {
    /// Path of the seed file this mutant derives from.
    pub source_path: PathBuf,
    /// Materialized C source, kept for diffing and replay.
    pub source_text: String,
    /// Non-comment, non-directive assembly line count per compiler.
    pub line_counts: BTreeMap<String, usize>,
    /// Regression ratio, when at least two compilers produced non-zero counts.
    pub max_ratio: Option<RatioEntry>,
    /// Whether the sanitizer gate ran for this result.
    pub asan_checked: bool,
    /// The mutation strategy that produced this candidate.
    pub strategy: StrategyKind,
    /// Sanitizer or filesystem diagnostic, if any.
    pub diagnostic: Option<String>,
}

impl CompileResult {
    /// The regression ratio, or 0 when not comparable.
    pub fn ratio(&self) -> f64 {
        self.max_ratio.as_ref().map_or(0.0, |entry| entry.ratio)
    }

    /// A result whose current-compiler count is zero is invalid and must
    /// never be reported as interesting, regardless of older counts.
    pub fn is_valid(&self) -> bool {
        self.line_counts.get(CURRENT_KEY).copied().unwrap_or(0) > 0
    }

    /// The interestingness predicate: the ratio exceeds `threshold`.
    pub fn is_interesting(&self, threshold: f64) -> bool {
        self.is_valid() && self.ratio() > threshold
    }
}

/// Why one compiler invocation produced no usable count.
///
/// Callers decide locally how each kind affects comparability; none of
/// these abort the candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileFailure {
    /// The compiler exceeded its deadline ("too expensive to judge").
    Timeout,
    /// The compiler wrote diagnostics; source and output are persisted
    /// for offline triage.
    DiagnosticOutput(String),
    /// The process could not be spawned or its output could not be read.
    SpawnFailure(String),
}

/// Seam between the search controller and the real toolchain, so the
/// search logic can be exercised with a scripted oracle.
pub trait CompileOracle: Send + Sync {
    /// Compile the candidate with every configured compiler and compute
    /// the size ratio.
    fn compile(&self, job: &CandidateJob) -> CompileResult;

    /// Run the sanitizer gate on an interesting result. Marks the result
    /// as checked and records the diagnostic on rejection.
    fn verify_safe(&self, result: &mut CompileResult) -> bool;
}

/// The real toolchain-backed oracle.
pub struct Oracle {
    current: String,
    older: Vec<String>,
    flags: Vec<String>,
    scratch: TempDir,
    triage_dir: PathBuf,
    compile_timeout: Duration,
    run_timeout: Duration,
}

impl Oracle {
    /// Create an oracle with its scratch directory.
    ///
    /// # Errors
    ///
    /// Failing to create the scratch or triage directory is resource
    /// exhaustion and fatal to the run.
    pub fn new(current: &str, older: &[String], config: &FuzzConfig) -> FuzzResult<Self> {
        let scratch = TempDir::new()
            .map_err(|e| FuzzError::Scratch(format!("failed to create scratch dir: {e}")))?;
        let triage_dir = config.output_dir.join("triage");
        std::fs::create_dir_all(&triage_dir)
            .map_err(|e| FuzzError::Scratch(format!("failed to create triage dir: {e}")))?;
        Ok(Self {
            current: current.to_string(),
            older: older.to_vec(),
            flags: config.compile_flags(),
            scratch,
            triage_dir,
            compile_timeout: config.compile_timeout,
            run_timeout: config.run_timeout,
        })
    }

    /// Write materialized source to a collision-avoided scratch path.
    fn write_scratch(&self, seed: &Path, source: &str) -> std::io::Result<PathBuf> {
        let stem = seed
            .file_stem()
            .map_or_else(|| "candidate".to_string(), |s| s.to_string_lossy().into_owned());
        let path = unique_path(self.scratch.path(), &stem)?;
        std::fs::write(&path, source)?;
        Ok(path)
    }

    /// Compile one source with one compiler and count assembly lines.
    fn compile_to_asm(&self, compiler: &str, src: &Path) -> Result<usize, CompileFailure> {
        let asm_path = src.with_extension("s");
        let mut cmd = Command::new(compiler);
        cmd.arg(src)
            .arg("-S")
            .arg("-o")
            .arg(&asm_path)
            .args(&self.flags);

        let outcome = run_with_timeout(cmd, self.compile_timeout)
            .map_err(|e| CompileFailure::SpawnFailure(e.to_string()))?;
        if outcome.timed_out {
            let _ = std::fs::remove_file(&asm_path);
            return Err(CompileFailure::Timeout);
        }
        if !outcome.stderr.trim().is_empty() {
            let _ = std::fs::remove_file(&asm_path);
            return Err(CompileFailure::DiagnosticOutput(outcome.stderr));
        }
        let asm = std::fs::read_to_string(&asm_path)
            .map_err(|e| CompileFailure::SpawnFailure(format!("missing assembly output: {e}")))?;
        let _ = std::fs::remove_file(&asm_path);
        Ok(count_asm_lines(&asm))
    }

    /// Count for one compiler, folding failures into 0 per the error model.
    fn measured_count(&self, compiler: &str, src: &Path, source: &str) -> usize {
        match self.compile_to_asm(compiler, src) {
            Ok(count) => count,
            Err(CompileFailure::Timeout) => {
                debug!(compiler, src = %src.display(), "compile timed out");
                0
            }
            Err(CompileFailure::DiagnosticOutput(stderr)) => {
                self.persist_triage(src, compiler, source, &stderr);
                0
            }
            Err(CompileFailure::SpawnFailure(message)) => {
                warn!(compiler, message, "compiler invocation failed");
                0
            }
        }
    }

    /// Persist a failing mutant plus its diagnostic for offline triage.
    fn persist_triage(&self, src: &Path, compiler: &str, source: &str, stderr: &str) {
        let stem = src
            .file_stem()
            .map_or_else(|| "candidate".to_string(), |s| s.to_string_lossy().into_owned());
        let sanitized = compiler.replace(['/', '\\'], "_");
        let path = self.triage_dir.join(format!("{stem}_{sanitized}.err"));
        let body = format!("/* compiler: {compiler} */\n{source}\n/* diagnostic:\n{stderr}\n*/\n");
        if let Err(e) = std::fs::write(&path, body) {
            warn!(path = %path.display(), error = %e, "failed to persist triage file");
        }
    }
}

impl CompileOracle for Oracle {
    fn compile(&self, job: &CandidateJob) -> CompileResult {
        let source_text = job.template.materialize(&job.inputs);
        let mut result = CompileResult {
            source_path: job.template.path.clone(),
            source_text,
            line_counts: BTreeMap::new(),
            max_ratio: None,
            asan_checked: false,
            strategy: job.strategy,
            diagnostic: None,
        };

        let src = match self.write_scratch(&job.template.path, &result.source_text) {
            Ok(path) => path,
            Err(e) => {
                warn!(seed = %job.template.path.display(), error = %e, "scratch write failed");
                result.diagnostic = Some(e.to_string());
                result.line_counts.insert(CURRENT_KEY.to_string(), 0);
                return result;
            }
        };

        let current = self.measured_count(&self.current, &src, &result.source_text);
        result
            .line_counts
            .insert(CURRENT_KEY.to_string(), current);
        for compiler in &self.older {
            let count = self.measured_count(compiler, &src, &result.source_text);
            result.line_counts.insert(compiler.clone(), count);
        }
        let _ = std::fs::remove_file(&src);

        result.max_ratio = compute_max_ratio(&result.line_counts);
        result
    }

    fn verify_safe(&self, result: &mut CompileResult) -> bool {
        let Some(denominator) = result.max_ratio.as_ref().map(|r| r.compiler.clone()) else {
            return false;
        };
        result.asan_checked = true;

        let src = match self.write_scratch(&result.source_path, &result.source_text) {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "scratch write failed during sanitizer check");
                return false;
            }
        };

        let mut safe = true;
        for compiler in [self.current.as_str(), denominator.as_str()] {
            let bin = src.with_extension("bin");
            let mut build = Command::new(compiler);
            build
                .arg(&src)
                .arg("-fsanitize=address,undefined")
                .arg("-o")
                .arg(&bin)
                .args(&self.flags);

            match run_with_timeout(build, self.compile_timeout) {
                Err(e) => {
                    // Cannot even invoke the compiler: inconclusive-safe.
                    warn!(compiler, error = %e, "sanitizer build spawn failed");
                    continue;
                }
                Ok(outcome) if outcome.timed_out => continue,
                Ok(outcome) if !outcome.stderr.trim().is_empty() => {
                    // Toolchain cannot build with the sanitizer: inconclusive-safe.
                    debug!(compiler, "sanitizer build produced diagnostics, skipping");
                    let _ = std::fs::remove_file(&bin);
                    continue;
                }
                Ok(_) => {}
            }
            if !bin.exists() {
                continue;
            }

            match run_with_timeout(Command::new(&bin), self.run_timeout) {
                Err(e) => {
                    warn!(compiler, error = %e, "instrumented binary failed to start");
                }
                Ok(outcome) if outcome.timed_out => {
                    // A hung binary is slow, not unsafe.
                    debug!(compiler, "instrumented run timed out, treating as safe");
                }
                Ok(outcome) if !outcome.stderr.trim().is_empty() => {
                    // The regression is an artifact of undefined behavior.
                    result.diagnostic = Some(outcome.stderr);
                    safe = false;
                }
                Ok(_) => {}
            }
            let _ = std::fs::remove_file(&bin);
            if !safe {
                break;
            }
        }

        let _ = std::fs::remove_file(&src);
        safe
    }
}

/// Find an unused `.c` path under `dir`, appending underscores to the stem
/// until the create succeeds, so concurrent workers never contend.
fn unique_path(dir: &Path, stem: &str) -> std::io::Result<PathBuf> {
    let mut name = stem.to_string();
    loop {
        let path = dir.join(format!("{name}.c"));
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(_) => return Ok(path),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => name.push('_'),
            Err(e) => return Err(e),
        }
    }
}

/// Count assembly lines, excluding blanks, comment lines (`#`), and
/// assembler directives (`.`).
pub fn count_asm_lines(asm: &str) -> usize {
    asm.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('.'))
        .count()
}

/// Compute the regression ratio: current count over the smallest non-zero
/// older count, tagged with the older compiler that achieved it. `None`
/// when the current count is zero or no older compiler produced output.
pub fn compute_max_ratio(counts: &BTreeMap<String, usize>) -> Option<RatioEntry> {
    let current = counts.get(CURRENT_KEY).copied().unwrap_or(0);
    if current == 0 {
        return None;
    }
    let (compiler, min) = counts
        .iter()
        .filter(|(key, value)| key.as_str() != CURRENT_KEY && **value > 0)
        .min_by_key(|(_, value)| **value)?;
    #[allow(clippy::cast_precision_loss)]
    let ratio = (current as f64 / *min as f64 * 100.0).round() / 100.0;
    Some(RatioEntry {
        ratio,
        compiler: compiler.clone(),
    })
}

struct RunOutcome {
    stderr: String,
    timed_out: bool,
}

/// Run a command with stdout discarded and stderr captured, killing the
/// process if it outlives `timeout`. The stderr pipe is drained on a
/// separate thread so a chatty process cannot deadlock the poll loop.
fn run_with_timeout(mut cmd: Command, timeout: Duration) -> std::io::Result<RunOutcome> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn()?;

    let stderr_pipe = child.stderr.take();
    let drain = std::thread::spawn(move || {
        let mut buffer = String::new();
        if let Some(mut pipe) = stderr_pipe {
            let _ = pipe.read_to_string(&mut buffer);
        }
        buffer
    });

    let deadline = Instant::now() + timeout;
    let mut timed_out = false;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) => {
                if Instant::now() >= deadline {
                    timed_out = true;
                    let _ = child.kill();
                    let _ = child.wait();
                    break;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                let _ = drain.join();
                return Err(e);
            }
        }
    }
    let stderr = drain.join().unwrap_or_default();
    Ok(RunOutcome { stderr, timed_out })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_asm_lines_filters_noise() {
        let asm = "\t.file \"t.c\"\n\
                   \t.text\n\
                   main:\n\
                   # a comment\n\
                   \tmovl $0, %eax\n\
                   \n\
                   \tret\n\
                   \t.ident \"GCC\"\n";
        assert_eq!(count_asm_lines(asm), 3); // label + two instructions
    }

    #[test]
    fn test_ratio_basic() {
        let mut counts = BTreeMap::new();
        counts.insert(CURRENT_KEY.to_string(), 40);
        counts.insert("gcc-10".to_string(), 10);
        counts.insert("gcc-11".to_string(), 20);
        let entry = compute_max_ratio(&counts).unwrap();
        assert!((entry.ratio - 4.0).abs() < f64::EPSILON);
        assert_eq!(entry.compiler, "gcc-10");
    }

    #[test]
    fn test_ratio_requires_nonzero_current() {
        // A zero current-compiler count must never yield a ratio.
        let mut counts = BTreeMap::new();
        counts.insert(CURRENT_KEY.to_string(), 0);
        counts.insert("gcc-10".to_string(), 10);
        assert_eq!(compute_max_ratio(&counts), None);
    }

    #[test]
    fn test_ratio_excludes_zero_older_counts() {
        // A timed-out (zero) older compiler is excluded from the
        // denominator set, never treated as an infinite regression.
        let mut counts = BTreeMap::new();
        counts.insert(CURRENT_KEY.to_string(), 30);
        counts.insert("gcc-10".to_string(), 0);
        counts.insert("gcc-11".to_string(), 15);
        let entry = compute_max_ratio(&counts).unwrap();
        assert_eq!(entry.compiler, "gcc-11");
        assert!((entry.ratio - 2.0).abs() < f64::EPSILON);

        counts.insert("gcc-11".to_string(), 0);
        assert_eq!(compute_max_ratio(&counts), None);
    }

    #[test]
    fn test_ratio_rounds_to_two_decimals() {
        let mut counts = BTreeMap::new();
        counts.insert(CURRENT_KEY.to_string(), 10);
        counts.insert("gcc-9".to_string(), 3);
        let entry = compute_max_ratio(&counts).unwrap();
        assert!((entry.ratio - 3.33).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unique_path_appends_underscores() {
        let dir = tempfile::tempdir().unwrap();
        let first = unique_path(dir.path(), "seed").unwrap();
        let second = unique_path(dir.path(), "seed").unwrap();
        let third = unique_path(dir.path(), "seed").unwrap();
        assert_eq!(first.file_name().unwrap(), "seed.c");
        assert_eq!(second.file_name().unwrap(), "seed_.c");
        assert_eq!(third.file_name().unwrap(), "seed__.c");
    }

    #[test]
    fn test_interesting_predicate() {
        let mut counts = BTreeMap::new();
        counts.insert(CURRENT_KEY.to_string(), 40);
        counts.insert("gcc-10".to_string(), 10);
        let result = CompileResult {
            source_path: PathBuf::from("t.c"),
            source_text: String::new(),
            max_ratio: compute_max_ratio(&counts),
            line_counts: counts,
            asan_checked: false,
            strategy: StrategyKind::Random,
            diagnostic: None,
        };
        assert!(result.is_valid());
        assert!(result.is_interesting(1.5));
        assert!(!result.is_interesting(5.0));
    }

    #[test]
    fn test_invalid_result_never_interesting() {
        let mut counts = BTreeMap::new();
        counts.insert(CURRENT_KEY.to_string(), 0);
        counts.insert("gcc-10".to_string(), 1);
        let result = CompileResult {
            source_path: PathBuf::from("t.c"),
            source_text: String::new(),
            max_ratio: compute_max_ratio(&counts),
            line_counts: counts,
            asan_checked: false,
            strategy: StrategyKind::Random,
            diagnostic: None,
        };
        assert!(!result.is_valid());
        assert!(!result.is_interesting(0.0));
    }

    #[test]
    fn test_run_with_timeout_captures_stderr() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo oops >&2");
        let outcome = run_with_timeout(cmd, Duration::from_secs(5)).unwrap();
        assert!(!outcome.timed_out);
        assert_eq!(outcome.stderr.trim(), "oops");
    }

    #[test]
    fn test_run_with_timeout_kills_slow_process() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 30");
        let start = Instant::now();
        let outcome = run_with_timeout(cmd, Duration::from_millis(100)).unwrap();
        assert!(outcome.timed_out);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
