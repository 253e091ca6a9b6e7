//! Compiler set resolution.
//!
//! Probes the current compiler's `--version` output to classify its family
//! (gcc or clang) and major version, then searches `PATH` for older majors
//! of the same family (`gcc-12`, `gcc-11`, ...). Differential comparison
//! needs at least one older compiler, so finding none is a startup error.

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::process::{Command, Stdio};
use tracing::debug;

/// Earliest gcc major worth probing for.
const OLDEST_GCC: u32 = 5;
/// Earliest clang major worth probing for.
const OLDEST_CLANG: u32 = 7;

static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\.\d+(?:\.\d+)?").expect("static regex"));

/// Which toolchain family the current compiler belongs to. Older versions
/// are probed as `<family>-<major>` binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerFamily {
    /// GNU gcc.
    Gcc,
    /// LLVM clang.
    Clang,
}

impl fmt::Display for CompilerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompilerFamily::Gcc => write!(f, "gcc"),
            CompilerFamily::Clang => write!(f, "clang"),
        }
    }
}

/// The resolved compiler set for one fuzzing session.
#[derive(Debug, Clone)]
pub struct CompilerSet {
    /// The current compiler, exactly as given on the command line.
    pub current: String,
    /// Classified family of the current compiler.
    pub family: CompilerFamily,
    /// Major version of the current compiler.
    pub major: u32,
    /// Older same-family compilers found on `PATH`, newest first.
    pub older: Vec<String>,
}

/// Resolve the compiler set for `compiler`.
///
/// # Errors
///
/// Fails when the compiler cannot be invoked, its version output cannot be
/// parsed, or no older same-family compiler exists on `PATH`.
pub fn discover(compiler: &str) -> Result<CompilerSet> {
    let output = version_output(compiler)
        .with_context(|| format!("cannot run `{compiler} --version`"))?;
    let family = classify(&output);
    let major = parse_major(&output).with_context(|| {
        format!("cannot parse a version number from `{compiler} --version` output")
    })?;

    let oldest = match family {
        CompilerFamily::Gcc => OLDEST_GCC,
        CompilerFamily::Clang => OLDEST_CLANG,
    };
    let mut older = Vec::new();
    for n in (oldest..major).rev() {
        let candidate = format!("{family}-{n}");
        if version_output(&candidate).is_ok() {
            debug!(compiler = %candidate, "found older compiler");
            older.push(candidate);
        }
    }
    if older.is_empty() {
        bail!(
            "no older {family} found on PATH (probed {family}-{oldest} through {family}-{}); \
             differential comparison needs at least one",
            major.saturating_sub(1)
        );
    }
    Ok(CompilerSet {
        current: compiler.to_string(),
        family,
        major,
        older,
    })
}

fn version_output(compiler: &str) -> Result<String> {
    let output = Command::new(compiler)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("failed to spawn `{compiler}`"))?;
    anyhow::ensure!(
        output.status.success(),
        "`{compiler} --version` exited with {}",
        output.status
    );
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn classify(version_output: &str) -> CompilerFamily {
    if version_output.to_lowercase().contains("clang") {
        CompilerFamily::Clang
    } else {
        CompilerFamily::Gcc
    }
}

fn parse_major(version_output: &str) -> Option<u32> {
    VERSION_RE
        .captures(version_output)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}
