//! Configuration for a fuzzing session.
//!
//! Supports TOML deserialization with sensible defaults for local runs and
//! explicit values for long campaigns. Durations use humantime strings
//! ("10s", "500ms").

use crate::error::{FuzzError, FuzzResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level fuzzing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzConfig {
    /// Codegen-size ratio above which a mutant is considered interesting.
    ///
    /// Empirically tuned; the historical default is 1.5 but the value has no
    /// documented derivation, so it is configurable rather than fixed.
    pub ratio_threshold: f64,

    /// Stop after this many accepted (safe, interesting) results.
    pub accept_threshold: usize,

    /// Worker pool size. 0 means "use all available cores".
    pub jobs: usize,

    /// Optimization level passed to every compiler (1, 2, or 3).
    pub opt_level: u8,

    /// Per-invocation compile timeout.
    #[serde(with = "humantime_serde")]
    pub compile_timeout: Duration,

    /// Timeout for running a sanitizer-instrumented binary.
    #[serde(with = "humantime_serde")]
    pub run_timeout: Duration,

    /// Seed files longer than this many lines are rejected to bound
    /// compile time.
    pub max_source_lines: usize,

    /// Rounds of probabilistic (mostly Random) mutation per candidate before
    /// escalating to Boundary/Perturb on essential inputs only.
    pub random_rounds: u32,

    /// Try budget for each escalation strategy (Boundary, then Perturb).
    pub escalation_tries: u32,

    /// Bounded retries when Perturb redraws an out-of-range delta.
    pub perturb_max_tries: u32,

    /// Probability weights for strategy selection.
    pub strategy_weights: StrategyWeights,

    /// Directory scanned for seed C files.
    pub corpus_dir: PathBuf,

    /// Directory receiving reports, analytics, and triage files.
    pub output_dir: PathBuf,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            ratio_threshold: 1.5,
            accept_threshold: 10,
            jobs: 0,
            opt_level: 3,
            compile_timeout: Duration::from_secs(10),
            run_timeout: Duration::from_secs(5),
            max_source_lines: 500,
            random_rounds: 50,
            escalation_tries: 25,
            perturb_max_tries: 10,
            strategy_weights: StrategyWeights::default(),
            corpus_dir: PathBuf::from("corpus"),
            output_dir: PathBuf::from("out"),
        }
    }
}

/// Probability mass assigned to each mutation strategy.
///
/// A continuous draw in [0,1] selects Random below `random`, Boundary below
/// `random + boundary`, and Perturb otherwise.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyWeights {
    /// Mass for the Random strategy.
    pub random: f64,
    /// Mass for the Boundary strategy.
    pub boundary: f64,
}

impl Default for StrategyWeights {
    fn default() -> Self {
        Self {
            random: 0.60,
            boundary: 0.15,
        }
    }
}

impl FuzzConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> FuzzResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FuzzError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> FuzzResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| FuzzError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> FuzzResult<String> {
        toml::to_string_pretty(self).map_err(|e| FuzzError::Config(e.to_string()))
    }

    /// Check cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns an error for out-of-range values.
    pub fn validate(&self) -> FuzzResult<()> {
        if self.ratio_threshold <= 1.0 {
            return Err(FuzzError::Config(format!(
                "ratio_threshold must be > 1.0, got {}",
                self.ratio_threshold
            )));
        }
        if self.accept_threshold == 0 {
            return Err(FuzzError::Config(
                "accept_threshold must be at least 1".to_string(),
            ));
        }
        if !(1..=3).contains(&self.opt_level) {
            return Err(FuzzError::Config(format!(
                "opt_level must be 1, 2, or 3, got {}",
                self.opt_level
            )));
        }
        let w = &self.strategy_weights;
        if w.random < 0.0 || w.boundary < 0.0 || w.random + w.boundary > 1.0 {
            return Err(FuzzError::Config(format!(
                "strategy weights must be non-negative and sum to at most 1.0, \
                 got random={} boundary={}",
                w.random, w.boundary
            )));
        }
        Ok(())
    }

    /// The fixed compiler flag set for assembly output.
    pub fn compile_flags(&self) -> Vec<String> {
        vec![
            format!("-O{}", self.opt_level),
            "-fno-unroll-loops".to_string(),
            "-w".to_string(),
        ]
    }

    /// Effective worker count (resolving `jobs == 0` to `fallback`).
    pub fn effective_jobs(&self, fallback: usize) -> usize {
        if self.jobs == 0 {
            fallback.max(1)
        } else {
            self.jobs
        }
    }
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
