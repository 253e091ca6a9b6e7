use thiserror::Error;

/// Fuzzer error types covering configuration, corpus, and persistence failures.
///
/// Per-compiler invocation failures are deliberately *not* represented here:
/// the oracle folds them into a zero line count so a single misbehaving
/// compiler never aborts the search. Only resource-level failures (scratch
/// directory creation, checkpoint I/O) surface as errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FuzzError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Seed corpus could not be read.
    #[error("corpus error: {0}")]
    Corpus(String),

    /// Scratch/temp directory could not be created or written.
    #[error("scratch directory error: {0}")]
    Scratch(String),

    /// Checkpoint load/save error.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Report output could not be written.
    #[error("report error: {0}")]
    Report(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Convenience type alias for fuzzer operations.
pub type FuzzResult<T> = Result<T, FuzzError>;

impl FuzzError {
    /// Wrap an `io::Error` with a short context string.
    pub fn io(context: &str, err: &std::io::Error) -> Self {
        FuzzError::Io(format!("{context}: {err}"))
    }
}
