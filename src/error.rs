use std::fmt;

use thiserror::Error;

/// Classified pipeline failures. Raised through `anyhow` and recovered by
/// downcasting where the run needs to know which kind it was.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing credentials, unusable settings, unreachable targets.
    #[error("configuration error: {0}")]
    Config(String),

    /// A feature that cannot be used (invalid geometry, missing attribute).
    #[error("data error in {source_name}: {reason}")]
    Data { source_name: String, reason: String },

    /// Corrupted fingerprint store, duplicate ids within a snapshot.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Store or sink I/O that failed after its retry budget.
    #[error("transient failure after {attempts} attempt(s): {message}")]
    Transient { attempts: u32, message: String },
}

/// Coarse failure classification reported at the end of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Config,
    Data,
    Invariant,
    Transient,
    Other,
}

impl FailureKind {
    /// Classify an error by looking for a `PipelineError` anywhere in its chain.
    pub fn of(err: &anyhow::Error) -> Self {
        // `downcast_ref` sees an error attached as context; `chain` sees wrapped causes.
        err.downcast_ref::<PipelineError>()
            .or_else(|| err.chain().find_map(|cause| cause.downcast_ref::<PipelineError>()))
            .map(|e| match e {
                PipelineError::Config(_) => Self::Config,
                PipelineError::Data { .. } => Self::Data,
                PipelineError::Invariant(_) => Self::Invariant,
                PipelineError::Transient { .. } => Self::Transient,
            })
            .unwrap_or(Self::Other)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Config => "configuration",
            Self::Data => "data",
            Self::Invariant => "invariant",
            Self::Transient => "transient",
            Self::Other => "unexpected",
        })
    }
}

/// A single feature excluded from the output, kept for the run report.
#[derive(Debug, Clone, PartialEq)]
pub struct DataIssue {
    pub source: String,
    pub feature_id: String,
    pub reason: String,
}

impl fmt::Display for DataIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.source, self.feature_id, self.reason)
    }
}
