use std::fmt;

use tracing::debug;

use crate::error::{DataIssue, FailureKind};

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Checking,
    Unchanged,
    Merging,
    Enriching,
    Publishing,
    Committing,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Checking => "CHECKING",
            Self::Unchanged => "UNCHANGED",
            Self::Merging => "MERGING",
            Self::Enriching => "ENRICHING",
            Self::Publishing => "PUBLISHING",
            Self::Committing => "COMMITTING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Outputs were published and fingerprints committed.
    Done,
    /// No source changed; nothing was written.
    Unchanged,
    Failed { kind: FailureKind, message: String },
}

/// Attempts made to write one output to one sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAttempt {
    pub sink: String,
    pub destination: String,
    pub attempts: u32,
    pub succeeded: bool,
}

/// Everything a run did, in order. The notification is rendered from this.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub states: Vec<RunState>,
    /// Sources whose fingerprint differed from the stored one.
    pub changed: Vec<String>,
    /// Sources whose new fingerprint was persisted.
    pub committed: Vec<String>,
    pub issues: Vec<DataIssue>,
    pub write_attempts: Vec<WriteAttempt>,
    /// Non-authoritative sinks that failed without failing the run.
    pub sink_failures: Vec<String>,
    pub surface_count: usize,
    pub parcel_count: usize,
}

impl Default for RunReport {
    fn default() -> Self {
        Self {
            outcome: RunOutcome::Unchanged,
            states: Vec::new(),
            changed: Vec::new(),
            committed: Vec::new(),
            issues: Vec::new(),
            write_attempts: Vec::new(),
            sink_failures: Vec::new(),
            surface_count: 0,
            parcel_count: 0,
        }
    }
}

impl RunReport {
    pub(crate) fn enter(&mut self, state: RunState) {
        debug!(%state, "entering state");
        self.states.push(state);
    }

    #[inline] pub fn is_success(&self) -> bool { !matches!(self.outcome, RunOutcome::Failed { .. }) }

    #[inline] pub fn final_state(&self) -> Option<RunState> { self.states.last().copied() }

    /// Total write attempts across every sink and destination.
    pub fn total_writes(&self) -> u32 { self.write_attempts.iter().map(|w| w.attempts).sum() }

    /// Attempts recorded for `destination`, summed across sinks.
    pub fn attempts_for(&self, destination: &str) -> u32 {
        self.write_attempts.iter().filter(|w| w.destination == destination).map(|w| w.attempts).sum()
    }

    /// Human-readable summary for the notifier.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        match &self.outcome {
            RunOutcome::Done => lines.push(format!(
                "Impervious surfaces updated: {} surfaces, {} parcels.", self.surface_count, self.parcel_count,
            )),
            RunOutcome::Unchanged => lines.push("No source layers changed; nothing was published.".to_string()),
            RunOutcome::Failed { kind, message } => lines.push(format!("Run failed ({kind} error): {message}")),
        }
        if !self.changed.is_empty() {
            lines.push(format!("Changed sources: {}", self.changed.join(", ")));
        }
        if !self.sink_failures.is_empty() {
            lines.push(format!("Sink failures: {}", self.sink_failures.join("; ")));
        }
        if !self.issues.is_empty() {
            lines.push(format!("{} feature(s) excluded:", self.issues.len()));
            lines.extend(self.issues.iter().map(|issue| format!("  {issue}")));
        }
        let states: Vec<String> = self.states.iter().map(RunState::to_string).collect();
        lines.push(format!("States: {}", states.join(" -> ")));
        lines.join("\n")
    }
}
