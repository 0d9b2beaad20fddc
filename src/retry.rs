use std::{thread, time::Duration};

use anyhow::Result;
use tracing::{debug, warn};

use crate::{config::RetryConfig, error::{FailureKind, PipelineError}};

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self { max_retries: config.max_retries, delay: config.delay() }
    }
}

impl RetryPolicy {
    /// A single attempt.
    pub const NONE: Self = Self { max_retries: 0, delay: Duration::ZERO };

    pub fn new(max_retries: u32, delay: Duration) -> Self { Self { max_retries, delay } }

    /// Run `op` until it succeeds or the retry budget is spent. `op` receives
    /// the 1-based attempt number. Returns the last result and the number of
    /// attempts made; a final failure is tagged as a transient error.
    /// Configuration, data and invariant errors are returned at once, untagged.
    pub fn run<T>(&self, what: &str, mut op: impl FnMut(u32) -> Result<T>) -> (Result<T>, u32) {
        let max_attempts = self.max_retries.saturating_add(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => {
                    debug!(what, attempt, "succeeded");
                    return (Ok(value), attempt);
                }
                Err(err) if FailureKind::of(&err) != FailureKind::Other => {
                    debug!(what, attempt, "not retrying: {err:#}");
                    return (Err(err), attempt);
                }
                Err(err) if attempt < max_attempts => {
                    warn!("{what} failed (attempt {attempt} of {max_attempts}): {err:#}");
                    if !self.delay.is_zero() {
                        thread::sleep(self.delay);
                    }
                    attempt += 1;
                }
                Err(err) => {
                    warn!("{what} failed (attempt {attempt} of {max_attempts}), giving up: {err:#}");
                    let err = err.context(PipelineError::Transient { attempts: attempt, message: what.to_string() });
                    return (Err(err), attempt);
                }
            }
        }
    }
}
