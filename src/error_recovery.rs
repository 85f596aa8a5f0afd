//! Retry policy for generator command sequences.
//
// Transport faults are the only recoverable error class: a command sequence is
// retried as a whole and, once the policy is exhausted, reported to the caller
// as a tagged outcome rather than an error.

use crate::error::{AppResult, SweepError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Defines a policy for retrying an operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// The maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// The delay between attempts.
    #[serde(with = "humantime_serde")]
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    /// One attempt: a failed setpoint is logged and the sweep moves on.
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// At least one attempt is required.
    pub fn validate(&self) -> AppResult<()> {
        if self.max_attempts == 0 {
            return Err(SweepError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of sending a command sequence under a [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// Every command was delivered.
    Applied {
        /// Attempts used, starting at 1.
        attempts: u32,
    },
    /// The last attempt still hit a transport fault.
    TransportFault {
        /// Command that failed on the last attempt.
        command: String,
        /// Attempts used.
        attempts: u32,
        /// Description of the last failure.
        reason: String,
    },
}

impl CommandOutcome {
    /// True for [`CommandOutcome::Applied`].
    pub fn is_applied(&self) -> bool {
        matches!(self, CommandOutcome::Applied { .. })
    }
}

/// An operation that can be attempted more than once.
#[async_trait]
pub trait Retryable: Send {
    /// Perform one attempt.
    async fn attempt(&mut self) -> AppResult<()>;
}

/// Attempt `retryable` until it succeeds or the policy is exhausted.
///
/// Transport faults are retried and finally folded into
/// [`CommandOutcome::TransportFault`]; every other error is returned as is.
pub async fn retry_transport<T: Retryable + ?Sized>(
    retryable: &mut T,
    policy: &RetryPolicy,
) -> AppResult<CommandOutcome> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match retryable.attempt().await {
            Ok(()) => return Ok(CommandOutcome::Applied { attempts: attempt }),
            Err(SweepError::Transport {
                command, reason, ..
            }) => {
                if attempt >= max_attempts {
                    return Ok(CommandOutcome::TransportFault {
                        command,
                        attempts: attempt,
                        reason,
                    });
                }
                debug!(
                    "Attempt {}/{} failed on '{}': {}; retrying",
                    attempt, max_attempts, command, reason
                );
                sleep(policy.backoff_delay).await;
            }
            Err(other) => return Err(other),
        }
    }
}
