//! Bounded retry for transient store contention.
//!
//! Only [`StoreError::Busy`] is retried. The delay is fixed: contention on a
//! local SQLite file clears within milliseconds or not at all, so growing
//! the delay buys nothing.

use crate::config::CacheDefaults;
use crate::store::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first one).
    pub max_attempts: u32,
    /// Fixed delay between attempts, in milliseconds.
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: CacheDefaults::RETRY_ATTEMPTS,
            delay_ms: CacheDefaults::RETRY_DELAY.as_millis() as u64,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the delay between attempts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Statistics about a retried operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    /// Number of attempts made.
    pub attempts: u32,
    /// Total delay accumulated.
    pub total_delay: Duration,
    /// Whether the operation ultimately succeeded.
    pub success: bool,
    /// Last error message if an attempt failed.
    pub last_error: Option<String>,
}

type Sleeper = Box<dyn Fn(Duration) + Send + Sync>;

/// Runs store operations under a [`RetryPolicy`].
pub struct RetryExecutor {
    policy: RetryPolicy,
    sleeper: Sleeper,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            sleeper: Box::new(std::thread::sleep),
        }
    }

    /// Replace the blocking sleep, e.g. with a no-op in tests.
    pub fn with_sleeper(mut self, sleeper: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation`, retrying while it reports [`StoreError::Busy`].
    ///
    /// A policy with zero attempts still runs the operation once.
    pub fn run<T>(
        &self,
        mut operation: impl FnMut() -> StoreResult<T>,
    ) -> (StoreResult<T>, RetryStats) {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut stats = RetryStats::default();

        loop {
            stats.attempts += 1;

            let err = match operation() {
                Ok(value) => {
                    stats.success = true;
                    if stats.attempts > 1 {
                        debug!("Store operation succeeded after {} attempts", stats.attempts);
                    }
                    return (Ok(value), stats);
                }
                Err(err) => err,
            };

            stats.last_error = Some(err.to_string());

            if !matches!(err, StoreError::Busy(_)) {
                return (Err(err), stats);
            }

            if stats.attempts >= max_attempts {
                warn!(
                    "All {} store attempts exhausted under contention: {}",
                    max_attempts, err
                );
                return (Err(err), stats);
            }

            let delay = self.policy.delay();
            stats.total_delay += delay;
            warn!(
                "Store attempt {}/{} hit contention: {}. Retrying in {:?}",
                stats.attempts, max_attempts, err, delay
            );
            (self.sleeper)(delay);
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
