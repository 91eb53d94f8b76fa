//! Bounded retries for projection storage calls.

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use tracing::warn;

use crate::config::RetrySettings;
use crate::read_model::{StoreError, StoreResult};

/// How storage failures and compare-and-swap conflicts are retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts for a transiently failing storage call, first one included.
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Re-reductions after a lost compare-and-swap before giving up.
    pub conflict_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_interval: Duration::from_millis(settings.initial_interval_ms),
            max_interval: Duration::from_millis(settings.max_interval_ms),
            conflict_retries: settings.conflict_retries,
        }
    }
}

impl RetryPolicy {
    /// Millisecond-scale waits, for tests and replays.
    pub fn quick() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            conflict_retries: 8,
        }
    }

    /// A single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(1),
            conflict_retries: 0,
        }
    }

    /// Backoff schedule between attempts. Attempts are bounded by count, not
    /// by elapsed time.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval.max(self.initial_interval))
            .with_max_elapsed_time(None)
            .build()
    }

    /// Run a storage call, retrying [`StoreError::Unavailable`] up to
    /// `max_attempts`. Every other error is returned immediately.
    pub fn storage<T>(&self, mut op: impl FnMut() -> StoreResult<T>) -> StoreResult<T> {
        let mut attempt = 0u32;
        let result = backoff::retry(self.backoff(), || {
            attempt += 1;
            op().map_err(|err| {
                if err.is_transient() && attempt < self.max_attempts {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "storage call failed; retrying"
                    );
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                }
            })
        });

        result.map_err(|err| match err {
            backoff::Error::Permanent(err) => err,
            backoff::Error::Transient { err, .. } => err,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn transient_failures_are_retried_until_success() {
        let calls = Cell::new(0);
        let out = RetryPolicy::quick().storage(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(StoreError::Unavailable("down".into()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(out, Ok(42));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn attempts_are_bounded() {
        let calls = Cell::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::quick()
        };
        let out: StoreResult<()> = policy.storage(|| {
            calls.set(calls.get() + 1);
            Err(StoreError::Unavailable("down".into()))
        });
        assert_eq!(out, Err(StoreError::Unavailable("down".into())));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn conflicts_are_not_storage_retries() {
        let calls = Cell::new(0);
        let out: StoreResult<()> = RetryPolicy::quick().storage(|| {
            calls.set(calls.get() + 1);
            Err(StoreError::Conflict {
                table: "t",
                key: "k".into(),
            })
        });
        assert!(matches!(out, Err(StoreError::Conflict { .. })));
        assert_eq!(calls.get(), 1);
    }
}
