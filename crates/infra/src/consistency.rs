//! Waiting for the read side to catch up.
//!
//! Commands return once their events are appended; projections apply them
//! later. Callers that need to see the effect poll a repository read until it
//! shows up or the timeout passes. A timeout means "not yet observed", not
//! that the command failed.

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use thiserror::Error;

use crate::config::ConsistencySettings;
use crate::repository::{RepositoryError, RepositoryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self::from(&ConsistencySettings::default())
    }
}

impl From<&ConsistencySettings> for WaitConfig {
    fn from(settings: &ConsistencySettings) -> Self {
        Self {
            timeout: Duration::from_millis(settings.timeout_ms),
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
        }
    }
}

impl WaitConfig {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// Fixed-interval schedule that gives up once `timeout` has elapsed.
    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.poll_interval)
            .with_max_interval(self.poll_interval)
            .with_multiplier(1.0)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(Some(self.timeout))
            .build()
    }
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("expected state not observed within {timeout:?}")]
    NotYetObserved {
        timeout: Duration,
        /// What the last poll saw, if it was an error.
        #[source]
        last: Option<RepositoryError>,
    },

    #[error(transparent)]
    Repository(RepositoryError),
}

/// Why one poll did not finish the wait.
enum Pending {
    Rejected,
    Failed(RepositoryError),
    Fatal(RepositoryError),
}

impl Pending {
    fn into_error(self, config: &WaitConfig) -> WaitError {
        match self {
            Pending::Fatal(err) => WaitError::Repository(err),
            Pending::Failed(err) => WaitError::NotYetObserved {
                timeout: config.timeout,
                last: Some(err),
            },
            Pending::Rejected => WaitError::NotYetObserved {
                timeout: config.timeout,
                last: None,
            },
        }
    }
}

fn classify<T>(
    outcome: RepositoryResult<T>,
    accept: &impl Fn(&T) -> bool,
) -> Result<T, backoff::Error<Pending>> {
    match outcome {
        Ok(value) if accept(&value) => Ok(value),
        Ok(_) => Err(backoff::Error::transient(Pending::Rejected)),
        Err(err) if err.is_transient() => Err(backoff::Error::transient(Pending::Failed(err))),
        Err(err) => Err(backoff::Error::permanent(Pending::Fatal(err))),
    }
}

/// Poll `lookup` until it returns a row. Not-found and transient storage
/// errors keep the wait going; any other error ends it early.
pub fn wait_until_visible<T>(
    config: &WaitConfig,
    lookup: impl FnMut() -> RepositoryResult<T>,
) -> Result<T, WaitError> {
    wait_until(config, lookup, |_| true)
}

/// Poll `lookup` until its result satisfies `accept`.
pub fn wait_until<T>(
    config: &WaitConfig,
    mut lookup: impl FnMut() -> RepositoryResult<T>,
    accept: impl Fn(&T) -> bool,
) -> Result<T, WaitError> {
    backoff::retry(config.schedule(), || classify(lookup(), &accept)).map_err(|err| {
        let pending = match err {
            backoff::Error::Permanent(pending) => pending,
            backoff::Error::Transient { err, .. } => err,
        };
        pending.into_error(config)
    })
}

/// Async form of [`wait_until`]; sleeps on the tokio timer between polls.
pub async fn wait_until_async<T>(
    config: &WaitConfig,
    mut lookup: impl FnMut() -> RepositoryResult<T>,
    accept: impl Fn(&T) -> bool,
) -> Result<T, WaitError> {
    // The future form hands back the last `Pending` itself once it stops.
    backoff::future::retry(config.schedule(), || {
        let outcome = classify(lookup(), &accept);
        async move { outcome }
    })
    .await
    .map_err(|pending| pending.into_error(config))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::read_model::StoreError;

    fn quick() -> WaitConfig {
        WaitConfig::new(Duration::from_millis(200), Duration::from_millis(2))
    }

    #[test]
    fn keeps_polling_through_not_found() {
        let polls = Cell::new(0);
        let value = wait_until_visible(&quick(), || {
            polls.set(polls.get() + 1);
            if polls.get() < 4 {
                Err(RepositoryError::NotFound { table: "users" })
            } else {
                Ok("ada")
            }
        })
        .unwrap();
        assert_eq!(value, "ada");
        assert_eq!(polls.get(), 4);
    }

    #[test]
    fn timeout_is_not_yet_observed() {
        let config = WaitConfig::new(Duration::from_millis(20), Duration::from_millis(2));
        let err = wait_until_visible::<()>(&config, || {
            Err(RepositoryError::NotFound { table: "users" })
        })
        .unwrap_err();
        assert!(matches!(
            err,
            WaitError::NotYetObserved { last: Some(ref e), .. } if e.is_not_found()
        ));
    }

    #[test]
    fn permanent_errors_end_the_wait() {
        let polls = Cell::new(0);
        let err = wait_until_visible::<()>(&quick(), || {
            polls.set(polls.get() + 1);
            Err(RepositoryError::Storage(StoreError::Poisoned))
        })
        .unwrap_err();
        assert!(matches!(err, WaitError::Repository(_)));
        assert_eq!(polls.get(), 1);
    }

    #[test]
    fn waits_for_the_accepted_state() {
        let polls = Cell::new(0u32);
        let seen = wait_until(
            &quick(),
            || {
                polls.set(polls.get() + 1);
                Ok(polls.get())
            },
            |n| *n >= 3,
        )
        .unwrap();
        assert_eq!(seen, 3);
    }

    #[tokio::test]
    async fn async_wait_sees_late_rows() {
        let mut polls = 0;
        let value = wait_until_async(
            &quick(),
            || {
                polls += 1;
                if polls < 3 {
                    Err(RepositoryError::NotFound { table: "orgs" })
                } else {
                    Ok(polls)
                }
            },
            |_| true,
        )
        .await
        .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn async_wait_stops_on_a_permanent_error() {
        let mut polls = 0;
        let err = wait_until_async::<()>(
            &quick(),
            || {
                polls += 1;
                Err(RepositoryError::MissingCondition(warden_core::condition::columns::ID))
            },
            |_| true,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WaitError::Repository(RepositoryError::MissingCondition(_))));
        assert_eq!(polls, 1);
    }

    #[tokio::test]
    async fn async_wait_times_out_as_not_yet_observed() {
        let config = WaitConfig::new(Duration::from_millis(20), Duration::from_millis(2));
        let err = wait_until_async(&config, || Ok(0u32), |n| *n > 0)
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::NotYetObserved { last: None, .. }));

        let err = wait_until_async::<()>(
            &config,
            || Err(RepositoryError::NotFound { table: "orgs" }),
            |_| true,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            WaitError::NotYetObserved { last: Some(ref e), .. } if e.is_not_found()
        ));
    }
}
