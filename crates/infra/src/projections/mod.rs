//! Reducers: one per aggregate family, folding events into projection rows.
//!
//! All projections are:
//! - **Rebuildable**: can be reconstructed from the event stream
//! - **Tenant-isolated**: every row is keyed by its instance
//! - **Idempotent**: applying an event twice leaves the same rows as once

use serde_json::Value as JsonValue;
use thiserror::Error;

use warden_core::OrgId;
use warden_events::{AggregateKind, DecodeError, Event, EventEnvelope};

use crate::read_model::{ProjectionTables, StoreError};
use crate::repository::RepositoryError;

pub mod authorization;
pub mod cascade;
pub mod cursor_store;
pub mod idp;
pub mod instance;
pub mod organization;
pub mod project;
pub mod registry;
pub mod replay;
pub mod session;
pub mod settings;
pub mod user;

pub use cascade::{CascadePlan, CascadeReport};
pub use cursor_store::{InMemoryCursorStore, ProjectionCursorStore};
pub use registry::{Dispatch, DispatchError, Dispatcher, RegistryError, ReducerRegistry};
pub use replay::{EventSource, ReplayError, ReplayHandle, ReplayPhase, ReplayProgress, Replayer};

#[derive(Debug, Error)]
pub enum ReducerError {
    #[error(transparent)]
    Malformed(#[from] DecodeError),

    #[error("projection storage failed: {0}")]
    Storage(StoreError),

    #[error("gave up on {table} row {key} after repeated concurrent modification")]
    Conflict { table: &'static str, key: String },

    #[error("cascade {cascade} stopped at step {step}: {source}")]
    CascadeIncomplete {
        cascade: &'static str,
        step: &'static str,
        #[source]
        source: RepositoryError,
    },
}

impl From<StoreError> for ReducerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { table, key } => ReducerError::Conflict { table, key },
            other => ReducerError::Storage(other),
        }
    }
}

impl ReducerError {
    /// Whether applying the same event again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReducerError::Malformed(_) => false,
            ReducerError::Storage(err) => err.is_transient(),
            ReducerError::Conflict { .. } => true,
            ReducerError::CascadeIncomplete { source, .. } => match source {
                RepositoryError::Storage(StoreError::Conflict { .. }) => true,
                RepositoryError::Storage(err) => err.is_transient(),
                _ => false,
            },
        }
    }
}

/// Folds the events of one aggregate family into its tables.
pub trait Reducer: Send + Sync {
    /// Stable name used for cursors and logs.
    fn name(&self) -> &'static str;

    /// Every `(aggregate kind, event type)` pair this reducer handles.
    fn routes(&self) -> Vec<(AggregateKind, &'static str)>;

    fn reduce(
        &self,
        tables: &ProjectionTables,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ReducerError>;
}

/// Routes for every tag of the union `E`, keyed by the tag's prefix.
pub(crate) fn routes_of<E: Event>() -> Vec<(AggregateKind, &'static str)> {
    E::event_types()
        .iter()
        .filter_map(|tag| AggregateKind::of_event_type(tag).map(|kind| (kind, *tag)))
        .collect()
}

/// Owning organization of the event: the aggregate itself for org events,
/// the envelope's resource owner otherwise.
pub(crate) fn org_scope<E>(envelope: &EventEnvelope<E>) -> Option<OrgId> {
    match envelope.aggregate_type() {
        AggregateKind::Org => Some(OrgId::from(envelope.aggregate_id())),
        AggregateKind::Instance => None,
        _ => envelope.org_id().cloned(),
    }
}

pub(crate) fn require_org<E>(envelope: &EventEnvelope<E>) -> Result<OrgId, ReducerError> {
    org_scope(envelope).ok_or_else(|| {
        ReducerError::Malformed(DecodeError::malformed(
            envelope.event_type(),
            "event carries no owning organization",
        ))
    })
}

/// Keep `keys` unique, in first-seen order.
pub(crate) fn dedup_keys(keys: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(keys.len());
    for key in keys {
        if !out.contains(&key) {
            out.push(key);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        let keys = vec!["b".into(), "a".into(), "b".into(), "c".into()];
        assert_eq!(dedup_keys(keys), vec!["b", "a", "c"]);
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(ReducerError::from(StoreError::Unavailable("x".into())).is_retryable());
        assert!(!ReducerError::from(StoreError::Poisoned).is_retryable());
        assert!(!ReducerError::Malformed(DecodeError::UnknownEventType("x".into())).is_retryable());
        let conflict = ReducerError::from(StoreError::Conflict {
            table: "users",
            key: "k".into(),
        });
        assert!(matches!(conflict, ReducerError::Conflict { .. }));
        assert!(conflict.is_retryable());
    }

    #[test]
    fn cascades_retry_only_on_recoverable_storage_failures() {
        let stopped = |source| ReducerError::CascadeIncomplete {
            cascade: "user",
            step: "sessions",
            source,
        };
        let unavailable = StoreError::Unavailable("x".into());
        assert!(stopped(RepositoryError::Storage(unavailable)).is_retryable());
        assert!(!stopped(RepositoryError::Storage(StoreError::Poisoned)).is_retryable());
        let unpinned = RepositoryError::MissingCondition(warden_core::condition::columns::ID);
        assert!(!stopped(unpinned).is_retryable());
    }
}
