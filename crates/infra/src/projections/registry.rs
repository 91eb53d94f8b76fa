//! Reducer registry and dispatcher.
//!
//! The registry maps `(aggregate kind, event type)` to the reducers that
//! handle it; it is built once at startup from each reducer's routes. The
//! dispatcher looks an envelope up, drops redeliveries using the cursor
//! store, and runs the matching reducers in registration order. Events of a
//! removed instance or organization are not reduced; their arrival re-runs
//! the scope's cascade instead.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};

use warden_events::{AggregateKind, EventEnvelope};

use crate::projections::authorization::AuthorizationProjection;
use crate::projections::cascade::removed_scope;
use crate::projections::cursor_store::ProjectionCursorStore;
use crate::projections::idp::IdpProjection;
use crate::projections::instance::InstanceProjection;
use crate::projections::organization::OrgProjection;
use crate::projections::project::ProjectProjection;
use crate::projections::session::SessionProjection;
use crate::projections::settings::SettingsProjection;
use crate::projections::user::UserProjection;
use crate::projections::{Reducer, ReducerError};
use crate::read_model::{ProjectionTables, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("reducer {0} is already registered")]
    DuplicateReducer(&'static str),

    #[error("reducer {0} declares no routes")]
    NoRoutes(&'static str),
}

#[derive(Default)]
pub struct ReducerRegistry {
    routes: HashMap<AggregateKind, HashMap<&'static str, Vec<Arc<dyn Reducer>>>>,
    reducers: Vec<Arc<dyn Reducer>>,
}

impl std::fmt::Debug for ReducerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReducerRegistry")
            .field("reducers", &self.reducer_names())
            .field("routes", &self.route_count())
            .finish()
    }
}

impl ReducerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every reducer this crate ships.
    pub fn standard() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        registry.register(Arc::new(InstanceProjection))?;
        registry.register(Arc::new(OrgProjection))?;
        registry.register(Arc::new(ProjectProjection))?;
        registry.register(Arc::new(UserProjection))?;
        registry.register(Arc::new(AuthorizationProjection))?;
        registry.register(Arc::new(SessionProjection))?;
        registry.register(Arc::new(IdpProjection))?;
        registry.register(Arc::new(SettingsProjection))?;
        Ok(registry)
    }

    pub fn register(&mut self, reducer: Arc<dyn Reducer>) -> Result<(), RegistryError> {
        let name = reducer.name();
        if self.reducers.iter().any(|r| r.name() == name) {
            return Err(RegistryError::DuplicateReducer(name));
        }
        let routes = reducer.routes();
        if routes.is_empty() {
            return Err(RegistryError::NoRoutes(name));
        }
        for (kind, event_type) in routes {
            let handlers = self.routes.entry(kind).or_default().entry(event_type).or_default();
            if !handlers.iter().any(|r| r.name() == name) {
                handlers.push(reducer.clone());
            }
        }
        self.reducers.push(reducer);
        Ok(())
    }

    /// Reducers for the pair, in registration order. Empty when unmapped.
    pub fn lookup(&self, kind: AggregateKind, event_type: &str) -> &[Arc<dyn Reducer>] {
        self.routes
            .get(&kind)
            .and_then(|by_type| by_type.get(event_type))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn reducer_names(&self) -> Vec<&'static str> {
        self.reducers.iter().map(|r| r.name()).collect()
    }

    pub fn route_count(&self) -> usize {
        self.routes.values().map(HashMap::len).sum()
    }
}

/// Outcome of dispatching one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// These reducers changed (or re-confirmed) their tables.
    Applied(Vec<&'static str>),
    /// No reducer is registered for the pair.
    Unhandled,
    /// Every matching reducer had already applied this sequence number.
    Duplicate,
    /// The event belongs to a removed instance or organization.
    Dropped,
    /// The event could not be decoded; it was logged and passed over.
    Skipped,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{reducer} failed on {event_type} at sequence {sequence}: {source}")]
    Reducer {
        reducer: &'static str,
        event_type: String,
        sequence: u64,
        #[source]
        source: ReducerError,
    },

    #[error("cursor store failed: {0}")]
    Cursor(#[source] StoreError),

    #[error("projection storage failed: {0}")]
    Storage(#[source] StoreError),
}

impl DispatchError {
    /// Whether dispatching the same envelope again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Reducer { source, .. } => source.is_retryable(),
            DispatchError::Cursor(err) | DispatchError::Storage(err) => err.is_transient(),
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ReducerRegistry>,
    tables: ProjectionTables,
    cursors: Arc<dyn ProjectionCursorStore>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("tables", &self.tables)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ReducerRegistry>,
        tables: ProjectionTables,
        cursors: Arc<dyn ProjectionCursorStore>,
    ) -> Self {
        Self {
            registry,
            tables,
            cursors,
        }
    }

    pub fn tables(&self) -> &ProjectionTables {
        &self.tables
    }

    pub fn cursors(&self) -> &Arc<dyn ProjectionCursorStore> {
        &self.cursors
    }

    pub fn registry(&self) -> &ReducerRegistry {
        &self.registry
    }

    pub fn dispatch(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<Dispatch, DispatchError> {
        let sequence = envelope.sequence_number();
        if sequence == 0 {
            warn!(event_type = envelope.event_type(), "event without a stream position; skipping");
            return Ok(Dispatch::Skipped);
        }

        let stream = envelope.stream_key();
        if self.cursor(|c| c.is_complete(&stream, sequence))? {
            debug!(event_type = envelope.event_type(), sequence, "duplicate delivery dropped");
            return Ok(Dispatch::Duplicate);
        }

        let reducers = self.registry.lookup(envelope.aggregate_type(), envelope.event_type());
        if reducers.is_empty() {
            debug!(
                aggregate_type = %envelope.aggregate_type(),
                event_type = envelope.event_type(),
                "no reducer for event; ignoring"
            );
            self.cursor(|c| c.complete(&stream, sequence))?;
            return Ok(Dispatch::Unhandled);
        }

        if self.sweep_removed_scope(envelope)? {
            debug!(
                instance_id = %envelope.instance_id(),
                event_type = envelope.event_type(),
                sequence,
                "event of a removed scope dropped"
            );
            self.cursor(|c| c.complete(&stream, sequence))?;
            return Ok(Dispatch::Dropped);
        }

        let mut applied = Vec::new();
        let mut skipped = false;

        for reducer in reducers {
            let name = reducer.name();
            if self.cursor(|c| c.is_applied(&stream, name, sequence))? {
                continue;
            }

            match reducer.reduce(&self.tables, envelope) {
                Ok(()) => applied.push(name),
                Err(ReducerError::Malformed(err)) => {
                    warn!(
                        reducer = name,
                        event_type = envelope.event_type(),
                        aggregate_id = envelope.aggregate_id(),
                        sequence,
                        error = %err,
                        "malformed event; skipping"
                    );
                    skipped = true;
                }
                Err(source) => {
                    return Err(DispatchError::Reducer {
                        reducer: name,
                        event_type: envelope.event_type().to_string(),
                        sequence,
                        source,
                    });
                }
            }

            self.cursor(|c| c.mark_applied(&stream, name, sequence))?;
        }

        // The scope may have been removed while the reducers ran; whatever
        // they wrote under it goes with the rest.
        if !applied.is_empty() {
            self.sweep_removed_scope(envelope)?;
        }
        self.cursor(|c| c.complete(&stream, sequence))?;

        if !applied.is_empty() {
            debug!(
                instance_id = %envelope.instance_id(),
                event_type = envelope.event_type(),
                sequence,
                reducers = ?applied,
                "event applied"
            );
            Ok(Dispatch::Applied(applied))
        } else if skipped {
            Ok(Dispatch::Skipped)
        } else {
            debug!(event_type = envelope.event_type(), sequence, "duplicate delivery dropped");
            Ok(Dispatch::Duplicate)
        }
    }

    fn cursor<T>(
        &self,
        mut op: impl FnMut(&dyn ProjectionCursorStore) -> Result<T, StoreError>,
    ) -> Result<T, DispatchError> {
        self.tables
            .retry()
            .storage(|| op(self.cursors.as_ref()))
            .map_err(DispatchError::Cursor)
    }

    /// Re-run the cascade of a removed instance or org the envelope belongs
    /// to. Returns whether there was one.
    fn sweep_removed_scope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<bool, DispatchError> {
        let owed = removed_scope(&self.tables, envelope).map_err(DispatchError::Storage)?;
        let Some(plan) = owed else {
            return Ok(false);
        };
        plan.run(&self.tables).map_err(|source| DispatchError::Reducer {
            reducer: plan.name(),
            event_type: envelope.event_type().to_string(),
            sequence: envelope.sequence_number(),
            source,
        })?;
        Ok(true)
    }
}
