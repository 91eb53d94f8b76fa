//! Builders shared by the unit and integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value as JsonValue;

use warden_core::{Condition, InstanceId, OrgId, Query};
use warden_events::{AggregateKind, EventEnvelope};

use crate::projections::Reducer;
use crate::read_model::{
    Expected, InMemoryProjectionStore, ProjectionStore, ProjectionTables, Row, RowKey, StoreError,
    StoreResult, Versioned,
};
use crate::retry::RetryPolicy;

pub fn tables() -> ProjectionTables {
    ProjectionTables::in_memory(RetryPolicy::quick())
}

/// Mints envelopes for one instance with per-stream sequence numbers and a
/// clock that advances one second per event.
pub struct Events {
    instance_id: InstanceId,
    clock: DateTime<Utc>,
    sequences: HashMap<(AggregateKind, String), u64>,
}

impl Events {
    pub fn new(instance: &str) -> Self {
        Self {
            instance_id: InstanceId::from(instance),
            clock: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_else(Utc::now),
            sequences: HashMap::new(),
        }
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id.clone()
    }

    /// Time of the most recently minted event.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock
    }

    pub fn next(
        &mut self,
        kind: AggregateKind,
        aggregate_id: &str,
        event_type: &str,
        payload: JsonValue,
    ) -> EventEnvelope<JsonValue> {
        self.clock += Duration::seconds(1);
        let seq = self
            .sequences
            .entry((kind, aggregate_id.to_string()))
            .and_modify(|s| *s += 1)
            .or_insert(1);
        EventEnvelope::new(
            self.instance_id.clone(),
            kind,
            aggregate_id,
            *seq,
            event_type,
            self.clock,
            payload,
        )
    }

    /// Like [`Events::next`], owned by `org`.
    pub fn owned(
        &mut self,
        org: &str,
        kind: AggregateKind,
        aggregate_id: &str,
        event_type: &str,
        payload: JsonValue,
    ) -> EventEnvelope<JsonValue> {
        self.next(kind, aggregate_id, event_type, payload)
            .with_org(OrgId::from(org))
    }

    pub fn instance(&mut self, event_type: &str, payload: JsonValue) -> EventEnvelope<JsonValue> {
        let id = self.instance_id.to_string();
        self.next(AggregateKind::Instance, &id, event_type, payload)
    }

    pub fn org(
        &mut self,
        org: &str,
        event_type: &str,
        payload: JsonValue,
    ) -> EventEnvelope<JsonValue> {
        self.owned(org, AggregateKind::Org, org, event_type, payload)
    }
}

/// Reduce every envelope in order, panicking on the first failure.
pub fn apply_all(
    reducer: &dyn Reducer,
    tables: &ProjectionTables,
    envelopes: &[EventEnvelope<JsonValue>],
) {
    for envelope in envelopes {
        if let Err(err) = reducer.reduce(tables, envelope) {
            panic!("{} failed on {}: {err}", reducer.name(), envelope.event_type());
        }
    }
}

/// Every row of a store, in key order.
pub fn all_rows<R: Row>(store: &dyn ProjectionStore<R>) -> Vec<R> {
    let everything = Condition::is_not_null(warden_core::condition::columns::INSTANCE_ID);
    store.query(&Query::new(everything)).unwrap_or_default()
}

/// Wraps an in-memory store and fails the next `n` calls as unavailable.
pub struct FlakyStore<R> {
    inner: InMemoryProjectionStore<R>,
    failures: AtomicU32,
}

impl<R> FlakyStore<R> {
    pub fn new() -> Self {
        Self {
            inner: InMemoryProjectionStore::new(),
            failures: AtomicU32::new(0),
        }
    }

    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    fn trip(&self) -> StoreResult<()> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

impl<R: Row> ProjectionStore<R> for FlakyStore<R> {
    fn get(&self, key: &RowKey) -> StoreResult<Option<Versioned<R>>> {
        self.trip()?;
        self.inner.get(key)
    }

    fn put(&self, row: R, expected: Expected) -> StoreResult<u64> {
        self.trip()?;
        self.inner.put(row, expected)
    }

    fn remove(&self, key: &RowKey, version: u64) -> StoreResult<()> {
        self.trip()?;
        self.inner.remove(key, version)
    }

    fn query(&self, query: &Query) -> StoreResult<Vec<R>> {
        self.trip()?;
        self.inner.query(query)
    }

    fn delete_where(&self, condition: &Condition) -> StoreResult<usize> {
        self.trip()?;
        self.inner.delete_where(condition)
    }
}
