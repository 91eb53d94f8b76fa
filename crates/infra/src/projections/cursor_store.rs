//! Projection cursor persistence.
//!
//! Progress is tracked per stream. Each stream keeps a watermark: the
//! highest sequence number such that it and every sequence below it are
//! done. Sequences finished ahead of a gap are held beside the watermark
//! until the gap closes, and a reducer that finished a sequence the stream
//! has not completed yet is remembered so a retry does not run it twice.
//!
//! It backs:
//! - Duplicate suppression (a completed sequence is never reduced again)
//! - Out-of-order delivery (a late, lower sequence is still reduced)
//! - Rebuilds (clear an instance's cursors, then replay)

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use warden_core::InstanceId;
use warden_events::StreamKey;

use crate::read_model::{StoreError, StoreResult};

pub trait ProjectionCursorStore: Send + Sync {
    /// Whether every reducer is done with `sequence_number` of `stream`.
    fn is_complete(&self, stream: &StreamKey, sequence_number: u64) -> StoreResult<bool>;

    /// Whether `projection` already applied `sequence_number` of `stream`.
    fn is_applied(
        &self,
        stream: &StreamKey,
        projection: &str,
        sequence_number: u64,
    ) -> StoreResult<bool>;

    /// Record that `projection` applied `sequence_number`.
    fn mark_applied(
        &self,
        stream: &StreamKey,
        projection: &str,
        sequence_number: u64,
    ) -> StoreResult<()>;

    /// Record that every reducer is done with `sequence_number`.
    fn complete(&self, stream: &StreamKey, sequence_number: u64) -> StoreResult<()>;

    /// Highest sequence number below which the stream has no gaps.
    fn watermark(&self, stream: &StreamKey) -> StoreResult<u64>;

    /// Forget every cursor of the instance. Returns how many streams were dropped.
    fn clear_cursors(&self, instance_id: &InstanceId) -> StoreResult<usize>;
}

impl<S: ProjectionCursorStore + ?Sized> ProjectionCursorStore for Arc<S> {
    fn is_complete(&self, stream: &StreamKey, sequence_number: u64) -> StoreResult<bool> {
        (**self).is_complete(stream, sequence_number)
    }

    fn is_applied(
        &self,
        stream: &StreamKey,
        projection: &str,
        sequence_number: u64,
    ) -> StoreResult<bool> {
        (**self).is_applied(stream, projection, sequence_number)
    }

    fn mark_applied(
        &self,
        stream: &StreamKey,
        projection: &str,
        sequence_number: u64,
    ) -> StoreResult<()> {
        (**self).mark_applied(stream, projection, sequence_number)
    }

    fn complete(&self, stream: &StreamKey, sequence_number: u64) -> StoreResult<()> {
        (**self).complete(stream, sequence_number)
    }

    fn watermark(&self, stream: &StreamKey) -> StoreResult<u64> {
        (**self).watermark(stream)
    }

    fn clear_cursors(&self, instance_id: &InstanceId) -> StoreResult<usize> {
        (**self).clear_cursors(instance_id)
    }
}

#[derive(Debug, Default)]
struct StreamProgress {
    watermark: u64,
    ahead: BTreeSet<u64>,
    partial: HashMap<u64, HashSet<String>>,
}

impl StreamProgress {
    fn is_complete(&self, sequence_number: u64) -> bool {
        sequence_number <= self.watermark || self.ahead.contains(&sequence_number)
    }

    fn complete(&mut self, sequence_number: u64) {
        self.partial.remove(&sequence_number);
        if sequence_number <= self.watermark {
            return;
        }
        self.ahead.insert(sequence_number);
        while self.ahead.remove(&(self.watermark + 1)) {
            self.watermark += 1;
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    streams: RwLock<HashMap<StreamKey, StreamProgress>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectionCursorStore for InMemoryCursorStore {
    fn is_complete(&self, stream: &StreamKey, sequence_number: u64) -> StoreResult<bool> {
        let streams = self.streams.read().map_err(|_| StoreError::Poisoned)?;
        Ok(streams
            .get(stream)
            .is_some_and(|progress| progress.is_complete(sequence_number)))
    }

    fn is_applied(
        &self,
        stream: &StreamKey,
        projection: &str,
        sequence_number: u64,
    ) -> StoreResult<bool> {
        let streams = self.streams.read().map_err(|_| StoreError::Poisoned)?;
        Ok(streams.get(stream).is_some_and(|progress| {
            progress.is_complete(sequence_number)
                || progress
                    .partial
                    .get(&sequence_number)
                    .is_some_and(|done| done.contains(projection))
        }))
    }

    fn mark_applied(
        &self,
        stream: &StreamKey,
        projection: &str,
        sequence_number: u64,
    ) -> StoreResult<()> {
        let mut streams = self.streams.write().map_err(|_| StoreError::Poisoned)?;
        let progress = streams.entry(stream.clone()).or_default();
        if !progress.is_complete(sequence_number) {
            progress
                .partial
                .entry(sequence_number)
                .or_default()
                .insert(projection.to_string());
        }
        Ok(())
    }

    fn complete(&self, stream: &StreamKey, sequence_number: u64) -> StoreResult<()> {
        let mut streams = self.streams.write().map_err(|_| StoreError::Poisoned)?;
        streams.entry(stream.clone()).or_default().complete(sequence_number);
        Ok(())
    }

    fn watermark(&self, stream: &StreamKey) -> StoreResult<u64> {
        let streams = self.streams.read().map_err(|_| StoreError::Poisoned)?;
        Ok(streams.get(stream).map_or(0, |progress| progress.watermark))
    }

    fn clear_cursors(&self, instance_id: &InstanceId) -> StoreResult<usize> {
        let mut streams = self.streams.write().map_err(|_| StoreError::Poisoned)?;
        let before = streams.len();
        streams.retain(|stream, _| &stream.instance_id != instance_id);
        Ok(before - streams.len())
    }
}

#[cfg(test)]
mod tests {
    use warden_events::AggregateKind;

    use super::*;

    fn stream(instance: &str, id: &str) -> StreamKey {
        StreamKey {
            instance_id: InstanceId::from(instance),
            aggregate_type: AggregateKind::User,
            aggregate_id: id.to_string(),
        }
    }

    #[test]
    fn watermark_waits_for_the_gap_to_close() {
        let store = InMemoryCursorStore::new();
        let s = stream("inst-1", "u1");

        store.complete(&s, 1).unwrap();
        store.complete(&s, 3).unwrap();
        assert_eq!(store.watermark(&s).unwrap(), 1);
        assert!(store.is_complete(&s, 3).unwrap());
        assert!(!store.is_complete(&s, 2).unwrap());

        store.complete(&s, 2).unwrap();
        assert_eq!(store.watermark(&s).unwrap(), 3);
    }

    #[test]
    fn partial_progress_is_per_reducer_until_completion() {
        let store = InMemoryCursorStore::new();
        let s = stream("inst-1", "u1");

        store.mark_applied(&s, "users", 1).unwrap();
        assert!(store.is_applied(&s, "users", 1).unwrap());
        assert!(!store.is_applied(&s, "sessions", 1).unwrap());
        assert!(!store.is_complete(&s, 1).unwrap());

        store.complete(&s, 1).unwrap();
        assert!(store.is_applied(&s, "sessions", 1).unwrap());
    }

    #[test]
    fn clearing_is_per_instance() {
        let store = InMemoryCursorStore::new();
        store.complete(&stream("inst-1", "u1"), 1).unwrap();
        store.complete(&stream("inst-1", "u2"), 1).unwrap();
        store.complete(&stream("inst-2", "u1"), 1).unwrap();

        assert_eq!(store.clear_cursors(&"inst-1".into()).unwrap(), 2);
        assert_eq!(store.watermark(&stream("inst-2", "u1")).unwrap(), 1);
        assert_eq!(store.watermark(&stream("inst-1", "u1")).unwrap(), 0);
    }
}
