use chrono::{DateTime, Utc};
use tracing::debug;

use warden_core::{Condition, Query};

use crate::read_model::store::{Expected, ProjectionStore, Row, RowKey, StoreError, StoreResult};
use crate::retry::RetryPolicy;

/// What a keyed mutation did to the store.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Mutation {
    Inserted,
    Updated,
    Deleted,
    Unchanged,
}

/// One projection table bound to the retry policy of its storage handle.
///
/// Every read and write goes through [`RetryPolicy::storage`]; keyed writes
/// additionally re-run their reduction when a compare-and-swap is lost.
pub struct Table<'a, R: Row> {
    store: &'a dyn ProjectionStore<R>,
    retry: &'a RetryPolicy,
}

impl<'a, R: Row> Table<'a, R> {
    pub fn new(store: &'a dyn ProjectionStore<R>, retry: &'a RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn get(&self, key: &RowKey) -> StoreResult<Option<R>> {
        let stored = self.retry.storage(|| self.store.get(key))?;
        Ok(stored.map(|v| v.row))
    }

    pub fn query(&self, query: &Query) -> StoreResult<Vec<R>> {
        self.retry.storage(|| self.store.query(query))
    }

    pub fn delete_where(&self, condition: &Condition) -> StoreResult<usize> {
        self.retry.storage(|| self.store.delete_where(condition))
    }

    /// Apply a pure reduction `prior -> next` to the row at `key`.
    ///
    /// `None` on either side means "no row". A reduction that leaves the row
    /// equal to its prior state writes nothing, which keeps redelivered events
    /// from bumping versions.
    pub fn mutate(
        &self,
        key: &RowKey,
        reduce: impl Fn(Option<R>) -> Option<R>,
    ) -> StoreResult<Mutation> {
        for attempt in 0..=self.retry.conflict_retries {
            let current = self.retry.storage(|| self.store.get(key))?;
            let (prior, version) = match current {
                Some(stored) => (Some(stored.row), Some(stored.version)),
                None => (None, None),
            };

            let next = reduce(prior.clone());
            let written = match (next, version) {
                (None, None) => return Ok(Mutation::Unchanged),
                (Some(next), _) if prior.as_ref() == Some(&next) => return Ok(Mutation::Unchanged),
                (Some(next), None) => {
                    debug_assert_eq!(&next.key(), key);
                    self.retry
                        .storage(|| self.store.put(next.clone(), Expected::Absent))
                        .map(|_| Mutation::Inserted)
                }
                (Some(next), Some(version)) => self
                    .retry
                    .storage(|| self.store.put(next.clone(), Expected::Version(version)))
                    .map(|_| Mutation::Updated),
                (None, Some(version)) => self
                    .retry
                    .storage(|| self.store.remove(key, version))
                    .map(|_| Mutation::Deleted),
            };

            match written {
                Err(StoreError::Conflict { .. }) => {
                    debug!(
                        table = R::TABLE,
                        key = %key,
                        attempt,
                        "lost compare-and-swap; re-reducing"
                    );
                }
                other => return other,
            }
        }

        Err(StoreError::Conflict {
            table: R::TABLE,
            key: key.to_string(),
        })
    }

    /// Create the row, or merge into it when it already exists.
    pub fn upsert(
        &self,
        key: &RowKey,
        insert: impl Fn() -> R,
        merge: impl Fn(&mut R),
    ) -> StoreResult<Mutation> {
        self.mutate(key, |prior| match prior {
            Some(mut row) => {
                merge(&mut row);
                Some(row)
            }
            None => Some(insert()),
        })
    }

    /// Change an existing row and bump its `UpdatedAt`. A missing row is left
    /// missing.
    pub fn update(
        &self,
        key: &RowKey,
        at: DateTime<Utc>,
        apply: impl Fn(&mut R),
    ) -> StoreResult<Mutation> {
        let outcome = self.mutate(key, |prior| {
            prior.map(|mut row| {
                let before = row.clone();
                apply(&mut row);
                if row != before {
                    row.touch(at);
                }
                row
            })
        })?;
        if outcome == Mutation::Unchanged {
            debug!(table = R::TABLE, key = %key, "no row changed");
        }
        Ok(outcome)
    }

    /// Like [`Table::update`], but `apply` decides whether the row changes at
    /// all. Rows `apply` returns `false` for keep their `UpdatedAt`.
    pub fn update_if(
        &self,
        key: &RowKey,
        at: DateTime<Utc>,
        apply: impl Fn(&mut R) -> bool,
    ) -> StoreResult<Mutation> {
        self.mutate(key, |prior| {
            prior.map(|mut row| {
                let original = row.clone();
                if apply(&mut row) {
                    row.touch(at);
                    row
                } else {
                    original
                }
            })
        })
    }

    pub fn delete(&self, key: &RowKey) -> StoreResult<Mutation> {
        self.mutate(key, |_| None)
    }

    /// Update every row matching `condition` through keyed mutations.
    pub fn update_where(
        &self,
        condition: &Condition,
        at: DateTime<Utc>,
        apply: impl Fn(&mut R),
    ) -> StoreResult<usize> {
        let rows = self.query(&Query::new(condition.clone()))?;
        let mut changed = 0;
        for row in rows {
            if self.update(&row.key(), at, &apply)? != Mutation::Unchanged {
                changed += 1;
            }
        }
        Ok(changed)
    }
}
