use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use thiserror::Error;

use warden_core::condition::columns;
use warden_core::{Condition, InstanceId, Query, Record};

/// Storage key of a projected row: `(instance, [scope,] id)`.
///
/// `scope` is the owning organization for org-scoped rows, or the parent id
/// for child rows keyed under another entity (project roles).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey {
    pub instance_id: InstanceId,
    pub scope: Option<String>,
    pub id: String,
}

impl RowKey {
    pub fn new(instance_id: InstanceId, id: impl Into<String>) -> Self {
        Self {
            instance_id,
            scope: None,
            id: id.into(),
        }
    }

    pub fn scoped(
        instance_id: InstanceId,
        scope: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            instance_id,
            scope: Some(scope.into()),
            id: id.into(),
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}/{}/{}", self.instance_id, scope, self.id),
            None => write!(f, "{}/{}", self.instance_id, self.id),
        }
    }
}

/// A projected row.
pub trait Row: Record + Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Table name, used in logs and errors.
    const TABLE: &'static str;

    fn key(&self) -> RowKey;

    /// Bump `UpdatedAt`.
    fn touch(&mut self, at: DateTime<Utc>);
}

/// A stored row plus the store's version counter for compare-and-swap.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<R> {
    pub row: R,
    pub version: u64,
}

/// Precondition for a write.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Expected {
    /// The key must not exist yet.
    Absent,
    /// The stored row must still carry this version.
    Version(u64),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("concurrent modification of {table} row {key}")]
    Conflict { table: &'static str, key: String },

    #[error("storage lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Multi-tenant keyed storage for one projection table.
///
/// Writes are compare-and-swap against the row version so concurrent reducers
/// on the same key never silently overwrite each other.
pub trait ProjectionStore<R: Row>: Send + Sync {
    fn get(&self, key: &RowKey) -> StoreResult<Option<Versioned<R>>>;

    /// Insert or replace `row`, returning its new version.
    fn put(&self, row: R, expected: Expected) -> StoreResult<u64>;

    fn remove(&self, key: &RowKey, version: u64) -> StoreResult<()>;

    fn query(&self, query: &Query) -> StoreResult<Vec<R>>;

    /// Delete every row matching `condition`, returning how many went.
    fn delete_where(&self, condition: &Condition) -> StoreResult<usize>;

    /// Clear all rows of an instance (rebuild support).
    fn clear_instance(&self, instance_id: &InstanceId) -> StoreResult<usize> {
        self.delete_where(&Condition::equal(columns::INSTANCE_ID, instance_id))
    }
}

impl<R, S> ProjectionStore<R> for Arc<S>
where
    R: Row,
    S: ProjectionStore<R> + ?Sized,
{
    fn get(&self, key: &RowKey) -> StoreResult<Option<Versioned<R>>> {
        (**self).get(key)
    }

    fn put(&self, row: R, expected: Expected) -> StoreResult<u64> {
        (**self).put(row, expected)
    }

    fn remove(&self, key: &RowKey, version: u64) -> StoreResult<()> {
        (**self).remove(key, version)
    }

    fn query(&self, query: &Query) -> StoreResult<Vec<R>> {
        (**self).query(query)
    }

    fn delete_where(&self, condition: &Condition) -> StoreResult<usize> {
        (**self).delete_where(condition)
    }

    fn clear_instance(&self, instance_id: &InstanceId) -> StoreResult<usize> {
        (**self).clear_instance(instance_id)
    }
}

/// In-memory store for tests/dev.
///
/// Rows are kept in key order, so unordered queries are still deterministic.
#[derive(Debug)]
pub struct InMemoryProjectionStore<R> {
    rows: RwLock<BTreeMap<RowKey, Versioned<R>>>,
    next_version: AtomicU64,
}

impl<R> InMemoryProjectionStore<R> {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            next_version: AtomicU64::new(1),
        }
    }
}

impl<R> Default for InMemoryProjectionStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Row> ProjectionStore<R> for InMemoryProjectionStore<R> {
    fn get(&self, key: &RowKey) -> StoreResult<Option<Versioned<R>>> {
        let rows = self.rows.read().map_err(|_| StoreError::Poisoned)?;
        Ok(rows.get(key).cloned())
    }

    fn put(&self, row: R, expected: Expected) -> StoreResult<u64> {
        let key = row.key();
        let mut rows = self.rows.write().map_err(|_| StoreError::Poisoned)?;

        let current = rows.get(&key).map(|stored| stored.version);
        let accepted = match expected {
            Expected::Absent => current.is_none(),
            Expected::Version(v) => current == Some(v),
        };
        if !accepted {
            return Err(StoreError::Conflict {
                table: R::TABLE,
                key: key.to_string(),
            });
        }

        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        rows.insert(key, Versioned { row, version });
        Ok(version)
    }

    fn remove(&self, key: &RowKey, version: u64) -> StoreResult<()> {
        let mut rows = self.rows.write().map_err(|_| StoreError::Poisoned)?;
        match rows.get(key) {
            Some(stored) if stored.version == version => {
                rows.remove(key);
                Ok(())
            }
            _ => Err(StoreError::Conflict {
                table: R::TABLE,
                key: key.to_string(),
            }),
        }
    }

    fn query(&self, query: &Query) -> StoreResult<Vec<R>> {
        let rows = self.rows.read().map_err(|_| StoreError::Poisoned)?;
        Ok(query.apply(rows.values().map(|stored| stored.row.clone())))
    }

    fn delete_where(&self, condition: &Condition) -> StoreResult<usize> {
        let mut rows = self.rows.write().map_err(|_| StoreError::Poisoned)?;
        let before = rows.len();
        rows.retain(|_, stored| !condition.matches(&stored.row));
        Ok(before - rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::{Column, Value};

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        instance_id: InstanceId,
        id: String,
        body: String,
        updated_at: DateTime<Utc>,
    }

    impl Record for Note {
        fn value(&self, column: &Column) -> Option<Value> {
            match column.name() {
                "instance_id" => Some((&self.instance_id).into()),
                "id" => Some(self.id.clone().into()),
                "body" => Some(self.body.clone().into()),
                _ => None,
            }
        }
    }

    impl Row for Note {
        const TABLE: &'static str = "notes";

        fn key(&self) -> RowKey {
            RowKey::new(self.instance_id.clone(), self.id.clone())
        }

        fn touch(&mut self, at: DateTime<Utc>) {
            self.updated_at = at;
        }
    }

    fn note(instance: &str, id: &str, body: &str) -> Note {
        Note {
            instance_id: InstanceId::from(instance),
            id: id.to_string(),
            body: body.to_string(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn put_requires_expected_version() {
        let store = InMemoryProjectionStore::new();
        let v1 = store.put(note("i1", "a", "one"), Expected::Absent).unwrap();

        let err = store.put(note("i1", "a", "dup"), Expected::Absent).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { table: "notes", .. }));

        let v2 = store.put(note("i1", "a", "two"), Expected::Version(v1)).unwrap();
        assert!(v2 > v1);

        let stale = store.put(note("i1", "a", "three"), Expected::Version(v1));
        assert!(stale.is_err());

        let key = RowKey::new(InstanceId::from("i1"), "a");
        assert_eq!(store.get(&key).unwrap().unwrap().row.body, "two");
    }

    #[test]
    fn remove_with_stale_version_conflicts() {
        let store = InMemoryProjectionStore::new();
        let v1 = store.put(note("i1", "a", "one"), Expected::Absent).unwrap();
        let key = RowKey::new(InstanceId::from("i1"), "a");

        assert!(store.remove(&key, v1 + 100).is_err());
        store.remove(&key, v1).unwrap();
        assert!(store.get(&key).unwrap().is_none());
    }

    #[test]
    fn clear_instance_only_touches_that_instance() {
        let store = InMemoryProjectionStore::new();
        store.put(note("i1", "a", "x"), Expected::Absent).unwrap();
        store.put(note("i1", "b", "y"), Expected::Absent).unwrap();
        store.put(note("i2", "a", "z"), Expected::Absent).unwrap();

        assert_eq!(store.clear_instance(&InstanceId::from("i1")).unwrap(), 2);

        let all = Query::new(Condition::is_not_null(columns::ID));
        let left = store.query(&all).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].instance_id.as_str(), "i2");
    }
}
