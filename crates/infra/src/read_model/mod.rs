//! Projection storage: keyed, versioned, tenant-scoped tables.

pub mod store;
pub mod table;
pub mod tables;

pub use store::{
    Expected, InMemoryProjectionStore, ProjectionStore, Row, RowKey, StoreError, StoreResult,
    Versioned,
};
pub use table::{Mutation, Table};
pub use tables::ProjectionTables;
