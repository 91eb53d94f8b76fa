//! Repository facade: typed Get/List/Delete over the projection tables.
//!
//! Every call must restrict `instance_id` with an equality; a condition that
//! could reach across tenants is rejected before storage is touched. Reads
//! return whatever is committed right now and never wait on reducers.

use thiserror::Error;

use warden_core::condition::columns;
use warden_core::{Column, Condition, InstanceId, Query};
use warden_identity::IdpType;

use crate::read_model::{Row, StoreError, Table};

pub mod authorization;
pub mod idp;
pub mod instance;
pub mod organization;
pub mod project;
pub mod session;
pub mod settings;
pub mod user;

pub use authorization::AuthorizationRepository;
pub use idp::{IdpDetails, IdpRepository};
pub use instance::{InstanceDomainRepository, InstanceRepository};
pub use organization::{OrgDomainRepository, OrgMetadataRepository, OrgRepository};
pub use project::{ProjectGrantRepository, ProjectRepository, ProjectRoleRepository};
pub use session::SessionRepository;
pub use settings::SettingsRepository;
pub use user::{UserMetadataRepository, UserRepository};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("no {table} row matches the condition")]
    NotFound { table: &'static str },

    #[error("more than one {table} row matches the condition")]
    Ambiguous { table: &'static str },

    #[error("condition must restrict {0} by equality")]
    MissingCondition(Column),

    #[error("identity provider is {actual}, not {expected}")]
    IdpTypeMismatch { expected: IdpType, actual: IdpType },

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl RepositoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound { .. })
    }

    /// Whether polling the same read again may give a different answer.
    pub fn is_transient(&self) -> bool {
        match self {
            RepositoryError::NotFound { .. } => true,
            RepositoryError::Storage(err) => err.is_transient(),
            _ => false,
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Typed access to one projection table.
pub struct Repository<'a, R: Row> {
    table: Table<'a, R>,
}

impl<'a, R: Row> Repository<'a, R> {
    pub fn new(table: Table<'a, R>) -> Self {
        Self { table }
    }

    /// The single row matching `condition`. Several matches are an error,
    /// never an arbitrary pick.
    pub fn get(&self, condition: &Condition) -> RepositoryResult<R> {
        require_instance(condition)?;
        let query = Query::new(condition.clone())
            .order_by_asc(columns::ID)
            .limit(2);
        let mut rows = self.table.query(&query)?;
        if rows.len() > 1 {
            return Err(RepositoryError::Ambiguous { table: R::TABLE });
        }
        rows.pop().ok_or(RepositoryError::NotFound { table: R::TABLE })
    }

    /// Every matching row. No match is an empty list, not an error.
    pub fn list(&self, query: impl Into<Query>) -> RepositoryResult<Vec<R>> {
        let query = query.into();
        require_instance(query.condition())?;
        Ok(self.table.query(&query)?)
    }

    /// Delete every matching row, returning how many went away.
    pub fn delete(&self, condition: &Condition) -> RepositoryResult<usize> {
        require_instance(condition)?;
        Ok(self.table.delete_where(condition)?)
    }

    /// Rows of one instance, oldest first.
    pub fn list_in_instance(&self, instance_id: &InstanceId) -> RepositoryResult<Vec<R>> {
        let query = Query::new(instance_condition(instance_id))
            .order_by_asc(columns::CREATED_AT)
            .order_by_asc(columns::ID);
        self.list(query)
    }
}

pub fn instance_condition(instance_id: &InstanceId) -> Condition {
    Condition::equal(columns::INSTANCE_ID, instance_id)
}

fn require_instance(condition: &Condition) -> RepositoryResult<()> {
    if condition.pins(&columns::INSTANCE_ID) {
        Ok(())
    } else {
        Err(RepositoryError::MissingCondition(columns::INSTANCE_ID))
    }
}
