use std::sync::Arc;

use tracing::info;

use warden_core::InstanceId;

use crate::projections::authorization::AuthorizationRow;
use crate::projections::cascade::RemovalRow;
use crate::projections::idp::IdpRow;
use crate::projections::instance::{InstanceDomainRow, InstanceRow};
use crate::projections::organization::{OrgDomainRow, OrgMetadataRow, OrgRow};
use crate::projections::project::{ProjectGrantRow, ProjectRoleRow, ProjectRow};
use crate::projections::session::SessionRow;
use crate::projections::settings::SettingsRow;
use crate::projections::user::{UserMetadataRow, UserRow};
use crate::read_model::store::{InMemoryProjectionStore, ProjectionStore, StoreResult};
use crate::read_model::table::Table;
use crate::retry::RetryPolicy;

/// The storage handle threaded through every reducer and repository call.
///
/// Cloning is cheap; clones share the underlying stores.
#[derive(Clone)]
pub struct ProjectionTables {
    pub instances: Arc<dyn ProjectionStore<InstanceRow>>,
    pub instance_domains: Arc<dyn ProjectionStore<InstanceDomainRow>>,
    pub organizations: Arc<dyn ProjectionStore<OrgRow>>,
    pub org_domains: Arc<dyn ProjectionStore<OrgDomainRow>>,
    pub org_metadata: Arc<dyn ProjectionStore<OrgMetadataRow>>,
    pub projects: Arc<dyn ProjectionStore<ProjectRow>>,
    pub project_roles: Arc<dyn ProjectionStore<ProjectRoleRow>>,
    pub project_grants: Arc<dyn ProjectionStore<ProjectGrantRow>>,
    pub users: Arc<dyn ProjectionStore<UserRow>>,
    pub user_metadata: Arc<dyn ProjectionStore<UserMetadataRow>>,
    pub authorizations: Arc<dyn ProjectionStore<AuthorizationRow>>,
    pub sessions: Arc<dyn ProjectionStore<SessionRow>>,
    pub idps: Arc<dyn ProjectionStore<IdpRow>>,
    pub settings: Arc<dyn ProjectionStore<SettingsRow>>,
    pub removals: Arc<dyn ProjectionStore<RemovalRow>>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ProjectionTables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionTables")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ProjectionTables {
    /// Fresh in-memory tables for tests/dev.
    pub fn in_memory(retry: RetryPolicy) -> Self {
        Self {
            instances: Arc::new(InMemoryProjectionStore::new()),
            instance_domains: Arc::new(InMemoryProjectionStore::new()),
            organizations: Arc::new(InMemoryProjectionStore::new()),
            org_domains: Arc::new(InMemoryProjectionStore::new()),
            org_metadata: Arc::new(InMemoryProjectionStore::new()),
            projects: Arc::new(InMemoryProjectionStore::new()),
            project_roles: Arc::new(InMemoryProjectionStore::new()),
            project_grants: Arc::new(InMemoryProjectionStore::new()),
            users: Arc::new(InMemoryProjectionStore::new()),
            user_metadata: Arc::new(InMemoryProjectionStore::new()),
            authorizations: Arc::new(InMemoryProjectionStore::new()),
            sessions: Arc::new(InMemoryProjectionStore::new()),
            idps: Arc::new(InMemoryProjectionStore::new()),
            settings: Arc::new(InMemoryProjectionStore::new()),
            removals: Arc::new(InMemoryProjectionStore::new()),
            retry,
        }
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn instances(&self) -> Table<'_, InstanceRow> {
        Table::new(self.instances.as_ref(), &self.retry)
    }

    pub fn instance_domains(&self) -> Table<'_, InstanceDomainRow> {
        Table::new(self.instance_domains.as_ref(), &self.retry)
    }

    pub fn organizations(&self) -> Table<'_, OrgRow> {
        Table::new(self.organizations.as_ref(), &self.retry)
    }

    pub fn org_domains(&self) -> Table<'_, OrgDomainRow> {
        Table::new(self.org_domains.as_ref(), &self.retry)
    }

    pub fn org_metadata(&self) -> Table<'_, OrgMetadataRow> {
        Table::new(self.org_metadata.as_ref(), &self.retry)
    }

    pub fn projects(&self) -> Table<'_, ProjectRow> {
        Table::new(self.projects.as_ref(), &self.retry)
    }

    pub fn project_roles(&self) -> Table<'_, ProjectRoleRow> {
        Table::new(self.project_roles.as_ref(), &self.retry)
    }

    pub fn project_grants(&self) -> Table<'_, ProjectGrantRow> {
        Table::new(self.project_grants.as_ref(), &self.retry)
    }

    pub fn users(&self) -> Table<'_, UserRow> {
        Table::new(self.users.as_ref(), &self.retry)
    }

    pub fn user_metadata(&self) -> Table<'_, UserMetadataRow> {
        Table::new(self.user_metadata.as_ref(), &self.retry)
    }

    pub fn authorizations(&self) -> Table<'_, AuthorizationRow> {
        Table::new(self.authorizations.as_ref(), &self.retry)
    }

    pub fn sessions(&self) -> Table<'_, SessionRow> {
        Table::new(self.sessions.as_ref(), &self.retry)
    }

    pub fn idps(&self) -> Table<'_, IdpRow> {
        Table::new(self.idps.as_ref(), &self.retry)
    }

    pub fn settings(&self) -> Table<'_, SettingsRow> {
        Table::new(self.settings.as_ref(), &self.retry)
    }

    pub fn removals(&self) -> Table<'_, RemovalRow> {
        Table::new(self.removals.as_ref(), &self.retry)
    }

    /// Drop every row of `instance_id` from every table, children first.
    /// Removal markers go too, so a replay starts from nothing.
    pub fn clear_instance(&self, instance_id: &InstanceId) -> StoreResult<usize> {
        let retry = &self.retry;
        let removed: usize = [
            retry.storage(|| self.sessions.clear_instance(instance_id))?,
            retry.storage(|| self.authorizations.clear_instance(instance_id))?,
            retry.storage(|| self.user_metadata.clear_instance(instance_id))?,
            retry.storage(|| self.users.clear_instance(instance_id))?,
            retry.storage(|| self.project_grants.clear_instance(instance_id))?,
            retry.storage(|| self.project_roles.clear_instance(instance_id))?,
            retry.storage(|| self.projects.clear_instance(instance_id))?,
            retry.storage(|| self.idps.clear_instance(instance_id))?,
            retry.storage(|| self.settings.clear_instance(instance_id))?,
            retry.storage(|| self.org_metadata.clear_instance(instance_id))?,
            retry.storage(|| self.org_domains.clear_instance(instance_id))?,
            retry.storage(|| self.organizations.clear_instance(instance_id))?,
            retry.storage(|| self.instance_domains.clear_instance(instance_id))?,
            retry.storage(|| self.instances.clear_instance(instance_id))?,
            retry.storage(|| self.removals.clear_instance(instance_id))?,
        ]
        .into_iter()
        .sum();

        info!(instance_id = %instance_id, removed, "cleared instance projections");
        Ok(removed)
    }
}
