//! Authorization ("user grant") projection.
//!
//! Besides its own stream it follows the project events that shrink the set
//! of usable roles: a removed role is stripped from every authorization, a
//! changed grant restricts its authorizations to the grant's roles and a
//! removed grant takes its authorizations with it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use warden_core::condition::columns;
use warden_core::{
    AuthorizationId, Column, Condition, InstanceId, OrgId, ProjectGrantId, ProjectId, Record,
    UserId, Value,
};
use warden_events::{AggregateKind, EventEnvelope, event_union};
use warden_identity::project::{ProjectGrantChanged, ProjectGrantRef, ProjectRoleRemoved};
use warden_identity::{AuthorizationEvent, LifecycleState};

use crate::projections::{Reducer, ReducerError, dedup_keys, require_org, routes_of};
use crate::read_model::{ProjectionTables, Row, RowKey};

// ─────────────────────────────────────────────────────────────────────────────
// Read Model
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationRow {
    pub instance_id: InstanceId,
    /// Organization the authorization was granted in.
    pub org_id: OrgId,
    pub id: AuthorizationId,
    pub user_id: UserId,
    pub project_id: ProjectId,
    pub grant_id: Option<ProjectGrantId>,
    /// Role keys in the order they were granted.
    pub roles: Vec<String>,
    pub state: LifecycleState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AuthorizationRow {
    pub const USER_ID: Column = Column::new("user_id");
    pub const PROJECT_ID: Column = Column::new("project_id");
    pub const GRANT_ID: Column = Column::new("grant_id");
    pub const ROLES: Column = Column::new("roles");
}

impl Record for AuthorizationRow {
    fn value(&self, column: &Column) -> Option<Value> {
        Some(match column.name() {
            "instance_id" => (&self.instance_id).into(),
            "org_id" => (&self.org_id).into(),
            "id" => (&self.id).into(),
            "user_id" => (&self.user_id).into(),
            "project_id" => (&self.project_id).into(),
            "grant_id" => self.grant_id.as_ref().into(),
            "roles" => self.roles.clone().into(),
            "state" => self.state.as_str().into(),
            "created_at" => self.created_at.into(),
            "updated_at" => self.updated_at.into(),
            _ => return None,
        })
    }
}

impl Row for AuthorizationRow {
    const TABLE: &'static str = "authorizations";

    fn key(&self) -> RowKey {
        RowKey::new(self.instance_id.clone(), self.id.as_str())
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Projection
// ─────────────────────────────────────────────────────────────────────────────

event_union! {
    /// Project events that narrow existing authorizations.
    enum ProjectRoleEvent {
        RoleRemoved(ProjectRoleRemoved) = "project.role.removed",
        GrantChanged(ProjectGrantChanged) =
            "project.grant.changed" | "project.grant.cascade.changed",
        GrantRemoved(ProjectGrantRef) = "project.grant.removed" | "project.grant.cascade.removed",
    }
}

#[derive(Debug, Default)]
pub struct AuthorizationProjection;

impl Reducer for AuthorizationProjection {
    fn name(&self) -> &'static str {
        "authorizations"
    }

    fn routes(&self) -> Vec<(AggregateKind, &'static str)> {
        let mut routes = routes_of::<AuthorizationEvent>();
        routes.extend(routes_of::<ProjectRoleEvent>());
        routes
    }

    fn reduce(
        &self,
        tables: &ProjectionTables,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ReducerError> {
        match envelope.aggregate_type() {
            AggregateKind::Project => reduce_project(tables, envelope),
            _ => reduce_authorization(tables, envelope),
        }
    }
}

fn reduce_authorization(
    tables: &ProjectionTables,
    envelope: &EventEnvelope<JsonValue>,
) -> Result<(), ReducerError> {
    let org_id = require_org(envelope)?;
    let envelope = envelope.decode::<AuthorizationEvent>()?;
    let instance_id = envelope.instance_id().clone();
    let id = AuthorizationId::from(envelope.aggregate_id());
    let at = envelope.created_at();
    let key = RowKey::new(instance_id.clone(), id.as_str());
    let authorizations = tables.authorizations();

    match envelope.into_payload() {
        AuthorizationEvent::Added(e) => {
            authorizations.upsert(
                &key,
                || AuthorizationRow {
                    instance_id: instance_id.clone(),
                    org_id: org_id.clone(),
                    id: id.clone(),
                    user_id: e.user_id.clone(),
                    project_id: e.project_id.clone(),
                    grant_id: e.project_grant_id.clone(),
                    roles: dedup_keys(e.role_keys.clone()),
                    state: LifecycleState::Active,
                    created_at: at,
                    updated_at: at,
                },
                |row| {
                    row.roles = dedup_keys(e.role_keys.clone());
                    row.updated_at = at;
                },
            )?;
        }
        AuthorizationEvent::Changed(e) => {
            authorizations.update(&key, at, |row| row.roles = dedup_keys(e.role_keys.clone()))?;
        }
        AuthorizationEvent::Deactivated(_) => {
            authorizations.update(&key, at, |row| row.state = LifecycleState::Inactive)?;
        }
        AuthorizationEvent::Reactivated(_) => {
            authorizations.update(&key, at, |row| row.state = LifecycleState::Active)?;
        }
        AuthorizationEvent::Removed(_) => {
            authorizations.delete(&key)?;
        }
    }

    Ok(())
}

fn reduce_project(
    tables: &ProjectionTables,
    envelope: &EventEnvelope<JsonValue>,
) -> Result<(), ReducerError> {
    let envelope = envelope.decode::<ProjectRoleEvent>()?;
    let instance_id = envelope.instance_id().clone();
    let project_id = ProjectId::from(envelope.aggregate_id());
    let at = envelope.created_at();
    let authorizations = tables.authorizations();
    let in_project = Condition::equal(columns::INSTANCE_ID, &instance_id)
        .and_also(Condition::equal(AuthorizationRow::PROJECT_ID, &project_id));

    match envelope.into_payload() {
        ProjectRoleEvent::RoleRemoved(e) => {
            let holding = in_project
                .and_also(Condition::list_contains(AuthorizationRow::ROLES, e.key.as_str()));
            authorizations.update_where(&holding, at, |row| row.roles.retain(|k| k != &e.key))?;
        }
        ProjectRoleEvent::GrantChanged(e) => {
            let of_grant =
                in_project.and_also(Condition::equal(AuthorizationRow::GRANT_ID, &e.grant_id));
            authorizations.update_where(&of_grant, at, |row| {
                row.roles.retain(|k| e.role_keys.contains(k))
            })?;
        }
        ProjectRoleEvent::GrantRemoved(e) => {
            let of_grant =
                in_project.and_also(Condition::equal(AuthorizationRow::GRANT_ID, &e.grant_id));
            authorizations.delete_where(&of_grant)?;
        }
    }

    Ok(())
}
