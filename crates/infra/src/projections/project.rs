//! Project projection: projects, their roles and the grants to other orgs.
//!
//! Role removal and grant changes also reach the authorizations that use
//! them; that half lives in the authorization projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use warden_core::condition::columns;
use warden_core::{Column, Condition, InstanceId, OrgId, ProjectGrantId, ProjectId, Record, Value};
use warden_events::{AggregateKind, EventEnvelope};
use warden_identity::project::ProjectOptions;
use warden_identity::{LifecycleState, ProjectEvent};

use crate::projections::cascade::CascadePlan;
use crate::projections::{Reducer, ReducerError, dedup_keys, require_org, routes_of};
use crate::read_model::{ProjectionTables, Row, RowKey};

// ─────────────────────────────────────────────────────────────────────────────
// Read Models
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRow {
    pub instance_id: InstanceId,
    pub org_id: OrgId,
    pub id: ProjectId,
    pub name: String,
    pub state: LifecycleState,
    pub options: ProjectOptions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectRow {
    pub const NAME: Column = Column::new("name");
}

impl Record for ProjectRow {
    fn value(&self, column: &Column) -> Option<Value> {
        Some(match column.name() {
            "instance_id" => (&self.instance_id).into(),
            "org_id" => (&self.org_id).into(),
            "id" | "project_id" => (&self.id).into(),
            "name" => (&self.name).into(),
            "state" => self.state.as_str().into(),
            "project_role_assertion" => self.options.project_role_assertion.into(),
            "project_role_check" => self.options.project_role_check.into(),
            "has_project_check" => self.options.has_project_check.into(),
            "created_at" => self.created_at.into(),
            "updated_at" => self.updated_at.into(),
            _ => return None,
        })
    }
}

impl Row for ProjectRow {
    const TABLE: &'static str = "projects";

    fn key(&self) -> RowKey {
        RowKey::new(self.instance_id.clone(), self.id.as_str())
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRoleRow {
    pub instance_id: InstanceId,
    pub org_id: OrgId,
    pub project_id: ProjectId,
    pub key: String,
    pub display_name: String,
    pub group: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectRoleRow {
    pub const PROJECT_ID: Column = Column::new("project_id");
    pub const KEY: Column = Column::new("key");
    pub const DISPLAY_NAME: Column = Column::new("display_name");
    pub const GROUP: Column = Column::new("group");
}

impl Record for ProjectRoleRow {
    fn value(&self, column: &Column) -> Option<Value> {
        Some(match column.name() {
            "instance_id" => (&self.instance_id).into(),
            "org_id" => (&self.org_id).into(),
            "project_id" => (&self.project_id).into(),
            "id" | "key" => (&self.key).into(),
            "display_name" => (&self.display_name).into(),
            "group" => self.group.as_ref().into(),
            "created_at" => self.created_at.into(),
            "updated_at" => self.updated_at.into(),
            _ => return None,
        })
    }
}

impl Row for ProjectRoleRow {
    const TABLE: &'static str = "project_roles";

    fn key(&self) -> RowKey {
        RowKey::scoped(self.instance_id.clone(), self.project_id.as_str(), self.key.clone())
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

/// A project shared with another organization, limited to `role_keys`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectGrantRow {
    pub instance_id: InstanceId,
    /// Organization owning the project.
    pub org_id: OrgId,
    pub id: ProjectGrantId,
    pub project_id: ProjectId,
    pub granted_org_id: OrgId,
    pub role_keys: Vec<String>,
    pub state: LifecycleState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectGrantRow {
    pub const PROJECT_ID: Column = Column::new("project_id");
    pub const GRANTED_ORG_ID: Column = Column::new("granted_org_id");
    pub const ROLE_KEYS: Column = Column::new("role_keys");
}

impl Record for ProjectGrantRow {
    fn value(&self, column: &Column) -> Option<Value> {
        Some(match column.name() {
            "instance_id" => (&self.instance_id).into(),
            "org_id" => (&self.org_id).into(),
            "id" | "grant_id" => (&self.id).into(),
            "project_id" => (&self.project_id).into(),
            "granted_org_id" => (&self.granted_org_id).into(),
            "role_keys" => self.role_keys.clone().into(),
            "state" => self.state.as_str().into(),
            "created_at" => self.created_at.into(),
            "updated_at" => self.updated_at.into(),
            _ => return None,
        })
    }
}

impl Row for ProjectGrantRow {
    const TABLE: &'static str = "project_grants";

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

#[derive(Debug, Default)]
pub struct ProjectProjection;

impl Reducer for ProjectProjection {
    fn name(&self) -> &'static str {
        "projects"
    }

    fn routes(&self) -> Vec<(AggregateKind, &'static str)> {
        routes_of::<ProjectEvent>()
    }

    fn reduce(
        &self,
        tables: &ProjectionTables,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ReducerError> {
        let org_id = require_org(envelope)?;
        let envelope = envelope.decode::<ProjectEvent>()?;
        let instance_id = envelope.instance_id().clone();
        let project_id = ProjectId::from(envelope.aggregate_id());
        let at = envelope.created_at();
        let key = RowKey::new(instance_id.clone(), project_id.as_str());
        let role_key = |role: &str| RowKey::scoped(instance_id.clone(), project_id.as_str(), role);
        let grant_key = |grant: &ProjectGrantId| RowKey::new(instance_id.clone(), grant.as_str());

        let projects = tables.projects();
        let roles = tables.project_roles();
        let grants = tables.project_grants();

        match envelope.into_payload() {
            ProjectEvent::Added(e) => {
                projects.upsert(
                    &key,
                    || ProjectRow {
                        instance_id: instance_id.clone(),
                        org_id: org_id.clone(),
                        id: project_id.clone(),
                        name: e.name.clone(),
                        state: LifecycleState::Active,
                        options: e.options.clone(),
                        created_at: at,
                        updated_at: at,
                    },
                    |row| {
                        row.name = e.name.clone();
                        row.options = e.options.clone();
                        row.updated_at = at;
                    },
                )?;
            }
            ProjectEvent::Changed(e) => {
                projects.update(&key, at, |row| {
                    if let Some(name) = &e.name {
                        row.name = name.clone();
                    }
                    e.options.clone().apply_to(&mut row.options);
                })?;
            }
            ProjectEvent::Deactivated(_) => {
                projects.update(&key, at, |row| row.state = LifecycleState::Inactive)?;
            }
            ProjectEvent::Reactivated(_) => {
                projects.update(&key, at, |row| row.state = LifecycleState::Active)?;
            }
            ProjectEvent::Removed(_) => {
                CascadePlan::project(instance_id.clone(), project_id.clone()).run(tables)?;
            }
            ProjectEvent::RoleAdded(e) => {
                roles.upsert(
                    &role_key(&e.key),
                    || ProjectRoleRow {
                        instance_id: instance_id.clone(),
                        org_id: org_id.clone(),
                        project_id: project_id.clone(),
                        key: e.key.clone(),
                        display_name: e.display_name.clone(),
                        group: e.group.clone(),
                        created_at: at,
                        updated_at: at,
                    },
                    |row| {
                        row.display_name = e.display_name.clone();
                        row.group = e.group.clone();
                        row.updated_at = at;
                    },
                )?;
            }
            ProjectEvent::RoleChanged(e) => {
                roles.update(&role_key(&e.key), at, |row| {
                    if let Some(display_name) = &e.display_name {
                        row.display_name = display_name.clone();
                    }
                    if let Some(group) = &e.group {
                        row.group = Some(group.clone());
                    }
                })?;
            }
            ProjectEvent::RoleRemoved(e) => {
                roles.delete(&role_key(&e.key))?;
                let granting_role = Condition::equal(columns::INSTANCE_ID, &instance_id)
                    .and_also(Condition::equal(ProjectGrantRow::PROJECT_ID, &project_id))
                    .and_also(Condition::list_contains(ProjectGrantRow::ROLE_KEYS, e.key.as_str()));
                grants.update_where(&granting_role, at, |row| {
                    row.role_keys.retain(|k| k != &e.key)
                })?;
            }
            ProjectEvent::GrantAdded(e) => {
                grants.upsert(
                    &grant_key(&e.grant_id),
                    || ProjectGrantRow {
                        instance_id: instance_id.clone(),
                        org_id: org_id.clone(),
                        id: e.grant_id.clone(),
                        project_id: project_id.clone(),
                        granted_org_id: e.granted_org_id.clone(),
                        role_keys: dedup_keys(e.role_keys.clone()),
                        state: LifecycleState::Active,
                        created_at: at,
                        updated_at: at,
                    },
                    |row| {
                        row.granted_org_id = e.granted_org_id.clone();
                        row.role_keys = dedup_keys(e.role_keys.clone());
                        row.updated_at = at;
                    },
                )?;
            }
            ProjectEvent::GrantChanged(e) => {
                grants.update(&grant_key(&e.grant_id), at, |row| {
                    row.role_keys = dedup_keys(e.role_keys.clone())
                })?;
            }
            ProjectEvent::GrantDeactivated(e) => {
                grants.update(&grant_key(&e.grant_id), at, |row| {
                    row.state = LifecycleState::Inactive
                })?;
            }
            ProjectEvent::GrantReactivated(e) => {
                grants.update(&grant_key(&e.grant_id), at, |row| {
                    row.state = LifecycleState::Active
                })?;
            }
            ProjectEvent::GrantRemoved(e) => {
                grants.delete(&grant_key(&e.grant_id))?;
            }
        }

        Ok(())
    }
}
