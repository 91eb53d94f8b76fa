//! Project aggregate with its roles and grants.

use serde::{Deserialize, Serialize};

use warden_core::{OrgId, ProjectGrantId};
use warden_events::event_union;

with_changes! {
    /// Authorization checks a project asks for at login.
    pub struct ProjectOptions / ProjectOptionChanges {
        #[serde(default)]
        pub project_role_assertion: bool,
        #[serde(default)]
        pub project_role_check: bool,
        #[serde(default)]
        pub has_project_check: bool,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectAdded {
    pub name: String,
    #[serde(flatten)]
    pub options: ProjectOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectChanged {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub options: ProjectOptionChanges,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectLifecycle {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRoleAdded {
    pub key: String,
    pub display_name: String,
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRoleChanged {
    pub key: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRoleRemoved {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectGrantAdded {
    pub grant_id: ProjectGrantId,
    pub granted_org_id: OrgId,
    #[serde(default)]
    pub role_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectGrantChanged {
    pub grant_id: ProjectGrantId,
    pub role_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectGrantRef {
    pub grant_id: ProjectGrantId,
}

event_union! {
    pub enum ProjectEvent {
        Added(ProjectAdded) = "project.added",
        Changed(ProjectChanged) = "project.changed",
        Deactivated(ProjectLifecycle) = "project.deactivated",
        Reactivated(ProjectLifecycle) = "project.reactivated",
        Removed(ProjectLifecycle) = "project.removed",
        RoleAdded(ProjectRoleAdded) = "project.role.added",
        RoleChanged(ProjectRoleChanged) = "project.role.changed",
        RoleRemoved(ProjectRoleRemoved) = "project.role.removed",
        GrantAdded(ProjectGrantAdded) = "project.grant.added",
        GrantChanged(ProjectGrantChanged) =
            "project.grant.changed" | "project.grant.cascade.changed",
        GrantDeactivated(ProjectGrantRef) = "project.grant.deactivated",
        GrantReactivated(ProjectGrantRef) = "project.grant.reactivated",
        GrantRemoved(ProjectGrantRef) = "project.grant.removed" | "project.grant.cascade.removed",
    }
}
