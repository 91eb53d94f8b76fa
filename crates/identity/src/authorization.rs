//! Authorization aggregate ("user grant"): a user's roles on a project.

use serde::{Deserialize, Serialize};

use warden_core::{ProjectGrantId, ProjectId, UserId};
use warden_events::event_union;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationAdded {
    pub user_id: UserId,
    pub project_id: ProjectId,
    #[serde(default)]
    pub project_grant_id: Option<ProjectGrantId>,
    #[serde(default)]
    pub role_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationChanged {
    pub role_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationLifecycle {}

event_union! {
    pub enum AuthorizationEvent {
        Added(AuthorizationAdded) = "authorization.added",
        Changed(AuthorizationChanged) = "authorization.changed" | "authorization.cascade.changed",
        Deactivated(AuthorizationLifecycle) = "authorization.deactivated",
        Reactivated(AuthorizationLifecycle) = "authorization.reactivated",
        Removed(AuthorizationLifecycle) = "authorization.removed" | "authorization.cascade.removed",
    }
}
