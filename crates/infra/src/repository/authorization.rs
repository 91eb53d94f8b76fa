use warden_core::condition::columns;
use warden_core::{AuthorizationId, Condition, InstanceId, OrgId, ProjectGrantId, ProjectId, UserId};
use warden_identity::LifecycleState;

use crate::projections::authorization::AuthorizationRow;
use crate::read_model::ProjectionTables;
use crate::repository::{Repository, instance_condition};

pub type AuthorizationRepository<'a> = Repository<'a, AuthorizationRow>;

impl<'a> Repository<'a, AuthorizationRow> {
    pub fn authorizations(tables: &'a ProjectionTables) -> Self {
        Self::new(tables.authorizations())
    }

    pub fn primary_key_condition(instance_id: &InstanceId, id: &AuthorizationId) -> Condition {
        instance_condition(instance_id).and_also(Condition::equal(columns::ID, id))
    }

    pub fn org_condition(org_id: &OrgId) -> Condition {
        Condition::equal(columns::ORG_ID, org_id)
    }

    pub fn user_condition(user_id: &UserId) -> Condition {
        Condition::equal(AuthorizationRow::USER_ID, user_id)
    }

    pub fn project_condition(project_id: &ProjectId) -> Condition {
        Condition::equal(AuthorizationRow::PROJECT_ID, project_id)
    }

    pub fn grant_condition(grant_id: &ProjectGrantId) -> Condition {
        Condition::equal(AuthorizationRow::GRANT_ID, grant_id)
    }

    pub fn role_condition(key: &str) -> Condition {
        Condition::list_contains(AuthorizationRow::ROLES, key)
    }

    pub fn state_condition(state: LifecycleState) -> Condition {
        Condition::equal(columns::STATE, state.as_str())
    }
}
