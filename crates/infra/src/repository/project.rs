use warden_core::condition::columns;
use warden_core::{Condition, InstanceId, OrgId, ProjectGrantId, ProjectId, TextOperation};
use warden_identity::LifecycleState;

use crate::projections::project::{ProjectGrantRow, ProjectRoleRow, ProjectRow};
use crate::read_model::ProjectionTables;
use crate::repository::{Repository, instance_condition};

pub type ProjectRepository<'a> = Repository<'a, ProjectRow>;
pub type ProjectRoleRepository<'a> = Repository<'a, ProjectRoleRow>;
pub type ProjectGrantRepository<'a> = Repository<'a, ProjectGrantRow>;

impl<'a> Repository<'a, ProjectRow> {
    pub fn projects(tables: &'a ProjectionTables) -> Self {
        Self::new(tables.projects())
    }

    pub fn primary_key_condition(instance_id: &InstanceId, project_id: &ProjectId) -> Condition {
        instance_condition(instance_id).and_also(Condition::equal(columns::ID, project_id))
    }

    pub fn org_condition(org_id: &OrgId) -> Condition {
        Condition::equal(columns::ORG_ID, org_id)
    }

    pub fn name_condition(op: TextOperation, name: &str) -> Condition {
        Condition::text(ProjectRow::NAME, op, name)
    }

    pub fn state_condition(state: LifecycleState) -> Condition {
        Condition::equal(columns::STATE, state.as_str())
    }
}

impl<'a> Repository<'a, ProjectRoleRow> {
    pub fn project_roles(tables: &'a ProjectionTables) -> Self {
        Self::new(tables.project_roles())
    }

    pub fn primary_key_condition(
        instance_id: &InstanceId,
        project_id: &ProjectId,
        key: &str,
    ) -> Condition {
        instance_condition(instance_id)
            .and_also(Self::project_condition(project_id))
            .and_also(Condition::equal(ProjectRoleRow::KEY, key))
    }

    pub fn project_condition(project_id: &ProjectId) -> Condition {
        Condition::equal(ProjectRoleRow::PROJECT_ID, project_id)
    }

    pub fn key_condition(op: TextOperation, key: &str) -> Condition {
        Condition::text(ProjectRoleRow::KEY, op, key)
    }

    pub fn display_name_condition(op: TextOperation, name: &str) -> Condition {
        Condition::text(ProjectRoleRow::DISPLAY_NAME, op, name)
    }

    pub fn group_condition(op: TextOperation, group: &str) -> Condition {
        Condition::text(ProjectRoleRow::GROUP, op, group)
    }
}

impl<'a> Repository<'a, ProjectGrantRow> {
    pub fn project_grants(tables: &'a ProjectionTables) -> Self {
        Self::new(tables.project_grants())
    }

    pub fn primary_key_condition(instance_id: &InstanceId, grant_id: &ProjectGrantId) -> Condition {
        instance_condition(instance_id).and_also(Condition::equal(columns::ID, grant_id))
    }

    pub fn project_condition(project_id: &ProjectId) -> Condition {
        Condition::equal(ProjectGrantRow::PROJECT_ID, project_id)
    }

    pub fn granted_org_condition(org_id: &OrgId) -> Condition {
        Condition::equal(ProjectGrantRow::GRANTED_ORG_ID, org_id)
    }

    pub fn role_key_condition(key: &str) -> Condition {
        Condition::list_contains(ProjectGrantRow::ROLE_KEYS, key)
    }
}
