use warden_core::condition::columns;
use warden_core::{Condition, InstanceId, OrgId};
use warden_identity::{LabelState, SettingsKind};

use crate::projections::settings::SettingsRow;
use crate::read_model::ProjectionTables;
use crate::repository::{Repository, instance_condition};

pub type SettingsRepository<'a> = Repository<'a, SettingsRow>;

impl<'a> Repository<'a, SettingsRow> {
    pub fn settings(tables: &'a ProjectionTables) -> Self {
        Self::new(tables.settings())
    }

    /// The row of `kind` in exactly one scope: the org's when `org_id` is
    /// set, the instance default otherwise.
    pub fn scope_condition(
        instance_id: &InstanceId,
        kind: SettingsKind,
        org_id: Option<&OrgId>,
    ) -> Condition {
        let scope = match org_id {
            Some(org_id) => Condition::equal(columns::ORG_ID, org_id),
            None => Self::is_default_condition(true),
        };
        instance_condition(instance_id)
            .and_also(Self::kind_condition(kind))
            .and_also(scope)
    }

    pub fn kind_condition(kind: SettingsKind) -> Condition {
        Condition::equal(SettingsRow::KIND, kind.as_str())
    }

    pub fn is_default_condition(is_default: bool) -> Condition {
        Condition::equal(SettingsRow::IS_DEFAULT, is_default)
    }

    pub fn org_condition(org_id: &OrgId) -> Condition {
        Condition::equal(columns::ORG_ID, org_id)
    }

    pub fn label_state_condition(state: LabelState) -> Condition {
        Condition::equal(SettingsRow::LABEL_STATE, state.as_str())
    }
}
