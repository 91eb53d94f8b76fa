use warden_core::condition::columns;
use warden_core::{Condition, InstanceId, OrgId, TextOperation, UserId};
use warden_identity::UserState;

use crate::projections::user::{UserMetadataRow, UserRow};
use crate::read_model::ProjectionTables;
use crate::repository::{Repository, instance_condition};

pub type UserRepository<'a> = Repository<'a, UserRow>;
pub type UserMetadataRepository<'a> = Repository<'a, UserMetadataRow>;

impl<'a> Repository<'a, UserRow> {
    pub fn users(tables: &'a ProjectionTables) -> Self {
        Self::new(tables.users())
    }

    pub fn primary_key_condition(instance_id: &InstanceId, user_id: &UserId) -> Condition {
        instance_condition(instance_id).and_also(Condition::equal(columns::ID, user_id))
    }

    pub fn org_condition(org_id: &OrgId) -> Condition {
        Condition::equal(columns::ORG_ID, org_id)
    }

    pub fn username_condition(op: TextOperation, username: &str) -> Condition {
        Condition::text(UserRow::USERNAME, op, username)
    }

    /// Matches the current email, verified or not.
    pub fn email_condition(op: TextOperation, email: &str) -> Condition {
        Condition::text(UserRow::EMAIL, op, email)
    }

    pub fn first_name_condition(op: TextOperation, name: &str) -> Condition {
        Condition::text(UserRow::FIRST_NAME, op, name)
    }

    pub fn last_name_condition(op: TextOperation, name: &str) -> Condition {
        Condition::text(UserRow::LAST_NAME, op, name)
    }

    pub fn display_name_condition(op: TextOperation, name: &str) -> Condition {
        Condition::text(UserRow::DISPLAY_NAME, op, name)
    }

    pub fn state_condition(state: UserState) -> Condition {
        Condition::equal(columns::STATE, state.as_str())
    }

    pub fn human_condition() -> Condition {
        Condition::equal(UserRow::TYPE, "human")
    }

    pub fn machine_condition() -> Condition {
        Condition::equal(UserRow::TYPE, "machine")
    }
}

impl<'a> Repository<'a, UserMetadataRow> {
    pub fn user_metadata(tables: &'a ProjectionTables) -> Self {
        Self::new(tables.user_metadata())
    }

    pub fn primary_key_condition(
        instance_id: &InstanceId,
        user_id: &UserId,
        key: &str,
    ) -> Condition {
        instance_condition(instance_id)
            .and_also(Self::user_condition(user_id))
            .and_also(Condition::equal(UserMetadataRow::KEY, key))
    }

    pub fn user_condition(user_id: &UserId) -> Condition {
        Condition::equal(UserMetadataRow::USER_ID, user_id)
    }

    pub fn org_condition(org_id: &OrgId) -> Condition {
        Condition::equal(columns::ORG_ID, org_id)
    }

    pub fn key_condition(op: TextOperation, key: &str) -> Condition {
        Condition::text(UserMetadataRow::KEY, op, key)
    }
}
