use chrono::{DateTime, Utc};

use warden_core::condition::columns;
use warden_core::{Condition, InstanceId, NumberOperation, OrgId, SessionId, TextOperation, UserId};

use crate::projections::session::{FactorKind, SessionRow};
use crate::read_model::ProjectionTables;
use crate::repository::{Repository, instance_condition};

pub type SessionRepository<'a> = Repository<'a, SessionRow>;

impl<'a> Repository<'a, SessionRow> {
    pub fn sessions(tables: &'a ProjectionTables) -> Self {
        Self::new(tables.sessions())
    }

    pub fn primary_key_condition(instance_id: &InstanceId, session_id: &SessionId) -> Condition {
        instance_condition(instance_id).and_also(Condition::equal(columns::ID, session_id))
    }

    pub fn user_condition(user_id: &UserId) -> Condition {
        Condition::equal(SessionRow::USER_ID, user_id)
    }

    pub fn user_org_condition(org_id: &OrgId) -> Condition {
        Condition::equal(SessionRow::USER_ORG_ID, org_id)
    }

    pub fn creator_condition(op: TextOperation, creator: &str) -> Condition {
        Condition::text(SessionRow::CREATOR, op, creator)
    }

    pub fn token_condition(token_id: &str) -> Condition {
        Condition::equal(SessionRow::TOKEN_ID, token_id)
    }

    /// Sessions whose expiration lies after `at`. Sessions without a
    /// lifetime never match.
    pub fn expires_after_condition(at: DateTime<Utc>) -> Condition {
        Condition::compare(SessionRow::EXPIRATION, NumberOperation::GreaterThan, at)
    }

    pub fn has_factor_condition(kind: FactorKind) -> Condition {
        Condition::list_contains(SessionRow::FACTORS, kind.as_str())
    }
}
