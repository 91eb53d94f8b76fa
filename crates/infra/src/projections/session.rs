//! Session projection: factors, challenges and metadata per session.
//!
//! Credential changes on the user aggregate invalidate the matching factor
//! of every session of that user; deactivating or locking the user ends
//! them.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use warden_core::condition::columns;
use warden_core::{Column, Condition, InstanceId, OrgId, Record, SessionId, UserId, Value};
use warden_events::{AggregateKind, EventEnvelope, event_union};
use warden_identity::SessionEvent;
use warden_identity::session::{UserAgent, UserVerification};
use warden_identity::user::{HumanPasswordChanged, UserLifecycle};

use crate::projections::{Reducer, ReducerError, routes_of};
use crate::read_model::{ProjectionTables, Row, RowKey};

// ─────────────────────────────────────────────────────────────────────────────
// Read Model
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorKind {
    User,
    Password,
    Intent,
    Passkey,
    Totp,
    OtpSms,
    OtpEmail,
    RecoveryCode,
}

impl FactorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactorKind::User => "user",
            FactorKind::Password => "password",
            FactorKind::Intent => "intent",
            FactorKind::Passkey => "passkey",
            FactorKind::Totp => "totp",
            FactorKind::OtpSms => "otp_sms",
            FactorKind::OtpEmail => "otp_email",
            FactorKind::RecoveryCode => "recovery_code",
        }
    }
}

/// An authentication method the session has satisfied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFactor {
    pub kind: FactorKind,
    pub last_verified_at: DateTime<Utc>,
    /// Only meaningful for passkeys.
    pub user_verified: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Challenge {
    Passkey {
        challenge: String,
        allowed_credential_ids: Vec<String>,
        user_verification: UserVerification,
        rp_id: String,
    },
    OtpSms {
        return_code: bool,
    },
    OtpEmail {
        return_code: bool,
        url_template: Option<String>,
    },
}

impl Challenge {
    /// Factor that answers this challenge.
    pub fn answered_by(&self) -> FactorKind {
        match self {
            Challenge::Passkey { .. } => FactorKind::Passkey,
            Challenge::OtpSms { .. } => FactorKind::OtpSms,
            Challenge::OtpEmail { .. } => FactorKind::OtpEmail,
        }
    }
}

/// A verification artifact waiting for its answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChallenge {
    pub challenge: Challenge,
    pub challenged_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRow {
    pub instance_id: InstanceId,
    pub id: SessionId,
    pub creator: Option<String>,
    pub user_agent: Option<UserAgent>,
    pub user_id: Option<UserId>,
    pub user_org_id: Option<OrgId>,
    pub preferred_language: Option<String>,
    pub token_id: Option<String>,
    pub lifetime_secs: Option<i64>,
    pub expiration: Option<DateTime<Utc>>,
    /// First-satisfied order.
    pub factors: Vec<SessionFactor>,
    pub challenges: Vec<PendingChallenge>,
    pub metadata: BTreeMap<String, Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRow {
    pub const USER_ID: Column = Column::new("user_id");
    pub const USER_ORG_ID: Column = Column::new("user_org_id");
    pub const CREATOR: Column = Column::new("creator");
    pub const TOKEN_ID: Column = Column::new("token_id");
    pub const EXPIRATION: Column = Column::new("expiration");
    /// Kinds of the satisfied factors, for `ListContains` conditions.
    pub const FACTORS: Column = Column::new("factors");

    pub fn factor(&self, kind: FactorKind) -> Option<&SessionFactor> {
        self.factors.iter().find(|f| f.kind == kind)
    }

    pub fn challenge(&self, kind: FactorKind) -> Option<&PendingChallenge> {
        self.challenges.iter().find(|c| c.challenge.answered_by() == kind)
    }

    fn satisfy(&mut self, kind: FactorKind, at: DateTime<Utc>, user_verified: Option<bool>) {
        match self.factors.iter_mut().find(|f| f.kind == kind) {
            Some(factor) => {
                factor.last_verified_at = at;
                factor.user_verified = user_verified;
            }
            None => self.factors.push(SessionFactor {
                kind,
                last_verified_at: at,
                user_verified,
            }),
        }
        self.challenges.retain(|c| c.challenge.answered_by() != kind);
    }

    fn set_challenge(
        &mut self,
        challenge: Challenge,
        at: DateTime<Utc>,
        expires_in: Option<Duration>,
    ) {
        let kind = challenge.answered_by();
        self.challenges.retain(|c| c.challenge.answered_by() != kind);
        self.challenges.push(PendingChallenge {
            challenge,
            challenged_at: at,
            expires_at: expires_in.map(|d| at + d),
        });
    }
}

impl Record for SessionRow {
    fn value(&self, column: &Column) -> Option<Value> {
        Some(match column.name() {
            "instance_id" => (&self.instance_id).into(),
            "id" => (&self.id).into(),
            "creator" => self.creator.as_ref().into(),
            "user_id" => self.user_id.as_ref().into(),
            "user_org_id" => self.user_org_id.as_ref().into(),
            "token_id" => self.token_id.as_ref().into(),
            "expiration" => self.expiration.into(),
            "factors" => Value::TextList(
                self.factors
                    .iter()
                    .map(|f| f.kind.as_str().to_string())
                    .collect(),
            ),
            "created_at" => self.created_at.into(),
            "updated_at" => self.updated_at.into(),
            _ => return None,
        })
    }
}

impl Row for SessionRow {
    const TABLE: &'static str = "sessions";

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
    /// User events that invalidate sessions.
    enum SessionUserEvent {
        PasswordChanged(HumanPasswordChanged) = "user.human.password.changed",
        Deactivated(UserLifecycle) = "user.deactivated",
        Locked(UserLifecycle) = "user.locked",
    }
}

#[derive(Debug, Default)]
pub struct SessionProjection;

impl Reducer for SessionProjection {
    fn name(&self) -> &'static str {
        "sessions"
    }

    fn routes(&self) -> Vec<(AggregateKind, &'static str)> {
        let mut routes = routes_of::<SessionEvent>();
        routes.extend(routes_of::<SessionUserEvent>());
        routes
    }

    fn reduce(
        &self,
        tables: &ProjectionTables,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ReducerError> {
        match envelope.aggregate_type() {
            AggregateKind::User => reduce_user(tables, envelope),
            _ => reduce_session(tables, envelope),
        }
    }
}

fn reduce_session(
    tables: &ProjectionTables,
    envelope: &EventEnvelope<JsonValue>,
) -> Result<(), ReducerError> {
    let envelope = envelope.decode::<SessionEvent>()?;
    let instance_id = envelope.instance_id().clone();
    let session_id = SessionId::from(envelope.aggregate_id());
    let creator = envelope.creator().map(str::to_string);
    let at = envelope.created_at();
    let key = RowKey::new(instance_id.clone(), session_id.as_str());
    let sessions = tables.sessions();

    match envelope.into_payload() {
        SessionEvent::Added(e) => {
            sessions.upsert(
                &key,
                || SessionRow {
                    instance_id: instance_id.clone(),
                    id: session_id.clone(),
                    creator: creator.clone(),
                    user_agent: e.user_agent.clone(),
                    user_id: None,
                    user_org_id: None,
                    preferred_language: None,
                    token_id: None,
                    lifetime_secs: None,
                    expiration: None,
                    factors: Vec::new(),
                    challenges: Vec::new(),
                    metadata: BTreeMap::new(),
                    created_at: at,
                    updated_at: at,
                },
                |row| {
                    row.user_agent = e.user_agent.clone();
                    row.updated_at = at;
                },
            )?;
        }
        SessionEvent::UserChecked(e) => {
            sessions.update(&key, at, |row| {
                row.user_id = Some(e.user_id.clone());
                row.user_org_id = Some(e.user_org_id.clone());
                if e.preferred_language.is_some() {
                    row.preferred_language = e.preferred_language.clone();
                }
                row.satisfy(FactorKind::User, e.checked_at, None);
            })?;
        }
        SessionEvent::PasswordChecked(e) => {
            sessions.update(&key, at, |row| row.satisfy(FactorKind::Password, e.checked_at, None))?;
        }
        SessionEvent::IntentChecked(e) => {
            sessions.update(&key, at, |row| row.satisfy(FactorKind::Intent, e.checked_at, None))?;
        }
        SessionEvent::PasskeyChecked(e) => {
            sessions.update(&key, at, |row| {
                row.satisfy(FactorKind::Passkey, e.checked_at, Some(e.user_verified))
            })?;
        }
        SessionEvent::TotpChecked(e) => {
            sessions.update(&key, at, |row| row.satisfy(FactorKind::Totp, e.checked_at, None))?;
        }
        SessionEvent::OtpSmsChecked(e) => {
            sessions.update(&key, at, |row| row.satisfy(FactorKind::OtpSms, e.checked_at, None))?;
        }
        SessionEvent::OtpEmailChecked(e) => {
            sessions.update(&key, at, |row| row.satisfy(FactorKind::OtpEmail, e.checked_at, None))?;
        }
        SessionEvent::RecoveryCodeChecked(e) => {
            sessions.update(&key, at, |row| {
                row.satisfy(FactorKind::RecoveryCode, e.checked_at, None)
            })?;
        }
        SessionEvent::PasskeyChallenged(e) => {
            let challenge = Challenge::Passkey {
                challenge: e.challenge,
                allowed_credential_ids: e.allowed_credential_ids,
                user_verification: e.user_verification,
                rp_id: e.rp_id,
            };
            sessions.update(&key, at, |row| row.set_challenge(challenge.clone(), at, None))?;
        }
        SessionEvent::OtpSmsChallenged(e) => {
            let challenge = Challenge::OtpSms {
                return_code: e.return_code,
            };
            let expiry = Duration::seconds(e.expiry_secs);
            sessions.update(&key, at, |row| {
                row.set_challenge(challenge.clone(), at, Some(expiry))
            })?;
        }
        SessionEvent::OtpEmailChallenged(e) => {
            let challenge = Challenge::OtpEmail {
                return_code: e.return_code,
                url_template: e.url_template,
            };
            let expiry = Duration::seconds(e.expiry_secs);
            sessions.update(&key, at, |row| {
                row.set_challenge(challenge.clone(), at, Some(expiry))
            })?;
        }
        SessionEvent::TokenSet(e) => {
            sessions.update(&key, at, |row| row.token_id = Some(e.token_id.clone()))?;
        }
        SessionEvent::MetadataSet(e) => {
            sessions.update(&key, at, |row| {
                for (k, v) in &e.metadata {
                    if v.is_empty() {
                        row.metadata.remove(k);
                    } else {
                        row.metadata.insert(k.clone(), v.clone());
                    }
                }
            })?;
        }
        SessionEvent::LifetimeSet(e) => {
            sessions.update(&key, at, |row| {
                row.lifetime_secs = Some(e.lifetime_secs);
                row.expiration =
                    (e.lifetime_secs > 0).then(|| at + Duration::seconds(e.lifetime_secs));
            })?;
        }
        SessionEvent::Terminated(_) => {
            sessions.delete(&key)?;
        }
    }

    Ok(())
}

fn reduce_user(
    tables: &ProjectionTables,
    envelope: &EventEnvelope<JsonValue>,
) -> Result<(), ReducerError> {
    let envelope = envelope.decode::<SessionUserEvent>()?;
    let user_id = UserId::from(envelope.aggregate_id());
    let at = envelope.created_at();
    let of_user = Condition::equal(columns::INSTANCE_ID, envelope.instance_id())
        .and_also(Condition::equal(SessionRow::USER_ID, &user_id));
    let sessions = tables.sessions();

    match envelope.payload() {
        SessionUserEvent::PasswordChanged(_) => {
            let with_password = of_user.and_also(Condition::list_contains(
                SessionRow::FACTORS,
                FactorKind::Password.as_str(),
            ));
            // A check after the change already used the new password.
            let changed = sessions.update_where(&with_password, at, |row| {
                row.factors
                    .retain(|f| f.kind != FactorKind::Password || f.last_verified_at >= at)
            })?;
            debug!(user_id = %user_id, sessions = changed, "password factor invalidated");
        }
        SessionUserEvent::Deactivated(_) | SessionUserEvent::Locked(_) => {
            let ended = sessions.delete_where(&of_user)?;
            debug!(user_id = %user_id, sessions = ended, "sessions of disabled user ended");
        }
    }

    Ok(())
}
