//! Session aggregate: authentication progress of one user agent.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_core::{OrgId, UserId};
use warden_events::event_union;

/// The client a session was started from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserAgent {
    #[serde(default)]
    pub fingerprint_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserVerification {
    Required,
    #[default]
    Preferred,
    Discouraged,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionAdded {
    #[serde(default)]
    pub user_agent: Option<UserAgent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUserChecked {
    pub user_id: UserId,
    pub user_org_id: OrgId,
    pub checked_at: DateTime<Utc>,
    #[serde(default)]
    pub preferred_language: Option<String>,
}

/// A factor was verified at `checked_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorChecked {
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasskeyChecked {
    pub checked_at: DateTime<Utc>,
    #[serde(default)]
    pub user_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasskeyChallenged {
    pub challenge: String,
    #[serde(default)]
    pub allowed_credential_ids: Vec<String>,
    #[serde(default)]
    pub user_verification: UserVerification,
    pub rp_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtpSmsChallenged {
    pub expiry_secs: i64,
    #[serde(default)]
    pub return_code: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtpEmailChallenged {
    pub expiry_secs: i64,
    #[serde(default)]
    pub return_code: bool,
    #[serde(default)]
    pub url_template: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    pub token_id: String,
}

/// Metadata entries to merge; an empty value deletes the key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataSet {
    #[serde(default)]
    pub metadata: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifetimeSet {
    pub lifetime_secs: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionTerminated {}

event_union! {
    pub enum SessionEvent {
        Added(SessionAdded) = "session.added",
        UserChecked(SessionUserChecked) = "session.user.checked",
        PasswordChecked(FactorChecked) = "session.password.checked",
        IntentChecked(FactorChecked) = "session.intent.checked",
        PasskeyChallenged(PasskeyChallenged) = "session.webauthn.challenged",
        PasskeyChecked(PasskeyChecked) = "session.webauthn.checked",
        TotpChecked(FactorChecked) = "session.totp.checked",
        OtpSmsChallenged(OtpSmsChallenged) = "session.otp.sms.challenged",
        OtpSmsChecked(FactorChecked) = "session.otp.sms.checked",
        OtpEmailChallenged(OtpEmailChallenged) = "session.otp.email.challenged",
        OtpEmailChecked(FactorChecked) = "session.otp.email.checked",
        RecoveryCodeChecked(FactorChecked) = "session.recoverycode.checked",
        TokenSet(TokenSet) = "session.token.set",
        MetadataSet(MetadataSet) = "session.metadata.set",
        LifetimeSet(LifetimeSet) = "session.lifetime.set",
        Terminated(SessionTerminated) = "session.terminated",
    }
}
