//! Settings projection: one row per policy kind and scope.
//!
//! Instance rows are the defaults; an org row for the same kind shadows them
//! until the org resets it. Label settings keep two rows per scope, the
//! editable preview and the activated copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use warden_core::{Column, InstanceId, OrgId, Record, Value};
use warden_events::{AggregateKind, EventEnvelope};
use warden_identity::settings::{
    DomainSettings, LabelAssets, LabelSettings, LockoutSettings, LoginSettings,
    OrganizationSettings, PasswordComplexitySettings, PasswordExpirySettings,
    SecretGeneratorSettings, SecuritySettings,
};
use warden_identity::{LabelState, SettingsEvent, SettingsKind};

use crate::projections::{Reducer, ReducerError, org_scope, routes_of};
use crate::read_model::{ProjectionTables, Row, RowKey, Table};

// ─────────────────────────────────────────────────────────────────────────────
// Read Model
// ─────────────────────────────────────────────────────────────────────────────

/// Label settings together with the storage keys of their assets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelPolicy {
    pub settings: LabelSettings,
    pub assets: LabelAssets,
}

/// A settings type that can be pulled out of a [`SettingsPayload`].
pub trait SettingsVariant: Sized {
    const KIND: SettingsKind;

    fn from_payload(payload: SettingsPayload) -> Option<Self>;

    fn into_payload(self) -> SettingsPayload;
}

macro_rules! settings_variants {
    ($( $variant:ident($settings:ty) ),+ $(,)?) => {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "kind", content = "settings", rename_all = "snake_case")]
        pub enum SettingsPayload {
            $( $variant($settings), )+
        }

        impl SettingsPayload {
            pub fn kind(&self) -> SettingsKind {
                match self {
                    $( SettingsPayload::$variant(_) => SettingsKind::$variant, )+
                }
            }
        }

        $(
            impl SettingsVariant for $settings {
                const KIND: SettingsKind = SettingsKind::$variant;

                fn from_payload(payload: SettingsPayload) -> Option<Self> {
                    match payload {
                        SettingsPayload::$variant(inner) => Some(inner),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }

                fn into_payload(self) -> SettingsPayload {
                    SettingsPayload::$variant(self)
                }
            }
        )+
    };
}

settings_variants! {
    Login(LoginSettings),
    Label(LabelPolicy),
    PasswordComplexity(PasswordComplexitySettings),
    PasswordExpiry(PasswordExpirySettings),
    Domain(DomainSettings),
    Lockout(LockoutSettings),
    Security(SecuritySettings),
    Organization(OrganizationSettings),
    SecretGenerator(SecretGeneratorSettings),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsRow {
    pub instance_id: InstanceId,
    /// `None` for the instance default.
    pub org_id: Option<OrgId>,
    /// Set for label rows only.
    pub label_state: Option<LabelState>,
    pub payload: SettingsPayload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SettingsRow {
    pub const KIND: Column = Column::new("kind");
    pub const LABEL_STATE: Column = Column::new("label_state");
    pub const IS_DEFAULT: Column = Column::new("is_default");

    pub fn kind(&self) -> SettingsKind {
        self.payload.kind()
    }

    pub fn is_default(&self) -> bool {
        self.org_id.is_none()
    }

    /// Typed copy of the payload, if it is a `T`.
    pub fn settings<T: SettingsVariant>(&self) -> Option<T> {
        T::from_payload(self.payload.clone())
    }

    pub fn key_for(
        instance_id: &InstanceId,
        org_id: Option<&OrgId>,
        kind: SettingsKind,
        label_state: Option<LabelState>,
    ) -> RowKey {
        let id = match label_state {
            Some(state) => format!("{}.{}", kind.as_str(), state.as_str()),
            None => kind.as_str().to_string(),
        };
        RowKey {
            instance_id: instance_id.clone(),
            scope: org_id.map(|org| org.as_str().to_string()),
            id,
        }
    }
}

impl Record for SettingsRow {
    fn value(&self, column: &Column) -> Option<Value> {
        Some(match column.name() {
            "instance_id" => (&self.instance_id).into(),
            "org_id" => self.org_id.as_ref().into(),
            "kind" => self.kind().as_str().into(),
            "label_state" => self.label_state.map(|s| s.as_str()).into(),
            "is_default" => self.is_default().into(),
            "created_at" => self.created_at.into(),
            "updated_at" => self.updated_at.into(),
            _ => return None,
        })
    }
}

impl Row for SettingsRow {
    const TABLE: &'static str = "settings";

    fn key(&self) -> RowKey {
        Self::key_for(
            &self.instance_id,
            self.org_id.as_ref(),
            self.kind(),
            self.label_state,
        )
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Projection
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct SettingsProjection;

struct Scope<'a> {
    settings: Table<'a, SettingsRow>,
    instance_id: InstanceId,
    org_id: Option<OrgId>,
    at: DateTime<Utc>,
}

impl Scope<'_> {
    fn key(&self, kind: SettingsKind, label_state: Option<LabelState>) -> RowKey {
        SettingsRow::key_for(&self.instance_id, self.org_id.as_ref(), kind, label_state)
    }

    fn new_row(&self, payload: SettingsPayload, label_state: Option<LabelState>) -> SettingsRow {
        SettingsRow {
            instance_id: self.instance_id.clone(),
            org_id: self.org_id.clone(),
            label_state,
            payload,
            created_at: self.at,
            updated_at: self.at,
        }
    }

    fn added<T: SettingsVariant + Clone>(&self, settings: T) -> Result<(), ReducerError> {
        let payload = settings.into_payload();
        self.settings.upsert(
            &self.key(T::KIND, None),
            || self.new_row(payload.clone(), None),
            |row| {
                row.payload = payload.clone();
                row.updated_at = self.at;
            },
        )?;
        Ok(())
    }

    fn changed<T: SettingsVariant>(
        &self,
        label_state: Option<LabelState>,
        apply: impl Fn(&mut T),
    ) -> Result<(), ReducerError> {
        self.settings.update(&self.key(T::KIND, label_state), self.at, |row| {
            if let Some(mut settings) = T::from_payload(row.payload.clone()) {
                apply(&mut settings);
                row.payload = settings.into_payload();
            }
        })?;
        Ok(())
    }

    /// Merge onto the stored settings, or onto the defaults when the scope
    /// has none yet.
    fn set<T>(&self, apply: impl Fn(&mut T)) -> Result<(), ReducerError>
    where
        T: SettingsVariant + Default,
    {
        self.settings.upsert(
            &self.key(T::KIND, None),
            || {
                let mut settings = T::default();
                apply(&mut settings);
                self.new_row(settings.into_payload(), None)
            },
            |row| {
                let mut settings = T::from_payload(row.payload.clone()).unwrap_or_default();
                apply(&mut settings);
                let payload = settings.into_payload();
                if payload != row.payload {
                    row.payload = payload;
                    row.updated_at = self.at;
                }
            },
        )?;
        Ok(())
    }

    /// Org reset: drop the org rows so resolution falls back to the default.
    fn removed(&self, kind: SettingsKind) -> Result<(), ReducerError> {
        if self.org_id.is_none() {
            return Ok(());
        }
        match kind {
            SettingsKind::Label => {
                self.settings.delete(&self.key(kind, Some(LabelState::Preview)))?;
                self.settings.delete(&self.key(kind, Some(LabelState::Activated)))?;
            }
            _ => {
                self.settings.delete(&self.key(kind, None))?;
            }
        }
        Ok(())
    }

    fn label_added(&self, settings: LabelSettings) -> Result<(), ReducerError> {
        self.settings.upsert(
            &self.key(SettingsKind::Label, Some(LabelState::Preview)),
            || {
                let policy = LabelPolicy {
                    settings: settings.clone(),
                    assets: LabelAssets::default(),
                };
                self.new_row(policy.into_payload(), Some(LabelState::Preview))
            },
            |row| {
                if let SettingsPayload::Label(policy) = &mut row.payload {
                    policy.settings = settings.clone();
                    row.updated_at = self.at;
                }
            },
        )?;
        Ok(())
    }

    fn label_preview(&self, apply: impl Fn(&mut LabelPolicy)) -> Result<(), ReducerError> {
        self.changed(Some(LabelState::Preview), apply)
    }

    /// Copy the preview into the activated row.
    fn label_activated(&self) -> Result<(), ReducerError> {
        let preview_key = self.key(SettingsKind::Label, Some(LabelState::Preview));
        let Some(preview) = self.settings.get(&preview_key)? else {
            return Ok(());
        };
        let activated_key = self.key(SettingsKind::Label, Some(LabelState::Activated));
        self.settings.mutate(&activated_key, |prior| {
            let created_at = prior.as_ref().map_or(self.at, |row| row.created_at);
            let unchanged = prior.as_ref().is_some_and(|row| row.payload == preview.payload);
            if unchanged {
                return prior;
            }
            Some(SettingsRow {
                label_state: Some(LabelState::Activated),
                created_at,
                updated_at: self.at,
                ..preview.clone()
            })
        })?;
        Ok(())
    }
}

impl Reducer for SettingsProjection {
    fn name(&self) -> &'static str {
        "settings"
    }

    fn routes(&self) -> Vec<(AggregateKind, &'static str)> {
        routes_of::<SettingsEvent>()
    }

    fn reduce(
        &self,
        tables: &ProjectionTables,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ReducerError> {
        let org_id = org_scope(envelope);
        let envelope = envelope.decode::<SettingsEvent>()?;
        let scope = Scope {
            settings: tables.settings(),
            instance_id: envelope.instance_id().clone(),
            org_id,
            at: envelope.created_at(),
        };

        match envelope.into_payload() {
            SettingsEvent::LoginAdded(s) => scope.added(s),
            SettingsEvent::LoginChanged(c) => {
                scope.changed(None, |s: &mut LoginSettings| c.clone().apply_to(s))
            }
            SettingsEvent::LoginRemoved(_) => scope.removed(SettingsKind::Login),
            SettingsEvent::MultiFactorAdded(e) => {
                scope.changed(None, |s: &mut LoginSettings| s.add_multi_factor(e.mfa_type))
            }
            SettingsEvent::MultiFactorRemoved(e) => {
                scope.changed(None, |s: &mut LoginSettings| s.remove_multi_factor(e.mfa_type))
            }
            SettingsEvent::SecondFactorAdded(e) => {
                scope.changed(None, |s: &mut LoginSettings| s.add_second_factor(e.factor))
            }
            SettingsEvent::SecondFactorRemoved(e) => {
                scope.changed(None, |s: &mut LoginSettings| s.remove_second_factor(e.factor))
            }

            SettingsEvent::LabelAdded(s) => scope.label_added(s),
            SettingsEvent::LabelChanged(c) => {
                scope.label_preview(|p| c.clone().apply_to(&mut p.settings))
            }
            SettingsEvent::LabelActivated(_) => scope.label_activated(),
            SettingsEvent::LabelRemoved(_) => scope.removed(SettingsKind::Label),
            SettingsEvent::LogoAdded(e) => {
                scope.label_preview(|p| p.assets.logo_light = Some(e.storage_key.clone()))
            }
            SettingsEvent::LogoRemoved(_) => scope.label_preview(|p| p.assets.logo_light = None),
            SettingsEvent::LogoDarkAdded(e) => {
                scope.label_preview(|p| p.assets.logo_dark = Some(e.storage_key.clone()))
            }
            SettingsEvent::LogoDarkRemoved(_) => scope.label_preview(|p| p.assets.logo_dark = None),
            SettingsEvent::IconAdded(e) => {
                scope.label_preview(|p| p.assets.icon_light = Some(e.storage_key.clone()))
            }
            SettingsEvent::IconRemoved(_) => scope.label_preview(|p| p.assets.icon_light = None),
            SettingsEvent::IconDarkAdded(e) => {
                scope.label_preview(|p| p.assets.icon_dark = Some(e.storage_key.clone()))
            }
            SettingsEvent::IconDarkRemoved(_) => scope.label_preview(|p| p.assets.icon_dark = None),
            SettingsEvent::FontAdded(e) => {
                scope.label_preview(|p| p.assets.font = Some(e.storage_key.clone()))
            }
            SettingsEvent::FontRemoved(_) => scope.label_preview(|p| p.assets.font = None),

            SettingsEvent::PasswordComplexityAdded(s) => scope.added(s),
            SettingsEvent::PasswordComplexityChanged(c) => {
                scope.changed(None, |s: &mut PasswordComplexitySettings| c.clone().apply_to(s))
            }
            SettingsEvent::PasswordComplexityRemoved(_) => {
                scope.removed(SettingsKind::PasswordComplexity)
            }

            SettingsEvent::PasswordExpiryAdded(s) => scope.added(s),
            SettingsEvent::PasswordExpiryChanged(c) => {
                scope.changed(None, |s: &mut PasswordExpirySettings| c.clone().apply_to(s))
            }
            SettingsEvent::PasswordExpiryRemoved(_) => scope.removed(SettingsKind::PasswordExpiry),

            SettingsEvent::DomainAdded(s) => scope.added(s),
            SettingsEvent::DomainChanged(c) => {
                scope.changed(None, |s: &mut DomainSettings| c.clone().apply_to(s))
            }
            SettingsEvent::DomainRemoved(_) => scope.removed(SettingsKind::Domain),

            SettingsEvent::LockoutAdded(s) => scope.added(s),
            SettingsEvent::LockoutChanged(c) => {
                scope.changed(None, |s: &mut LockoutSettings| c.clone().apply_to(s))
            }
            SettingsEvent::LockoutRemoved(_) => scope.removed(SettingsKind::Lockout),

            SettingsEvent::SecuritySet(c) => {
                scope.set(|s: &mut SecuritySettings| c.clone().apply_to(s))
            }

            SettingsEvent::OrganizationSet(c) => {
                scope.set(|s: &mut OrganizationSettings| c.clone().apply_to(s))
            }
            SettingsEvent::OrganizationRemoved(_) => scope.removed(SettingsKind::Organization),

            SettingsEvent::SecretGeneratorAdded(e) => {
                scope.set(|s: &mut SecretGeneratorSettings| {
                    s.set(e.generator_type, e.config.clone())
                })
            }
            SettingsEvent::SecretGeneratorChanged(e) => {
                scope.changed(None, |s: &mut SecretGeneratorSettings| {
                    s.change(e.generator_type, e.changes.clone())
                })
            }
            SettingsEvent::SecretGeneratorRemoved(e) => {
                scope.changed(None, |s: &mut SecretGeneratorSettings| s.remove(e.generator_type))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use warden_identity::settings::{SecondFactorType, SecretGeneratorType};

    use super::*;
    use crate::test_support::{Events, all_rows, apply_all, tables};

    #[test]
    fn org_and_instance_rows_are_separate() {
        let tables = tables();
        let mut events = Events::new("inst-1");
        let batch = [
            events.instance("instance.policy.password.complexity.added", json!({"min_length": 8})),
            events.org("org-1", "org.policy.password.complexity.added", json!({"min_length": 12})),
            events.org(
                "org-1",
                "org.policy.password.complexity.changed",
                json!({"has_symbol": true}),
            ),
        ];
        apply_all(&SettingsProjection, &tables, &batch);

        let rows = all_rows(tables.settings.as_ref());
        assert_eq!(rows.len(), 2);
        let default = rows.iter().find(|r| r.is_default()).unwrap();
        let org = rows.iter().find(|r| !r.is_default()).unwrap();
        assert_eq!(default.settings::<PasswordComplexitySettings>().unwrap().min_length, 8);
        let org_settings = org.settings::<PasswordComplexitySettings>().unwrap();
        assert_eq!(org_settings.min_length, 12);
        assert!(org_settings.has_symbol);

        apply_all(
            &SettingsProjection,
            &tables,
            &[events.org("org-1", "org.policy.password.complexity.removed", json!({}))],
        );
        let rows = all_rows(tables.settings.as_ref());
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_default());
    }

    #[test]
    fn second_factors_are_added_to_login_settings() {
        let tables = tables();
        let mut events = Events::new("inst-1");
        let batch = [
            events.instance("instance.policy.login.added", json!({"allow_register": true})),
            events.instance("instance.policy.login.secondfactor.added", json!({"factor": "totp"})),
            events.instance(
                "instance.policy.login.secondfactor.added",
                json!({"factor": "otp_sms"}),
            ),
            events.instance(
                "instance.policy.login.secondfactor.removed",
                json!({"factor": "totp"}),
            ),
            events.instance(
                "instance.policy.login.multifactor.added",
                json!({"mfa_type": "u2f_with_pin"}),
            ),
        ];
        apply_all(&SettingsProjection, &tables, &batch);

        let login = all_rows(tables.settings.as_ref())[0].settings::<LoginSettings>().unwrap();
        assert!(login.allow_register);
        assert_eq!(login.second_factors, vec![SecondFactorType::OtpSms]);
        assert_eq!(login.mfa_types.len(), 1);
    }

    #[test]
    fn label_activation_copies_the_preview() {
        let tables = tables();
        let mut events = Events::new("inst-1");
        let batch = [
            events.org("org-1", "org.policy.label.added", json!({"primary_color": "#000"})),
            events.org("org-1", "org.policy.label.logo.added", json!({"storage_key": "logo.png"})),
            events.org("org-1", "org.policy.label.activated", json!({})),
            events.org("org-1", "org.policy.label.changed", json!({"primary_color": "#fff"})),
        ];
        apply_all(&SettingsProjection, &tables, &batch);

        let rows = all_rows(tables.settings.as_ref());
        let state_of = |state| {
            rows.iter()
                .find(|r| r.label_state == Some(state))
                .and_then(|r| r.settings::<LabelPolicy>())
                .unwrap()
        };
        let activated = state_of(LabelState::Activated);
        assert_eq!(activated.settings.primary_color, "#000");
        assert_eq!(activated.assets.logo_light.as_deref(), Some("logo.png"));
        assert_eq!(state_of(LabelState::Preview).settings.primary_color, "#fff");
    }

    #[test]
    fn security_set_merges_onto_defaults() {
        let tables = tables();
        let mut events = Events::new("inst-1");
        let batch = [
            events.instance("instance.security.policy.set", json!({"enabled": true})),
            events.instance(
                "instance.security.policy.set",
                json!({"allowed_origins": ["https://a"]}),
            ),
        ];
        apply_all(&SettingsProjection, &tables, &batch);

        let security = all_rows(tables.settings.as_ref())[0]
            .settings::<SecuritySettings>()
            .unwrap();
        assert!(security.enabled);
        assert_eq!(security.allowed_origins, vec!["https://a"]);
        assert!(!security.enable_impersonation);
    }

    #[test]
    fn secret_generators_are_kept_per_type() {
        let tables = tables();
        let mut events = Events::new("inst-1");
        let batch = [
            events.instance(
                "instance.secret.generator.added",
                json!({
                    "generator_type": "otp_sms",
                    "length": 6,
                    "expiry_secs": 300,
                    "include_digits": true
                }),
            ),
            events.instance(
                "instance.secret.generator.added",
                json!({"generator_type": "client_secret", "length": 64, "include_symbols": true}),
            ),
            events.instance(
                "instance.secret.generator.changed",
                json!({"generator_type": "otp_sms", "length": 8}),
            ),
            events.instance(
                "instance.secret.generator.removed",
                json!({"generator_type": "client_secret"}),
            ),
        ];
        apply_all(&SettingsProjection, &tables, &batch);

        let rows = all_rows(tables.settings.as_ref());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind(), SettingsKind::SecretGenerator);
        let generators = rows[0].settings::<SecretGeneratorSettings>().unwrap();
        assert_eq!(generators.generators.len(), 1);
        let otp = generators.generator(SecretGeneratorType::OtpSms).unwrap();
        assert_eq!((otp.length, otp.expiry_secs), (8, 300));
        assert!(otp.include_digits);
    }

    #[test]
    fn org_settings_override_and_reset() {
        let tables = tables();
        let mut events = Events::new("inst-1");
        let batch = [
            events.instance("instance.settings.organization.set", json!({})),
            events.org(
                "org-1",
                "org.settings.organization.set",
                json!({"organization_scoped_usernames": true}),
            ),
        ];
        apply_all(&SettingsProjection, &tables, &batch);

        let rows = all_rows(tables.settings.as_ref());
        let org = rows.iter().find(|r| !r.is_default()).unwrap();
        let settings = org.settings::<OrganizationSettings>().unwrap();
        assert!(settings.organization_scoped_usernames);

        let reset = events.org("org-1", "org.settings.organization.removed", json!({}));
        apply_all(&SettingsProjection, &tables, &[reset]);
        let rows = all_rows(tables.settings.as_ref());
        assert_eq!(rows.len(), 1);
        let default = rows[0].settings::<OrganizationSettings>().unwrap();
        assert!(!default.organization_scoped_usernames);
    }
}
