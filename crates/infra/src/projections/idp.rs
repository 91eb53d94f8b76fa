//! Identity provider projection.
//!
//! A provider is a base record plus exactly one typed configuration. Change
//! events only apply when the stored configuration has the event's type;
//! migrations replace the configuration and keep id, state and `CreatedAt`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;

use warden_core::{Column, IdpId, InstanceId, OrgId, Record, Value};
use warden_events::{AggregateKind, EventEnvelope};
use warden_identity::idp::*;
use warden_identity::LifecycleState;

use crate::projections::{Reducer, ReducerError, org_scope, routes_of};
use crate::read_model::{ProjectionTables, Row, RowKey, Table};

// ─────────────────────────────────────────────────────────────────────────────
// Read Model
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdpRow {
    pub instance_id: InstanceId,
    /// `None` for instance-wide providers.
    pub org_id: Option<OrgId>,
    pub id: IdpId,
    pub name: String,
    pub state: LifecycleState,
    pub styling_type: StylingType,
    pub options: IdpOptions,
    pub config: IdpConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IdpRow {
    pub const NAME: Column = Column::new("name");
    pub const TYPE: Column = Column::new("type");
    pub const STYLING_TYPE: Column = Column::new("styling_type");
    pub const ALLOW_CREATION: Column = Column::new("allow_creation");
    pub const ALLOW_LINKING: Column = Column::new("allow_linking");
    pub const ALLOW_AUTO_CREATION: Column = Column::new("allow_auto_creation");
    pub const ALLOW_AUTO_UPDATE: Column = Column::new("allow_auto_update");
    pub const AUTO_LINKING_FIELD: Column = Column::new("auto_linking_field");

    pub fn idp_type(&self) -> IdpType {
        self.config.idp_type()
    }
}

impl Record for IdpRow {
    fn value(&self, column: &Column) -> Option<Value> {
        Some(match column.name() {
            "instance_id" => (&self.instance_id).into(),
            "org_id" => self.org_id.as_ref().into(),
            "id" => (&self.id).into(),
            "name" => (&self.name).into(),
            "state" => self.state.as_str().into(),
            "type" => self.idp_type().as_str().into(),
            "styling_type" => self.styling_type.as_str().into(),
            "allow_creation" => self.options.allow_creation.into(),
            "allow_linking" => self.options.allow_linking.into(),
            "allow_auto_creation" => self.options.allow_auto_creation.into(),
            "allow_auto_update" => self.options.allow_auto_update.into(),
            "auto_linking_field" => self.options.auto_linking_field.as_str().into(),
            "created_at" => self.created_at.into(),
            "updated_at" => self.updated_at.into(),
            _ => return None,
        })
    }
}

impl Row for IdpRow {
    const TABLE: &'static str = "idps";

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

#[derive(Debug, Default)]
pub struct IdpProjection;

/// Everything a typed handler needs besides the payload.
struct Scope<'a> {
    idps: Table<'a, IdpRow>,
    instance_id: InstanceId,
    org_id: Option<OrgId>,
    at: DateTime<Utc>,
}

impl Scope<'_> {
    fn key(&self, id: &IdpId) -> RowKey {
        RowKey::new(self.instance_id.clone(), id.as_str())
    }

    fn added<C: IdpVariant>(&self, e: IdpAdded<C>) -> Result<(), ReducerError> {
        let at = self.at;
        let config = e.config.into_config();
        self.idps.upsert(
            &self.key(&e.id),
            || IdpRow {
                instance_id: self.instance_id.clone(),
                org_id: self.org_id.clone(),
                id: e.id.clone(),
                name: e.name.clone(),
                state: LifecycleState::Active,
                styling_type: StylingType::Unspecified,
                options: e.options.clone(),
                config: config.clone(),
                created_at: at,
                updated_at: at,
            },
            |row| {
                row.name = e.name.clone();
                row.options = e.options.clone();
                row.config = config.clone();
                row.updated_at = at;
            },
        )?;
        Ok(())
    }

    fn changed<C: IdpVariant, Ch: Clone>(
        &self,
        e: IdpChanged<Ch>,
        apply: fn(Ch, &mut C),
    ) -> Result<(), ReducerError> {
        let key = self.key(&e.id);
        if let Some(row) = self.idps.get(&key)? {
            if row.idp_type() != C::TYPE {
                warn!(
                    idp_id = %e.id,
                    expected = %C::TYPE,
                    actual = %row.idp_type(),
                    "provider change for another type ignored"
                );
                return Ok(());
            }
        }

        self.idps.update(&key, self.at, |row| {
            if let Some(name) = &e.name {
                row.name = name.clone();
            }
            e.options.clone().apply_to(&mut row.options);
            if let Some(mut config) = C::from_config(row.config.clone()) {
                apply(e.config.clone(), &mut config);
                row.config = config.into_config();
            }
        })?;
        Ok(())
    }

    /// Re-tag an OIDC provider as `C`, replacing its configuration.
    fn migrated<C: IdpVariant>(&self, e: IdpMigrated<C>) -> Result<(), ReducerError> {
        let key = self.key(&e.id);
        if let Some(row) = self.idps.get(&key)? {
            let from = row.idp_type();
            if from != IdpType::Oidc && from != C::TYPE {
                warn!(
                    idp_id = %e.id,
                    from = %from,
                    to = %C::TYPE,
                    "migration from non-OIDC provider ignored"
                );
                return Ok(());
            }
        }

        let config = e.config.into_config();
        self.idps.update(&key, self.at, |row| {
            row.name = e.name.clone();
            row.options = e.options.clone();
            row.config = config.clone();
        })?;
        Ok(())
    }
}

impl Reducer for IdpProjection {
    fn name(&self) -> &'static str {
        "idps"
    }

    fn routes(&self) -> Vec<(AggregateKind, &'static str)> {
        routes_of::<IdpEvent>()
    }

    fn reduce(
        &self,
        tables: &ProjectionTables,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ReducerError> {
        let org_id = org_scope(envelope);
        let envelope = envelope.decode::<IdpEvent>()?;
        let scope = Scope {
            idps: tables.idps(),
            instance_id: envelope.instance_id().clone(),
            org_id,
            at: envelope.created_at(),
        };

        match envelope.into_payload() {
            IdpEvent::OidcAdded(e) => scope.added(e),
            IdpEvent::OidcChanged(e) => scope.changed(e, OidcConfigChanges::apply_to),
            IdpEvent::OidcMigratedAzure(e) => scope.migrated(e),
            IdpEvent::OidcMigratedGoogle(e) => scope.migrated(e),
            IdpEvent::OAuthAdded(e) => scope.added(e),
            IdpEvent::OAuthChanged(e) => scope.changed(e, OAuthConfigChanges::apply_to),
            IdpEvent::JwtAdded(e) => scope.added(e),
            IdpEvent::JwtChanged(e) => scope.changed(e, JwtConfigChanges::apply_to),
            IdpEvent::LdapAdded(e) => scope.added(e),
            IdpEvent::LdapChanged(e) => scope.changed(e, LdapConfigChanges::apply_to),
            IdpEvent::SamlAdded(e) => scope.added(e),
            IdpEvent::SamlChanged(e) => scope.changed(e, SamlConfigChanges::apply_to),
            IdpEvent::AppleAdded(e) => scope.added(e),
            IdpEvent::AppleChanged(e) => scope.changed(e, AppleConfigChanges::apply_to),
            IdpEvent::GoogleAdded(e) => scope.added(e),
            IdpEvent::GoogleChanged(e) => scope.changed(e, GoogleConfigChanges::apply_to),
            IdpEvent::AzureAdded(e) => scope.added(e),
            IdpEvent::AzureChanged(e) => scope.changed(e, AzureConfigChanges::apply_to),
            IdpEvent::GitHubAdded(e) => scope.added(e),
            IdpEvent::GitHubChanged(e) => scope.changed(e, GitHubConfigChanges::apply_to),
            IdpEvent::GitHubEnterpriseAdded(e) => scope.added(e),
            IdpEvent::GitHubEnterpriseChanged(e) => {
                scope.changed(e, GitHubEnterpriseConfigChanges::apply_to)
            }
            IdpEvent::GitLabAdded(e) => scope.added(e),
            IdpEvent::GitLabChanged(e) => scope.changed(e, GitLabConfigChanges::apply_to),
            IdpEvent::GitLabSelfHostedAdded(e) => scope.added(e),
            IdpEvent::GitLabSelfHostedChanged(e) => {
                scope.changed(e, GitLabSelfHostedConfigChanges::apply_to)
            }
            IdpEvent::ConfigChanged(e) => {
                scope.idps.update(&scope.key(&e.id), scope.at, |row| {
                    if let Some(name) = &e.name {
                        row.name = name.clone();
                    }
                    if let Some(styling) = e.styling_type {
                        row.styling_type = styling;
                    }
                })?;
                Ok(())
            }
            IdpEvent::Deactivated(e) => {
                scope.idps.update(&scope.key(&e.id), scope.at, |row| {
                    row.state = LifecycleState::Inactive
                })?;
                Ok(())
            }
            IdpEvent::Reactivated(e) => {
                scope.idps.update(&scope.key(&e.id), scope.at, |row| {
                    row.state = LifecycleState::Active
                })?;
                Ok(())
            }
            IdpEvent::Removed(e) => {
                scope.idps.delete(&scope.key(&e.id))?;
                Ok(())
            }
        }
    }
}
