//! Effective settings: the org override when one exists, the instance
//! default otherwise.
//!
//! Instance defaults are written during instance setup, so a missing
//! default means the instance itself is gone and surfaces as not-found.

use tracing::debug;

use warden_core::{InstanceId, OrgId};
use warden_identity::{LabelState, SettingsKind};

use crate::projections::settings::{SettingsRow, SettingsVariant};
use crate::read_model::ProjectionTables;
use crate::repository::{RepositoryError, RepositoryResult, SettingsRepository};

/// A resolved settings row.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub row: SettingsRow,
    /// `true` when the org has no override and the instance default applies.
    pub is_default: bool,
}

/// A resolved settings value of a known type.
#[derive(Debug, Clone, PartialEq)]
pub struct Effective<T> {
    pub settings: T,
    pub is_default: bool,
}

pub struct SettingsResolver<'a> {
    settings: SettingsRepository<'a>,
}

impl<'a> SettingsResolver<'a> {
    pub fn new(tables: &'a ProjectionTables) -> Self {
        Self {
            settings: SettingsRepository::settings(tables),
        }
    }

    /// Label settings resolve to their activated copy; the preview is never
    /// effective.
    pub fn resolve(
        &self,
        kind: SettingsKind,
        instance_id: &InstanceId,
        org_id: Option<&OrgId>,
    ) -> RepositoryResult<Resolved> {
        if let Some(org_id) = org_id {
            match self.lookup(kind, instance_id, Some(org_id)) {
                Ok(row) => {
                    return Ok(Resolved {
                        row,
                        is_default: false,
                    });
                }
                Err(err) if err.is_not_found() => {
                    debug!(
                        kind = kind.as_str(),
                        org_id = %org_id,
                        "no org override; using instance default"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        let row = self.lookup(kind, instance_id, None)?;
        Ok(Resolved {
            row,
            is_default: true,
        })
    }

    pub fn resolve_as<T: SettingsVariant>(
        &self,
        instance_id: &InstanceId,
        org_id: Option<&OrgId>,
    ) -> RepositoryResult<Effective<T>> {
        let resolved = self.resolve(T::KIND, instance_id, org_id)?;
        let settings = resolved
            .row
            .settings::<T>()
            .ok_or(RepositoryError::NotFound { table: "settings" })?;
        Ok(Effective {
            settings,
            is_default: resolved.is_default,
        })
    }

    fn lookup(
        &self,
        kind: SettingsKind,
        instance_id: &InstanceId,
        org_id: Option<&OrgId>,
    ) -> RepositoryResult<SettingsRow> {
        let mut condition = SettingsRepository::scope_condition(instance_id, kind, org_id);
        if kind == SettingsKind::Label {
            let activated = SettingsRepository::label_state_condition(LabelState::Activated);
            condition = condition.and_also(activated);
        }
        self.settings.get(&condition)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use warden_identity::settings::{LabelSettings, LockoutSettings, PasswordComplexitySettings};

    use super::*;
    use crate::projections::settings::{LabelPolicy, SettingsProjection};
    use crate::test_support::{Events, apply_all, tables};

    #[test]
    fn org_override_shadows_the_default_until_reset() {
        let tables = tables();
        let mut events = Events::new("inst-1");
        let org = OrgId::from("org-1");
        let instance_id = events.instance_id();
        apply_all(
            &SettingsProjection,
            &tables,
            &[events.instance(
                "instance.policy.lockout.added",
                json!({"max_password_attempts": 5}),
            )],
        );
        let resolver = SettingsResolver::new(&tables);

        let before = resolver.resolve(SettingsKind::Lockout, &instance_id, Some(&org)).unwrap();
        assert!(before.is_default);
        assert!(before.row.is_default());

        apply_all(
            &SettingsProjection,
            &tables,
            &[events.org("org-1", "org.policy.lockout.added", json!({"max_password_attempts": 3}))],
        );
        let overridden = resolver.resolve_as::<LockoutSettings>(&instance_id, Some(&org)).unwrap();
        assert!(!overridden.is_default);
        assert_eq!(overridden.settings.max_password_attempts, 3);

        apply_all(
            &SettingsProjection,
            &tables,
            &[events.org("org-1", "org.policy.lockout.removed", json!({}))],
        );
        let reset = resolver.resolve_as::<LockoutSettings>(&instance_id, Some(&org)).unwrap();
        assert!(reset.is_default);
        assert_eq!(reset.settings.max_password_attempts, 5);

        // Other orgs never saw the override.
        let other = resolver
            .resolve(SettingsKind::Lockout, &instance_id, Some(&"org-2".into()))
            .unwrap();
        assert!(other.is_default);
    }

    #[test]
    fn missing_default_is_not_found() {
        let tables = tables();
        let err = SettingsResolver::new(&tables)
            .resolve_as::<PasswordComplexitySettings>(&"inst-1".into(), None)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn label_resolves_to_the_activated_copy() {
        let tables = tables();
        let mut events = Events::new("inst-1");
        let batch = [
            events.instance("instance.policy.label.added", json!({"primary_color": "#111"})),
            events.instance("instance.policy.label.activated", json!({})),
            events.instance("instance.policy.label.changed", json!({"primary_color": "#222"})),
        ];
        apply_all(&SettingsProjection, &tables, &batch);

        let label = SettingsResolver::new(&tables)
            .resolve_as::<LabelPolicy>(&events.instance_id(), None)
            .unwrap();
        let expected: LabelSettings =
            serde_json::from_value(json!({"primary_color": "#111"})).unwrap();
        assert_eq!(label.settings.settings, expected);
    }
}
