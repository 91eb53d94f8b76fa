//! Instance projection: the tenant root and its domains.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use warden_core::condition::columns;
use warden_core::{Column, Condition, InstanceId, OrgId, ProjectId, Record, Value};
use warden_events::{AggregateKind, EventEnvelope};
use warden_identity::InstanceEvent;

use crate::projections::cascade::{CascadePlan, mark_removed};
use crate::projections::{Reducer, ReducerError, routes_of};
use crate::read_model::{ProjectionTables, Row, RowKey};

// ─────────────────────────────────────────────────────────────────────────────
// Read Models
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRow {
    pub id: InstanceId,
    pub name: String,
    pub default_org_id: Option<OrgId>,
    pub iam_project_id: Option<ProjectId>,
    pub default_language: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstanceRow {
    pub const NAME: Column = Column::new("name");
    pub const DEFAULT_ORG_ID: Column = Column::new("default_org_id");
    pub const IAM_PROJECT_ID: Column = Column::new("iam_project_id");
    pub const DEFAULT_LANGUAGE: Column = Column::new("default_language");
}

impl Record for InstanceRow {
    fn value(&self, column: &Column) -> Option<Value> {
        Some(match column.name() {
            "instance_id" | "id" => (&self.id).into(),
            "name" => (&self.name).into(),
            "default_org_id" => self.default_org_id.as_ref().into(),
            "iam_project_id" => self.iam_project_id.as_ref().into(),
            "default_language" => self.default_language.as_ref().into(),
            "created_at" => self.created_at.into(),
            "updated_at" => self.updated_at.into(),
            _ => return None,
        })
    }
}

impl Row for InstanceRow {
    const TABLE: &'static str = "instances";

    fn key(&self) -> RowKey {
        RowKey::new(self.id.clone(), self.id.as_str())
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceDomainRow {
    pub instance_id: InstanceId,
    pub domain: String,
    pub is_primary: bool,
    pub is_generated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstanceDomainRow {
    pub const DOMAIN: Column = Column::new("domain");
    pub const IS_PRIMARY: Column = Column::new("is_primary");
    pub const IS_GENERATED: Column = Column::new("is_generated");
}

impl Record for InstanceDomainRow {
    fn value(&self, column: &Column) -> Option<Value> {
        Some(match column.name() {
            "instance_id" => (&self.instance_id).into(),
            "id" | "domain" => (&self.domain).into(),
            "is_primary" => self.is_primary.into(),
            "is_generated" => self.is_generated.into(),
            "created_at" => self.created_at.into(),
            "updated_at" => self.updated_at.into(),
            _ => return None,
        })
    }
}

impl Row for InstanceDomainRow {
    const TABLE: &'static str = "instance_domains";

    fn key(&self) -> RowKey {
        RowKey::new(self.instance_id.clone(), self.domain.clone())
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Projection
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InstanceProjection;

impl Reducer for InstanceProjection {
    fn name(&self) -> &'static str {
        "instances"
    }

    fn routes(&self) -> Vec<(AggregateKind, &'static str)> {
        routes_of::<InstanceEvent>()
    }

    fn reduce(
        &self,
        tables: &ProjectionTables,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ReducerError> {
        let envelope = envelope.decode::<InstanceEvent>()?;
        let instance_id = envelope.instance_id().clone();
        let at = envelope.created_at();
        let key = RowKey::new(instance_id.clone(), instance_id.as_str());
        let instances = tables.instances();
        let domains = tables.instance_domains();

        match envelope.into_payload() {
            InstanceEvent::Added(e) => {
                instances.upsert(
                    &key,
                    || InstanceRow {
                        id: instance_id.clone(),
                        name: e.name.clone(),
                        default_org_id: None,
                        iam_project_id: None,
                        default_language: None,
                        created_at: at,
                        updated_at: at,
                    },
                    |row| {
                        row.name = e.name.clone();
                        row.updated_at = at;
                    },
                )?;
            }
            InstanceEvent::Changed(e) => {
                instances.update(&key, at, |row| row.name = e.name.clone())?;
            }
            InstanceEvent::DefaultOrgSet(e) => {
                instances.update(&key, at, |row| row.default_org_id = Some(e.org_id.clone()))?;
            }
            InstanceEvent::IamProjectSet(e) => {
                instances.update(&key, at, |row| row.iam_project_id = Some(e.project_id.clone()))?;
            }
            InstanceEvent::DefaultLanguageSet(e) => {
                instances.update(&key, at, |row| row.default_language = Some(e.language.clone()))?;
            }
            InstanceEvent::Removed(_) => {
                mark_removed(tables, &instance_id, None, at)?;
                CascadePlan::instance(instance_id).run(tables)?;
            }
            InstanceEvent::DomainAdded(e) => {
                let domain_key = RowKey::new(instance_id.clone(), e.domain.clone());
                domains.upsert(
                    &domain_key,
                    || InstanceDomainRow {
                        instance_id: instance_id.clone(),
                        domain: e.domain.clone(),
                        is_primary: false,
                        is_generated: e.generated,
                        created_at: at,
                        updated_at: at,
                    },
                    |row| {
                        row.is_generated = e.generated;
                        row.updated_at = at;
                    },
                )?;
            }
            InstanceEvent::DomainPrimarySet(e) => {
                // Only one primary domain per instance.
                let primaries = Condition::equal(columns::INSTANCE_ID, &instance_id)
                    .and_also(Condition::equal(InstanceDomainRow::IS_PRIMARY, true))
                    .and_also(Condition::not_equal(InstanceDomainRow::DOMAIN, e.domain.as_str()));
                domains.update_where(&primaries, at, |row| row.is_primary = false)?;
                domains.update(&RowKey::new(instance_id.clone(), e.domain.clone()), at, |row| {
                    row.is_primary = true
                })?;
            }
            InstanceEvent::DomainRemoved(e) => {
                domains.delete(&RowKey::new(instance_id.clone(), e.domain.clone()))?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_support::{Events, all_rows, apply_all, tables};

    #[test]
    fn added_twice_keeps_one_row() {
        let tables = tables();
        let mut events = Events::new("inst-1");
        let added = events.instance("instance.added", json!({"name": "acme"}));

        apply_all(&InstanceProjection, &tables, &[added.clone(), added]);

        let rows = all_rows(tables.instances.as_ref());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "acme");
        assert_eq!(rows[0].created_at, rows[0].updated_at);
    }

    #[test]
    fn changed_before_added_leaves_no_row() {
        let tables = tables();
        let mut events = Events::new("inst-1");
        let changed = events.instance("instance.changed", json!({"name": "early"}));

        apply_all(&InstanceProjection, &tables, &[changed]);
        assert!(all_rows(tables.instances.as_ref()).is_empty());
    }

    #[test]
    fn setters_touch_only_their_field() {
        let tables = tables();
        let mut events = Events::new("inst-1");
        let batch = [
            events.instance("instance.added", json!({"name": "acme"})),
            events.instance("instance.default.org.set", json!({"org_id": "org-1"})),
            events.instance("instance.default.language.set", json!({"language": "de"})),
        ];
        apply_all(&InstanceProjection, &tables, &batch);

        let row = &all_rows(tables.instances.as_ref())[0];
        assert_eq!(row.name, "acme");
        assert_eq!(row.default_org_id, Some(OrgId::from("org-1")));
        assert_eq!(row.default_language.as_deref(), Some("de"));
        assert_eq!(row.iam_project_id, None);
        assert_eq!(row.updated_at, events.now());
    }

    #[test]
    fn primary_domain_moves() {
        let tables = tables();
        let mut events = Events::new("inst-1");
        let batch = [
            events.instance(
                "instance.domain.added",
                json!({"domain": "a.example", "generated": true}),
            ),
            events.instance("instance.domain.added", json!({"domain": "b.example"})),
            events.instance("instance.domain.primary.set", json!({"domain": "a.example"})),
            events.instance("instance.domain.primary.set", json!({"domain": "b.example"})),
        ];
        apply_all(&InstanceProjection, &tables, &batch);

        let rows = all_rows(tables.instance_domains.as_ref());
        let primary: Vec<_> = rows
            .iter()
            .filter(|d| d.is_primary)
            .map(|d| d.domain.as_str())
            .collect();
        assert_eq!(primary, vec!["b.example"]);
        assert!(rows.iter().any(|d| d.domain == "a.example" && d.is_generated));
    }
}
