//! Organization projection: orgs, their domains and metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use warden_core::condition::columns;
use warden_core::{Column, Condition, InstanceId, OrgId, Record, Value};
use warden_events::{AggregateKind, EventEnvelope};
use warden_identity::LifecycleState;
use warden_identity::OrgEvent;
use warden_identity::org::DomainValidationType;

use crate::projections::cascade::{CascadePlan, mark_removed};
use crate::projections::{Reducer, ReducerError, routes_of};
use crate::read_model::{ProjectionTables, Row, RowKey};

// ─────────────────────────────────────────────────────────────────────────────
// Read Models
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgRow {
    pub instance_id: InstanceId,
    pub id: OrgId,
    pub name: String,
    pub state: LifecycleState,
    pub primary_domain: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrgRow {
    pub const NAME: Column = Column::new("name");
    pub const PRIMARY_DOMAIN: Column = Column::new("primary_domain");
}

impl Record for OrgRow {
    fn value(&self, column: &Column) -> Option<Value> {
        Some(match column.name() {
            "instance_id" => (&self.instance_id).into(),
            "id" | "org_id" => (&self.id).into(),
            "name" => (&self.name).into(),
            "state" => self.state.as_str().into(),
            "primary_domain" => self.primary_domain.as_ref().into(),
            "created_at" => self.created_at.into(),
            "updated_at" => self.updated_at.into(),
            _ => return None,
        })
    }
}

impl Row for OrgRow {
    const TABLE: &'static str = "organizations";

    fn key(&self) -> RowKey {
        RowKey::new(self.instance_id.clone(), self.id.as_str())
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgDomainRow {
    pub instance_id: InstanceId,
    pub org_id: OrgId,
    pub domain: String,
    pub is_verified: bool,
    pub is_primary: bool,
    pub validation_type: Option<DomainValidationType>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrgDomainRow {
    pub const DOMAIN: Column = Column::new("domain");
    pub const IS_VERIFIED: Column = Column::new("is_verified");
    pub const IS_PRIMARY: Column = Column::new("is_primary");
}

impl Record for OrgDomainRow {
    fn value(&self, column: &Column) -> Option<Value> {
        Some(match column.name() {
            "instance_id" => (&self.instance_id).into(),
            "org_id" => (&self.org_id).into(),
            "id" | "domain" => (&self.domain).into(),
            "is_verified" => self.is_verified.into(),
            "is_primary" => self.is_primary.into(),
            "validation_type" => self.validation_type.map(|v| v.as_str()).into(),
            "created_at" => self.created_at.into(),
            "updated_at" => self.updated_at.into(),
            _ => return None,
        })
    }
}

impl Row for OrgDomainRow {
    const TABLE: &'static str = "org_domains";

    fn key(&self) -> RowKey {
        RowKey::scoped(self.instance_id.clone(), self.org_id.as_str(), self.domain.clone())
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

/// One key/value pair of org metadata. Values are opaque bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgMetadataRow {
    pub instance_id: InstanceId,
    pub org_id: OrgId,
    pub key: String,
    pub value: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrgMetadataRow {
    pub const KEY: Column = Column::new("key");
}

impl Record for OrgMetadataRow {
    fn value(&self, column: &Column) -> Option<Value> {
        Some(match column.name() {
            "instance_id" => (&self.instance_id).into(),
            "org_id" => (&self.org_id).into(),
            "id" | "key" => (&self.key).into(),
            "created_at" => self.created_at.into(),
            "updated_at" => self.updated_at.into(),
            _ => return None,
        })
    }
}

impl Row for OrgMetadataRow {
    const TABLE: &'static str = "org_metadata";

    fn key(&self) -> RowKey {
        RowKey::scoped(self.instance_id.clone(), self.org_id.as_str(), self.key.clone())
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Projection
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct OrgProjection;

impl Reducer for OrgProjection {
    fn name(&self) -> &'static str {
        "organizations"
    }

    fn routes(&self) -> Vec<(AggregateKind, &'static str)> {
        routes_of::<OrgEvent>()
    }

    fn reduce(
        &self,
        tables: &ProjectionTables,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ReducerError> {
        let envelope = envelope.decode::<OrgEvent>()?;
        let instance_id = envelope.instance_id().clone();
        let org_id = OrgId::from(envelope.aggregate_id());
        let at = envelope.created_at();
        let key = RowKey::new(instance_id.clone(), org_id.as_str());
        let child_key = |domain: &str| RowKey::scoped(instance_id.clone(), org_id.as_str(), domain);

        let orgs = tables.organizations();
        let domains = tables.org_domains();
        let metadata = tables.org_metadata();

        match envelope.into_payload() {
            OrgEvent::Added(e) => {
                orgs.upsert(
                    &key,
                    || OrgRow {
                        instance_id: instance_id.clone(),
                        id: org_id.clone(),
                        name: e.name.clone(),
                        state: LifecycleState::Active,
                        primary_domain: None,
                        created_at: at,
                        updated_at: at,
                    },
                    |row| {
                        row.name = e.name.clone();
                        row.updated_at = at;
                    },
                )?;
            }
            OrgEvent::Changed(e) => {
                orgs.update(&key, at, |row| row.name = e.name.clone())?;
            }
            OrgEvent::Deactivated(_) => {
                orgs.update(&key, at, |row| row.state = LifecycleState::Inactive)?;
            }
            OrgEvent::Reactivated(_) => {
                orgs.update(&key, at, |row| row.state = LifecycleState::Active)?;
            }
            OrgEvent::Removed(_) => {
                mark_removed(tables, &instance_id, Some(&org_id), at)?;
                CascadePlan::organization(instance_id.clone(), org_id.clone()).run(tables)?;
            }
            OrgEvent::DomainAdded(e) => {
                domains.upsert(
                    &child_key(&e.domain),
                    || OrgDomainRow {
                        instance_id: instance_id.clone(),
                        org_id: org_id.clone(),
                        domain: e.domain.clone(),
                        is_verified: false,
                        is_primary: false,
                        validation_type: None,
                        created_at: at,
                        updated_at: at,
                    },
                    |_| {},
                )?;
            }
            OrgEvent::DomainVerificationAdded(e) => {
                domains.update(&child_key(&e.domain), at, |row| {
                    row.validation_type = Some(e.validation_type)
                })?;
            }
            OrgEvent::DomainVerified(e) => {
                domains.update(&child_key(&e.domain), at, |row| row.is_verified = true)?;
            }
            OrgEvent::DomainPrimarySet(e) => {
                let others = Condition::equal(columns::INSTANCE_ID, &instance_id)
                    .and_also(Condition::equal(columns::ORG_ID, &org_id))
                    .and_also(Condition::equal(OrgDomainRow::IS_PRIMARY, true))
                    .and_also(Condition::not_equal(OrgDomainRow::DOMAIN, e.domain.as_str()));
                domains.update_where(&others, at, |row| row.is_primary = false)?;
                domains.update(&child_key(&e.domain), at, |row| row.is_primary = true)?;
                orgs.update(&key, at, |row| row.primary_domain = Some(e.domain.clone()))?;
            }
            OrgEvent::DomainRemoved(e) => {
                domains.delete(&child_key(&e.domain))?;
                orgs.update(&key, at, |row| {
                    if row.primary_domain.as_deref() == Some(e.domain.as_str()) {
                        row.primary_domain = None;
                    }
                })?;
            }
            OrgEvent::MetadataSet(e) => {
                metadata.upsert(
                    &child_key(&e.key),
                    || OrgMetadataRow {
                        instance_id: instance_id.clone(),
                        org_id: org_id.clone(),
                        key: e.key.clone(),
                        value: e.value.clone(),
                        created_at: at,
                        updated_at: at,
                    },
                    |row| {
                        if row.value != e.value {
                            row.value = e.value.clone();
                            row.updated_at = at;
                        }
                    },
                )?;
            }
            OrgEvent::MetadataRemoved(e) => {
                metadata.delete(&child_key(&e.key))?;
            }
            OrgEvent::MetadataRemovedAll(_) => {
                let all = Condition::equal(columns::INSTANCE_ID, &instance_id)
                    .and_also(Condition::equal(columns::ORG_ID, &org_id));
                metadata.delete_where(&all)?;
            }
        }

        Ok(())
    }
}
