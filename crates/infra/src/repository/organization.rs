use warden_core::condition::columns;
use warden_core::{Condition, InstanceId, OrgId, TextOperation};
use warden_identity::LifecycleState;

use crate::projections::organization::{OrgDomainRow, OrgMetadataRow, OrgRow};
use crate::read_model::ProjectionTables;
use crate::repository::{Repository, instance_condition};

pub type OrgRepository<'a> = Repository<'a, OrgRow>;
pub type OrgDomainRepository<'a> = Repository<'a, OrgDomainRow>;
pub type OrgMetadataRepository<'a> = Repository<'a, OrgMetadataRow>;

fn org_condition(org_id: &OrgId) -> Condition {
    Condition::equal(columns::ORG_ID, org_id)
}

impl<'a> Repository<'a, OrgRow> {
    pub fn orgs(tables: &'a ProjectionTables) -> Self {
        Self::new(tables.organizations())
    }

    pub fn primary_key_condition(instance_id: &InstanceId, org_id: &OrgId) -> Condition {
        instance_condition(instance_id).and_also(Condition::equal(columns::ID, org_id))
    }

    pub fn name_condition(op: TextOperation, name: &str) -> Condition {
        Condition::text(OrgRow::NAME, op, name)
    }

    pub fn state_condition(state: LifecycleState) -> Condition {
        Condition::equal(columns::STATE, state.as_str())
    }

    pub fn primary_domain_condition(op: TextOperation, domain: &str) -> Condition {
        Condition::text(OrgRow::PRIMARY_DOMAIN, op, domain)
    }
}

impl<'a> Repository<'a, OrgDomainRow> {
    pub fn org_domains(tables: &'a ProjectionTables) -> Self {
        Self::new(tables.org_domains())
    }

    pub fn primary_key_condition(
        instance_id: &InstanceId,
        org_id: &OrgId,
        domain: &str,
    ) -> Condition {
        instance_condition(instance_id)
            .and_also(org_condition(org_id))
            .and_also(Condition::equal(OrgDomainRow::DOMAIN, domain))
    }

    pub fn org_condition(org_id: &OrgId) -> Condition {
        org_condition(org_id)
    }

    pub fn domain_condition(op: TextOperation, domain: &str) -> Condition {
        Condition::text(OrgDomainRow::DOMAIN, op, domain)
    }

    pub fn is_verified_condition(is_verified: bool) -> Condition {
        Condition::equal(OrgDomainRow::IS_VERIFIED, is_verified)
    }

    pub fn is_primary_condition(is_primary: bool) -> Condition {
        Condition::equal(OrgDomainRow::IS_PRIMARY, is_primary)
    }
}

impl<'a> Repository<'a, OrgMetadataRow> {
    pub fn org_metadata(tables: &'a ProjectionTables) -> Self {
        Self::new(tables.org_metadata())
    }

    pub fn primary_key_condition(instance_id: &InstanceId, org_id: &OrgId, key: &str) -> Condition {
        instance_condition(instance_id)
            .and_also(org_condition(org_id))
            .and_also(Condition::equal(OrgMetadataRow::KEY, key))
    }

    pub fn org_condition(org_id: &OrgId) -> Condition {
        org_condition(org_id)
    }

    pub fn key_condition(op: TextOperation, key: &str) -> Condition {
        Condition::text(OrgMetadataRow::KEY, op, key)
    }
}
