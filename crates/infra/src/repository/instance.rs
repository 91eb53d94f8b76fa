use warden_core::{Condition, InstanceId, TextOperation};

use crate::projections::instance::{InstanceDomainRow, InstanceRow};
use crate::read_model::ProjectionTables;
use crate::repository::{Repository, instance_condition};

pub type InstanceRepository<'a> = Repository<'a, InstanceRow>;
pub type InstanceDomainRepository<'a> = Repository<'a, InstanceDomainRow>;

impl<'a> Repository<'a, InstanceRow> {
    pub fn instances(tables: &'a ProjectionTables) -> Self {
        Self::new(tables.instances())
    }

    /// An instance row's own id is its tenant id.
    pub fn primary_key_condition(instance_id: &InstanceId) -> Condition {
        instance_condition(instance_id)
    }

    pub fn name_condition(op: TextOperation, name: &str) -> Condition {
        Condition::text(InstanceRow::NAME, op, name)
    }
}

impl<'a> Repository<'a, InstanceDomainRow> {
    pub fn instance_domains(tables: &'a ProjectionTables) -> Self {
        Self::new(tables.instance_domains())
    }

    pub fn primary_key_condition(instance_id: &InstanceId, domain: &str) -> Condition {
        instance_condition(instance_id)
            .and_also(Condition::equal(InstanceDomainRow::DOMAIN, domain))
    }

    pub fn domain_condition(op: TextOperation, domain: &str) -> Condition {
        Condition::text(InstanceDomainRow::DOMAIN, op, domain)
    }

    pub fn is_primary_condition(is_primary: bool) -> Condition {
        Condition::equal(InstanceDomainRow::IS_PRIMARY, is_primary)
    }

    pub fn is_generated_condition(is_generated: bool) -> Condition {
        Condition::equal(InstanceDomainRow::IS_GENERATED, is_generated)
    }
}
