//! Instance aggregate: the root tenant.

use serde::{Deserialize, Serialize};

use warden_core::{OrgId, ProjectId};
use warden_events::event_union;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceAdded {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceChanged {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceRemoved {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultOrgSet {
    pub org_id: OrgId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IamProjectSet {
    pub project_id: ProjectId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultLanguageSet {
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceDomainAdded {
    pub domain: String,
    #[serde(default)]
    pub generated: bool,
}

/// Shared by "primary set" and "removed".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceDomainRef {
    pub domain: String,
}

event_union! {
    pub enum InstanceEvent {
        Added(InstanceAdded) = "instance.added",
        Changed(InstanceChanged) = "instance.changed",
        Removed(InstanceRemoved) = "instance.removed",
        DefaultOrgSet(DefaultOrgSet) = "instance.default.org.set",
        IamProjectSet(IamProjectSet) = "instance.iam.project.set",
        DefaultLanguageSet(DefaultLanguageSet) = "instance.default.language.set",
        DomainAdded(InstanceDomainAdded) = "instance.domain.added",
        DomainPrimarySet(InstanceDomainRef) = "instance.domain.primary.set",
        DomainRemoved(InstanceDomainRef) = "instance.domain.removed",
    }
}
