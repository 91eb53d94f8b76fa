//! Organization aggregate, including its domains and metadata.

use serde::{Deserialize, Serialize};

use warden_events::event_union;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgAdded {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgChanged {
    pub name: String,
}

/// Payload-less org lifecycle events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrgLifecycle {}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainValidationType {
    Http,
    Dns,
}

impl DomainValidationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainValidationType::Http => "http",
            DomainValidationType::Dns => "dns",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgDomainRef {
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgDomainVerificationAdded {
    pub domain: String,
    pub validation_type: DomainValidationType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgMetadataSet {
    pub key: String,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgMetadataRemoved {
    pub key: String,
}

event_union! {
    pub enum OrgEvent {
        Added(OrgAdded) = "org.added",
        Changed(OrgChanged) = "org.changed",
        Deactivated(OrgLifecycle) = "org.deactivated",
        Reactivated(OrgLifecycle) = "org.reactivated",
        Removed(OrgLifecycle) = "org.removed",
        DomainAdded(OrgDomainRef) = "org.domain.added",
        DomainVerificationAdded(OrgDomainVerificationAdded) = "org.domain.verification.added",
        DomainVerified(OrgDomainRef) = "org.domain.verified",
        DomainPrimarySet(OrgDomainRef) = "org.domain.primary.set",
        DomainRemoved(OrgDomainRef) = "org.domain.removed",
        MetadataSet(OrgMetadataSet) = "org.metadata.set",
        MetadataRemoved(OrgMetadataRemoved) = "org.metadata.removed",
        MetadataRemovedAll(OrgLifecycle) = "org.metadata.removed.all",
    }
}
