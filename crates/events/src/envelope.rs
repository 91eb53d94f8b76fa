use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use warden_core::{InstanceId, OrgId};

use crate::event::{DecodeError, Event};
use crate::kind::AggregateKind;

/// Envelope for an event, carrying tenant and stream metadata.
///
/// Notes:
/// - **Multi-tenancy**: `instance_id` is always present; `org_id` is the
///   owning organization when the aggregate lives under one.
/// - **Ordering**: `sequence_number` increases monotonically per stream
///   (`instance_id`, `aggregate_type`, `aggregate_id`).
/// - `created_at` is the event time every reducer stamps rows with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    instance_id: InstanceId,
    org_id: Option<OrgId>,

    aggregate_type: AggregateKind,
    aggregate_id: String,

    event_type: String,

    /// Monotonically increasing position in the aggregate stream.
    sequence_number: u64,
    created_at: DateTime<Utc>,
    creator: Option<String>,

    payload: E,
}

/// Identity of one ordered event stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub instance_id: InstanceId,
    pub aggregate_type: AggregateKind,
    pub aggregate_id: String,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        instance_id: InstanceId,
        aggregate_type: AggregateKind,
        aggregate_id: impl Into<String>,
        sequence_number: u64,
        event_type: impl Into<String>,
        created_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            instance_id,
            org_id: None,
            aggregate_type,
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            sequence_number,
            created_at,
            creator: None,
            payload,
        }
    }

    pub fn with_org(mut self, org_id: OrgId) -> Self {
        self.org_id = Some(org_id);
        self
    }

    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = Some(creator.into());
        self
    }

    pub fn with_event_id(mut self, event_id: Uuid) -> Self {
        self.event_id = event_id;
        self
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn org_id(&self) -> Option<&OrgId> {
        self.org_id.as_ref()
    }

    pub fn aggregate_type(&self) -> AggregateKind {
        self.aggregate_type
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn creator(&self) -> Option<&str> {
        self.creator.as_deref()
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }

    pub fn stream_key(&self) -> StreamKey {
        StreamKey {
            instance_id: self.instance_id.clone(),
            aggregate_type: self.aggregate_type,
            aggregate_id: self.aggregate_id.clone(),
        }
    }

    fn with_payload<T>(&self, payload: T) -> EventEnvelope<T> {
        EventEnvelope {
            event_id: self.event_id,
            instance_id: self.instance_id.clone(),
            org_id: self.org_id.clone(),
            aggregate_type: self.aggregate_type,
            aggregate_id: self.aggregate_id.clone(),
            event_type: self.event_type.clone(),
            sequence_number: self.sequence_number,
            created_at: self.created_at,
            creator: self.creator.clone(),
            payload,
        }
    }
}

impl EventEnvelope<serde_json::Value> {
    /// Decode the raw JSON payload into the closed union `E`.
    pub fn decode<E: Event>(&self) -> Result<EventEnvelope<E>, DecodeError> {
        let event = E::decode(&self.event_type, &self.payload)?;
        Ok(self.with_payload(event))
    }
}
