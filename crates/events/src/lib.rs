//! Event plumbing: envelopes, closed event unions and the in-process bus.
//!
//! Payload types for each aggregate live in `warden-identity`; this crate only
//! knows how an event travels and how a union is decoded from its type tag.

extern crate self as warden_events;

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod kind;
pub mod tenant;

pub use bus::{EventBus, Subscription};
pub use envelope::{EventEnvelope, StreamKey};
pub use event::{DecodeError, Event};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use kind::AggregateKind;
pub use tenant::TenantScoped;

#[doc(hidden)]
pub mod __private {
    pub use serde;
    pub use serde_json;
}
