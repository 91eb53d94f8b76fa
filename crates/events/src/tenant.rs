use warden_core::InstanceId;

use crate::EventEnvelope;

/// Messages that belong to exactly one instance.
///
/// Workers use this to stay pinned to a single instance when asked to.
pub trait TenantScoped {
    fn instance_id(&self) -> &InstanceId;
}

impl<E> TenantScoped for EventEnvelope<E> {
    fn instance_id(&self) -> &InstanceId {
        EventEnvelope::instance_id(self)
    }
}
