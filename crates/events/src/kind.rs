use core::str::FromStr;

use serde::{Deserialize, Serialize};

use warden_core::DomainError;

/// Aggregate families present on the event stream.
///
/// Event types are dotted strings whose first segment names the aggregate
/// (`"org.metadata.set"`, `"session.password.checked"`, ...). Identity
/// providers and settings travel on the instance or org aggregate.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKind {
    Instance,
    Org,
    Project,
    User,
    Authorization,
    Session,
}

impl AggregateKind {
    pub const ALL: [AggregateKind; 6] = [
        AggregateKind::Instance,
        AggregateKind::Org,
        AggregateKind::Project,
        AggregateKind::User,
        AggregateKind::Authorization,
        AggregateKind::Session,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateKind::Instance => "instance",
            AggregateKind::Org => "org",
            AggregateKind::Project => "project",
            AggregateKind::User => "user",
            AggregateKind::Authorization => "authorization",
            AggregateKind::Session => "session",
        }
    }

    /// Aggregate kind an event type belongs to, derived from its prefix.
    pub fn of_event_type(event_type: &str) -> Option<Self> {
        let prefix = event_type.split('.').next()?;
        prefix.parse().ok()
    }
}

impl core::fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregateKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AggregateKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown aggregate kind: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_prefix_selects_kind() {
        assert_eq!(
            AggregateKind::of_event_type("org.metadata.set"),
            Some(AggregateKind::Org)
        );
        assert_eq!(
            AggregateKind::of_event_type("authorization.added"),
            Some(AggregateKind::Authorization)
        );
        assert_eq!(AggregateKind::of_event_type("milestone.reached"), None);
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for kind in AggregateKind::ALL {
            assert_eq!(kind.to_string().parse::<AggregateKind>().unwrap(), kind);
        }
    }
}
