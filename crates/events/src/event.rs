use thiserror::Error;

/// Why a raw payload could not become a typed event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    #[error("malformed payload for {event_type}: {message}")]
    Malformed { event_type: String, message: String },
}

impl DecodeError {
    pub fn malformed(event_type: impl Into<String>, err: impl core::fmt::Display) -> Self {
        Self::Malformed {
            event_type: event_type.into(),
            message: err.to_string(),
        }
    }
}

/// A closed union of event payloads for one projection.
///
/// Events are immutable facts. A union knows every type tag it can be
/// decoded from and rejects all others.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + Sized + 'static {
    /// Every event type tag this union decodes.
    fn event_types() -> &'static [&'static str];

    /// Decode the payload stored under `event_type`.
    fn decode(event_type: &str, payload: &serde_json::Value) -> Result<Self, DecodeError>;
}

/// Declare a closed event union.
///
/// Each variant wraps one payload type and lists the event type tags it is
/// decoded from. A `null` payload is read as an empty object so unit-like
/// payloads (`struct Removed {}`) decode without ceremony.
///
/// ```ignore
/// event_union! {
///     pub enum OrgEvent {
///         Added(OrgAdded) = "org.added",
///         Removed(OrgRemoved) = "org.removed",
///     }
/// }
/// ```
#[macro_export]
macro_rules! event_union {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident($payload:ty) = $tag:literal $(| $alt:literal)*
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            PartialEq,
            $crate::__private::serde::Serialize,
            $crate::__private::serde::Deserialize,
        )]
        #[serde(crate = "warden_events::__private::serde")]
        $vis enum $name {
            $(
                $(#[$vmeta])*
                $variant($payload),
            )+
        }

        impl $crate::Event for $name {
            fn event_types() -> &'static [&'static str] {
                &[$($tag, $($alt,)*)+]
            }

            fn decode(
                event_type: &str,
                payload: &$crate::__private::serde_json::Value,
            ) -> Result<Self, $crate::DecodeError> {
                let payload = if payload.is_null() {
                    $crate::__private::serde_json::Value::Object(Default::default())
                } else {
                    payload.clone()
                };
                match event_type {
                    $(
                        $tag $(| $alt)* => $crate::__private::serde_json::from_value::<$payload>(
                            payload,
                        )
                            .map($name::$variant)
                            .map_err(|e| $crate::DecodeError::malformed(event_type, e)),
                    )+
                    other => Err($crate::DecodeError::UnknownEventType(other.to_string())),
                }
            }
        }
    };
}
