//! `warden-identity`: event payloads of the identity platform.
//!
//! One module per aggregate family. Each module declares the payload structs
//! and a closed [`warden_events::Event`] union that decodes them from their
//! type tags. Value types that also appear on read models (states, provider
//! configurations, settings) live here too.

#[macro_use]
mod macros;

pub mod authorization;
pub mod idp;
pub mod instance;
pub mod org;
pub mod project;
pub mod secret;
pub mod session;
pub mod settings;
pub mod state;
pub mod user;

pub use authorization::AuthorizationEvent;
pub use idp::{IdpConfig, IdpEvent, IdpType, IdpVariant};
pub use instance::InstanceEvent;
pub use org::OrgEvent;
pub use project::ProjectEvent;
pub use secret::CryptoValue;
pub use session::SessionEvent;
pub use settings::{LabelState, SettingsEvent, SettingsKind};
pub use state::{LifecycleState, UserState};
pub use user::UserEvent;
