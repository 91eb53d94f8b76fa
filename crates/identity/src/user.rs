//! User aggregate: human and machine accounts.

use serde::{Deserialize, Serialize};

use warden_events::event_union;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    #[default]
    Unspecified,
    Female,
    Male,
    Diverse,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessTokenType {
    #[default]
    Bearer,
    Jwt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanAdded {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub nick_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub preferred_language: Option<String>,
    #[serde(default)]
    pub gender: Gender,
    pub email: String,
    #[serde(default)]
    pub is_email_verified: bool,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub is_phone_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineAdded {
    pub username: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub access_token_type: AccessTokenType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineChanged {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub access_token_type: Option<AccessTokenType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsernameChanged {
    pub username: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HumanProfileChanged {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub nick_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub preferred_language: Option<String>,
    #[serde(default)]
    pub gender: Option<Gender>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanEmailChanged {
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanPhoneChanged {
    pub phone: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HumanPasswordChanged {
    #[serde(default)]
    pub change_required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanAvatarAdded {
    pub storage_key: String,
}

/// Payload-less user events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserLifecycle {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMetadataSet {
    pub key: String,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMetadataRemoved {
    pub key: String,
}

event_union! {
    pub enum UserEvent {
        HumanAdded(HumanAdded) = "user.human.added" | "user.human.registered",
        MachineAdded(MachineAdded) = "user.machine.added",
        MachineChanged(MachineChanged) = "user.machine.changed",
        UsernameChanged(UsernameChanged) = "user.username.changed" | "user.domain.claimed",
        ProfileChanged(HumanProfileChanged) = "user.human.profile.changed",
        EmailChanged(HumanEmailChanged) = "user.human.email.changed",
        EmailVerified(UserLifecycle) = "user.human.email.verified",
        PhoneChanged(HumanPhoneChanged) = "user.human.phone.changed",
        PhoneVerified(UserLifecycle) = "user.human.phone.verified",
        PhoneRemoved(UserLifecycle) = "user.human.phone.removed",
        PasswordChanged(HumanPasswordChanged) = "user.human.password.changed",
        AvatarAdded(HumanAvatarAdded) = "user.human.avatar.added",
        AvatarRemoved(UserLifecycle) = "user.human.avatar.removed",
        Locked(UserLifecycle) = "user.locked",
        Unlocked(UserLifecycle) = "user.unlocked",
        Deactivated(UserLifecycle) = "user.deactivated",
        Reactivated(UserLifecycle) = "user.reactivated",
        Removed(UserLifecycle) = "user.removed",
        MetadataSet(UserMetadataSet) = "user.metadata.set",
        MetadataRemoved(UserMetadataRemoved) = "user.metadata.removed",
        MetadataRemovedAll(UserLifecycle) = "user.metadata.removed.all",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use warden_events::Event;

    use super::*;

    #[test]
    fn registered_decodes_as_human_added() {
        let e = UserEvent::decode(
            "user.human.registered",
            &json!({
                "username": "ada",
                "first_name": "Ada",
                "last_name": "Lovelace",
                "email": "ada@example.com"
            }),
        )
        .unwrap();
        let UserEvent::HumanAdded(added) = e else {
            panic!("wrong variant");
        };
        assert_eq!(added.gender, Gender::Unspecified);
        assert!(!added.is_email_verified);
    }
}
