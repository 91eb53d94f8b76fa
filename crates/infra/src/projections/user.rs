//! User projection: human and machine accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use warden_core::condition::columns;
use warden_core::{Column, Condition, InstanceId, OrgId, Record, UserId, Value};
use warden_events::{AggregateKind, EventEnvelope};
use warden_identity::user::{AccessTokenType, Gender, HumanAdded, MachineAdded};
use warden_identity::{UserEvent, UserState};

use crate::projections::cascade::CascadePlan;
use crate::projections::{Reducer, ReducerError, require_org, routes_of};
use crate::read_model::{ProjectionTables, Row, RowKey};

// ─────────────────────────────────────────────────────────────────────────────
// Read Model
// ─────────────────────────────────────────────────────────────────────────────

/// A contact value with its verified and pending halves kept apart.
///
/// A change lands in `unverified`; verification promotes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub verified: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub unverified: Option<String>,
}

impl Contact {
    fn new(value: &str, verified: bool, at: DateTime<Utc>) -> Self {
        if verified {
            Self {
                verified: Some(value.to_string()),
                verified_at: Some(at),
                unverified: None,
            }
        } else {
            Self {
                verified: None,
                verified_at: None,
                unverified: Some(value.to_string()),
            }
        }
    }

    /// The value in use: the pending one if a change is outstanding.
    pub fn current(&self) -> Option<&str> {
        self.unverified.as_deref().or(self.verified.as_deref())
    }

    pub fn is_verified(&self) -> bool {
        self.unverified.is_none() && self.verified.is_some()
    }

    fn change(&mut self, value: &str) {
        if self.verified.as_deref() == Some(value) {
            self.unverified = None;
        } else {
            self.unverified = Some(value.to_string());
        }
    }

    fn verify(&mut self, at: DateTime<Utc>) {
        if let Some(pending) = self.unverified.take() {
            self.verified = Some(pending);
            self.verified_at = Some(at);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanProfile {
    pub first_name: String,
    pub last_name: String,
    pub nick_name: Option<String>,
    pub display_name: Option<String>,
    pub preferred_language: Option<String>,
    pub gender: Gender,
    pub email: Contact,
    pub phone: Option<Contact>,
    pub avatar_key: Option<String>,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub password_change_required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineProfile {
    pub name: String,
    pub description: Option<String>,
    pub access_token_type: AccessTokenType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserKind {
    Human(HumanProfile),
    Machine(MachineProfile),
}

impl UserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserKind::Human(_) => "human",
            UserKind::Machine(_) => "machine",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRow {
    pub instance_id: InstanceId,
    pub org_id: OrgId,
    pub id: UserId,
    pub username: String,
    pub state: UserState,
    pub kind: UserKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRow {
    pub const USERNAME: Column = Column::new("username");
    pub const TYPE: Column = Column::new("type");
    pub const EMAIL: Column = Column::new("email");
    pub const FIRST_NAME: Column = Column::new("first_name");
    pub const LAST_NAME: Column = Column::new("last_name");
    pub const DISPLAY_NAME: Column = Column::new("display_name");

    pub fn human(&self) -> Option<&HumanProfile> {
        match &self.kind {
            UserKind::Human(human) => Some(human),
            UserKind::Machine(_) => None,
        }
    }

    pub fn machine(&self) -> Option<&MachineProfile> {
        match &self.kind {
            UserKind::Machine(machine) => Some(machine),
            UserKind::Human(_) => None,
        }
    }

    fn human_mut(&mut self) -> Option<&mut HumanProfile> {
        match &mut self.kind {
            UserKind::Human(human) => Some(human),
            UserKind::Machine(_) => None,
        }
    }
}

impl Record for UserRow {
    fn value(&self, column: &Column) -> Option<Value> {
        let human = self.human();
        Some(match column.name() {
            "instance_id" => (&self.instance_id).into(),
            "org_id" => (&self.org_id).into(),
            "id" | "user_id" => (&self.id).into(),
            "username" => (&self.username).into(),
            "state" => self.state.as_str().into(),
            "type" => self.kind.as_str().into(),
            "email" => human.and_then(|h| h.email.current()).into(),
            "first_name" => human.map(|h| h.first_name.as_str()).into(),
            "last_name" => human.map(|h| h.last_name.as_str()).into(),
            "display_name" => human.and_then(|h| h.display_name.as_deref()).into(),
            "created_at" => self.created_at.into(),
            "updated_at" => self.updated_at.into(),
            _ => return None,
        })
    }
}

impl Row for UserRow {
    const TABLE: &'static str = "users";

    fn key(&self) -> RowKey {
        RowKey::new(self.instance_id.clone(), self.id.as_str())
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

/// One key/value pair of user metadata. Values are opaque bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMetadataRow {
    pub instance_id: InstanceId,
    pub org_id: OrgId,
    pub user_id: UserId,
    pub key: String,
    pub value: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserMetadataRow {
    pub const USER_ID: Column = Column::new("user_id");
    pub const KEY: Column = Column::new("key");
}

impl Record for UserMetadataRow {
    fn value(&self, column: &Column) -> Option<Value> {
        Some(match column.name() {
            "instance_id" => (&self.instance_id).into(),
            "org_id" => (&self.org_id).into(),
            "user_id" => (&self.user_id).into(),
            "id" | "key" => (&self.key).into(),
            "created_at" => self.created_at.into(),
            "updated_at" => self.updated_at.into(),
            _ => return None,
        })
    }
}

impl Row for UserMetadataRow {
    const TABLE: &'static str = "user_metadata";

    fn key(&self) -> RowKey {
        RowKey::scoped(self.instance_id.clone(), self.user_id.as_str(), self.key.clone())
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

fn human_profile(e: &HumanAdded, at: DateTime<Utc>) -> HumanProfile {
    HumanProfile {
        first_name: e.first_name.clone(),
        last_name: e.last_name.clone(),
        nick_name: e.nick_name.clone(),
        display_name: e.display_name.clone(),
        preferred_language: e.preferred_language.clone(),
        gender: e.gender,
        email: Contact::new(&e.email, e.is_email_verified, at),
        phone: e.phone.as_deref().map(|p| Contact::new(p, e.is_phone_verified, at)),
        avatar_key: None,
        password_changed_at: None,
        password_change_required: false,
    }
}

fn machine_profile(e: &MachineAdded) -> MachineProfile {
    MachineProfile {
        name: e.name.clone(),
        description: e.description.clone(),
        access_token_type: e.access_token_type,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Projection
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct UserProjection;

impl Reducer for UserProjection {
    fn name(&self) -> &'static str {
        "users"
    }

    fn routes(&self) -> Vec<(AggregateKind, &'static str)> {
        routes_of::<UserEvent>()
    }

    fn reduce(
        &self,
        tables: &ProjectionTables,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ReducerError> {
        let org_id = require_org(envelope)?;
        let envelope = envelope.decode::<UserEvent>()?;
        let instance_id = envelope.instance_id().clone();
        let user_id = UserId::from(envelope.aggregate_id());
        let at = envelope.created_at();
        let key = RowKey::new(instance_id.clone(), user_id.as_str());
        let users = tables.users();

        let new_row = |username: &str, kind: UserKind| UserRow {
            instance_id: instance_id.clone(),
            org_id: org_id.clone(),
            id: user_id.clone(),
            username: username.to_string(),
            state: UserState::Active,
            kind,
            created_at: at,
            updated_at: at,
        };

        let metadata_key = |k: &str| RowKey::scoped(instance_id.clone(), user_id.as_str(), k);

        match envelope.into_payload() {
            UserEvent::HumanAdded(e) => {
                users.upsert(
                    &key,
                    || new_row(&e.username, UserKind::Human(human_profile(&e, at))),
                    |row| {
                        row.username = e.username.clone();
                        row.kind = UserKind::Human(human_profile(&e, at));
                        row.updated_at = at;
                    },
                )?;
            }
            UserEvent::MachineAdded(e) => {
                users.upsert(
                    &key,
                    || new_row(&e.username, UserKind::Machine(machine_profile(&e))),
                    |row| {
                        row.username = e.username.clone();
                        row.kind = UserKind::Machine(machine_profile(&e));
                        row.updated_at = at;
                    },
                )?;
            }
            UserEvent::MachineChanged(e) => {
                users.update(&key, at, |row| {
                    if let UserKind::Machine(machine) = &mut row.kind {
                        if let Some(name) = &e.name {
                            machine.name = name.clone();
                        }
                        if let Some(description) = &e.description {
                            machine.description = Some(description.clone());
                        }
                        if let Some(token_type) = e.access_token_type {
                            machine.access_token_type = token_type;
                        }
                    }
                })?;
            }
            UserEvent::UsernameChanged(e) => {
                users.update(&key, at, |row| row.username = e.username.clone())?;
            }
            UserEvent::ProfileChanged(e) => {
                users.update(&key, at, |row| {
                    let Some(human) = row.human_mut() else { return };
                    if let Some(v) = &e.first_name {
                        human.first_name = v.clone();
                    }
                    if let Some(v) = &e.last_name {
                        human.last_name = v.clone();
                    }
                    if let Some(v) = &e.nick_name {
                        human.nick_name = Some(v.clone());
                    }
                    if let Some(v) = &e.display_name {
                        human.display_name = Some(v.clone());
                    }
                    if let Some(v) = &e.preferred_language {
                        human.preferred_language = Some(v.clone());
                    }
                    if let Some(v) = e.gender {
                        human.gender = v;
                    }
                })?;
            }
            UserEvent::EmailChanged(e) => {
                users.update(&key, at, |row| {
                    if let Some(human) = row.human_mut() {
                        human.email.change(&e.email);
                    }
                })?;
            }
            UserEvent::EmailVerified(_) => {
                users.update(&key, at, |row| {
                    if let Some(human) = row.human_mut() {
                        human.email.verify(at);
                    }
                })?;
            }
            UserEvent::PhoneChanged(e) => {
                users.update(&key, at, |row| {
                    if let Some(human) = row.human_mut() {
                        human.phone.get_or_insert_with(Contact::default).change(&e.phone);
                    }
                })?;
            }
            UserEvent::PhoneVerified(_) => {
                users.update(&key, at, |row| {
                    if let Some(phone) = row.human_mut().and_then(|h| h.phone.as_mut()) {
                        phone.verify(at);
                    }
                })?;
            }
            UserEvent::PhoneRemoved(_) => {
                users.update(&key, at, |row| {
                    if let Some(human) = row.human_mut() {
                        human.phone = None;
                    }
                })?;
            }
            UserEvent::PasswordChanged(e) => {
                users.update(&key, at, |row| {
                    if let Some(human) = row.human_mut() {
                        human.password_changed_at = Some(at);
                        human.password_change_required = e.change_required;
                    }
                })?;
            }
            UserEvent::AvatarAdded(e) => {
                users.update(&key, at, |row| {
                    if let Some(human) = row.human_mut() {
                        human.avatar_key = Some(e.storage_key.clone());
                    }
                })?;
            }
            UserEvent::AvatarRemoved(_) => {
                users.update(&key, at, |row| {
                    if let Some(human) = row.human_mut() {
                        human.avatar_key = None;
                    }
                })?;
            }
            UserEvent::Locked(_) => {
                users.update(&key, at, |row| row.state = UserState::Locked)?;
            }
            UserEvent::Deactivated(_) => {
                users.update(&key, at, |row| row.state = UserState::Inactive)?;
            }
            UserEvent::Unlocked(_) | UserEvent::Reactivated(_) => {
                users.update(&key, at, |row| row.state = UserState::Active)?;
            }
            UserEvent::Removed(_) => {
                CascadePlan::user(instance_id.clone(), user_id.clone()).run(tables)?;
            }
            UserEvent::MetadataSet(e) => {
                tables.user_metadata().upsert(
                    &metadata_key(&e.key),
                    || UserMetadataRow {
                        instance_id: instance_id.clone(),
                        org_id: org_id.clone(),
                        user_id: user_id.clone(),
                        key: e.key.clone(),
                        value: e.value.clone(),
                        created_at: at,
                        updated_at: at,
                    },
                    |row| {
                        if row.value != e.value {
                            row.value = e.value.clone();
                            row.updated_at = at;
                        }
                    },
                )?;
            }
            UserEvent::MetadataRemoved(e) => {
                tables.user_metadata().delete(&metadata_key(&e.key))?;
            }
            UserEvent::MetadataRemovedAll(_) => {
                let all = Condition::equal(columns::INSTANCE_ID, &instance_id)
                    .and_also(Condition::equal(UserMetadataRow::USER_ID, &user_id));
                tables.user_metadata().delete_where(&all)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::test_support::{Events, all_rows, apply_all, tables};

    fn user_event(
        events: &mut Events,
        event_type: &str,
        payload: JsonValue,
    ) -> EventEnvelope<JsonValue> {
        events.owned("org-1", AggregateKind::User, "user-1", event_type, payload)
    }

    fn human_added() -> JsonValue {
        json!({
            "username": "ada",
            "first_name": "Ada",
            "last_name": "Lovelace",
            "email": "ada@example.com",
            "is_email_verified": true,
            "phone": "+4100000",
        })
    }

    #[test]
    fn email_change_is_pending_until_verified() {
        let tables = tables();
        let mut events = Events::new("inst-1");
        let batch = [
            user_event(&mut events, "user.human.added", human_added()),
            user_event(
                &mut events,
                "user.human.email.changed",
                json!({"email": "ada@new.example"}),
            ),
        ];
        apply_all(&UserProjection, &tables, &batch);

        let row = all_rows(tables.users.as_ref()).remove(0);
        let email = &row.human().unwrap().email;
        assert_eq!(email.verified.as_deref(), Some("ada@example.com"));
        assert_eq!(email.unverified.as_deref(), Some("ada@new.example"));
        assert!(!email.is_verified());

        let verified = user_event(&mut events, "user.human.email.verified", json!({}));
        apply_all(&UserProjection, &tables, &[verified]);
        let row = all_rows(tables.users.as_ref()).remove(0);
        let email = &row.human().unwrap().email;
        assert_eq!(email.verified.as_deref(), Some("ada@new.example"));
        assert_eq!(email.verified_at, Some(events.now()));
        assert!(email.is_verified());
    }

    #[test]
    fn profile_change_keeps_untouched_fields() {
        let tables = tables();
        let mut events = Events::new("inst-1");
        let batch = [
            user_event(&mut events, "user.human.added", human_added()),
            user_event(
                &mut events,
                "user.human.profile.changed",
                json!({"nick_name": "countess"}),
            ),
        ];
        apply_all(&UserProjection, &tables, &batch);

        let row = all_rows(tables.users.as_ref()).remove(0);
        let human = row.human().unwrap();
        assert_eq!(human.first_name, "Ada");
        assert_eq!(human.nick_name.as_deref(), Some("countess"));
        let phone = human.phone.as_ref().and_then(|p| p.unverified.as_deref());
        assert_eq!(phone, Some("+4100000"));
    }

    #[test]
    fn machine_changes_ignore_humans_and_vice_versa() {
        let tables = tables();
        let mut events = Events::new("inst-1");
        let batch = [
            user_event(
                &mut events,
                "user.machine.added",
                json!({"username": "bot", "name": "Bot"}),
            ),
            user_event(
                &mut events,
                "user.human.profile.changed",
                json!({"first_name": "Nope"}),
            ),
            user_event(
                &mut events,
                "user.machine.changed",
                json!({"description": "ci runner"}),
            ),
        ];
        apply_all(&UserProjection, &tables, &batch);

        let row = all_rows(tables.users.as_ref()).remove(0);
        assert_eq!(row.kind.as_str(), "machine");
        let machine = row.machine().unwrap();
        assert_eq!(machine.name, "Bot");
        assert_eq!(machine.description.as_deref(), Some("ci runner"));
    }

    #[test]
    fn lock_and_unlock() {
        let tables = tables();
        let mut events = Events::new("inst-1");
        apply_all(
            &UserProjection,
            &tables,
            &[
                user_event(&mut events, "user.human.added", human_added()),
                user_event(&mut events, "user.locked", json!({})),
            ],
        );
        assert_eq!(all_rows(tables.users.as_ref())[0].state, UserState::Locked);

        let unlocked = user_event(&mut events, "user.unlocked", json!({}));
        apply_all(&UserProjection, &tables, &[unlocked]);
        assert_eq!(all_rows(tables.users.as_ref())[0].state, UserState::Active);
    }

    #[test]
    fn metadata_is_set_per_key_and_cleared() {
        let tables = tables();
        let mut events = Events::new("inst-1");
        let batch = [
            user_event(&mut events, "user.human.added", human_added()),
            user_event(&mut events, "user.metadata.set", json!({"key": "team", "value": [1, 2]})),
            user_event(&mut events, "user.metadata.set", json!({"key": "tier", "value": [3]})),
            user_event(&mut events, "user.metadata.set", json!({"key": "team", "value": [9]})),
        ];
        apply_all(&UserProjection, &tables, &batch);

        let rows = all_rows(tables.user_metadata.as_ref());
        assert_eq!(rows.len(), 2);
        let team = rows.iter().find(|r| r.key == "team").unwrap();
        assert_eq!(team.value, vec![9]);
        assert_eq!(team.org_id, OrgId::from("org-1"));
        assert!(team.updated_at > team.created_at);

        let removed = user_event(&mut events, "user.metadata.removed", json!({"key": "tier"}));
        apply_all(&UserProjection, &tables, &[removed]);
        assert_eq!(all_rows(tables.user_metadata.as_ref()).len(), 1);

        let cleared = user_event(&mut events, "user.metadata.removed.all", json!({}));
        apply_all(&UserProjection, &tables, &[cleared]);
        assert!(all_rows(tables.user_metadata.as_ref()).is_empty());
    }

    #[test]
    fn removing_a_user_removes_its_metadata() {
        let tables = tables();
        let mut events = Events::new("inst-1");
        let other = events.owned(
            "org-1",
            AggregateKind::User,
            "user-2",
            "user.metadata.set",
            json!({"key": "team", "value": [1]}),
        );
        let batch = [
            user_event(&mut events, "user.human.added", human_added()),
            user_event(&mut events, "user.metadata.set", json!({"key": "team", "value": [1]})),
            other,
            user_event(&mut events, "user.removed", json!({})),
        ];
        apply_all(&UserProjection, &tables, &batch);

        let left = all_rows(tables.user_metadata.as_ref());
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].user_id, UserId::from("user-2"));
    }

    proptest! {
        #[test]
        fn deactivate_reactivate_changes_only_state_and_timestamp(
            nick in proptest::option::of("[a-z]{1,8}"),
        ) {
            let tables = tables();
            let mut events = Events::new("inst-1");
            let mut added = human_added();
            added["nick_name"] = json!(nick);
            let added = user_event(&mut events, "user.human.added", added);
            apply_all(&UserProjection, &tables, &[added]);
            let before = all_rows(tables.users.as_ref()).remove(0);

            apply_all(
                &UserProjection,
                &tables,
                &[
                    user_event(&mut events, "user.deactivated", json!({})),
                    user_event(&mut events, "user.reactivated", json!({})),
                ],
            );
            let mut after = all_rows(tables.users.as_ref()).remove(0);
            prop_assert_eq!(after.updated_at, events.now());
            after.updated_at = before.updated_at;
            prop_assert_eq!(after, before);
        }
    }
}
