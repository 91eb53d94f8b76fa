//! Ordered teardown of a removed parent and everything scoped under it.
//!
//! Children go before their parent, so a concurrent reader can see a child
//! already gone while the parent still exists, never the other way round.
//! Every step is a conditional delete and therefore safe to run again; a
//! failed cascade is retried from the top until it completes.
//!
//! A removed instance or organization leaves a [`RemovalRow`] behind. The
//! marker outlives the cascade: events of the scope that arrive late are
//! dropped against it, and a child written while the cascade ran is swept.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use warden_core::condition::columns;
use warden_core::{Column, Condition, InstanceId, OrgId, ProjectId, Record, UserId, Value};
use warden_events::EventEnvelope;

use crate::projections::{ReducerError, org_scope};
use crate::read_model::{ProjectionTables, Row, RowKey, StoreResult};
use crate::repository::{
    AuthorizationRepository, IdpRepository, InstanceDomainRepository, InstanceRepository,
    OrgDomainRepository, OrgMetadataRepository, OrgRepository, ProjectGrantRepository,
    ProjectRepository, ProjectRoleRepository, RepositoryResult, SessionRepository,
    SettingsRepository, UserMetadataRepository, UserRepository, instance_condition,
};

/// Tombstone of a removed instance (`org_id == None`) or organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalRow {
    pub instance_id: InstanceId,
    pub org_id: Option<OrgId>,
    pub removed_at: DateTime<Utc>,
}

impl RemovalRow {
    fn key_of(instance_id: &InstanceId, org_id: Option<&OrgId>) -> RowKey {
        match org_id {
            Some(org_id) => RowKey::scoped(instance_id.clone(), "org", org_id.as_str()),
            None => RowKey::new(instance_id.clone(), "instance"),
        }
    }
}

impl Record for RemovalRow {
    fn value(&self, column: &Column) -> Option<Value> {
        Some(match column.name() {
            "instance_id" => (&self.instance_id).into(),
            "org_id" => self.org_id.as_ref().into(),
            "created_at" | "updated_at" | "removed_at" => self.removed_at.into(),
            _ => return None,
        })
    }
}

impl Row for RemovalRow {
    const TABLE: &'static str = "removals";

    fn key(&self) -> RowKey {
        Self::key_of(&self.instance_id, self.org_id.as_ref())
    }

    fn touch(&mut self, _at: DateTime<Utc>) {}
}

/// Record that the instance, or one org of it, is gone. The first removal
/// time wins.
pub fn mark_removed(
    tables: &ProjectionTables,
    instance_id: &InstanceId,
    org_id: Option<&OrgId>,
    at: DateTime<Utc>,
) -> StoreResult<()> {
    tables.removals().upsert(
        &RemovalRow::key_of(instance_id, org_id),
        || RemovalRow {
            instance_id: instance_id.clone(),
            org_id: org_id.cloned(),
            removed_at: at,
        },
        |_| {},
    )?;
    Ok(())
}

/// The cascade owed to the envelope's scope, if its instance or owning org
/// has been removed.
pub fn removed_scope<E>(
    tables: &ProjectionTables,
    envelope: &EventEnvelope<E>,
) -> StoreResult<Option<CascadePlan>> {
    let removals = tables.removals();
    let instance_id = envelope.instance_id();
    if removals.get(&RemovalRow::key_of(instance_id, None))?.is_some() {
        return Ok(Some(CascadePlan::instance(instance_id.clone())));
    }

    let Some(org_id) = org_scope(envelope) else {
        return Ok(None);
    };
    let removed = removals.get(&RemovalRow::key_of(instance_id, Some(&org_id)))?;
    Ok(removed.map(|_| CascadePlan::organization(instance_id.clone(), org_id)))
}

type StepFn =
    Box<dyn Fn(&ProjectionTables, &Condition) -> RepositoryResult<usize> + Send + Sync>;

struct CascadeStep {
    name: &'static str,
    condition: Condition,
    run: StepFn,
}

/// Rows removed per step, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeReport {
    pub cascade: &'static str,
    pub removed: Vec<(&'static str, usize)>,
}

impl CascadeReport {
    pub fn total(&self) -> usize {
        self.removed.iter().map(|(_, n)| n).sum()
    }
}

pub struct CascadePlan {
    name: &'static str,
    steps: Vec<CascadeStep>,
}

impl std::fmt::Debug for CascadePlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CascadePlan")
            .field("name", &self.name)
            .field("steps", &self.steps())
            .finish()
    }
}

impl CascadePlan {
    fn new(name: &'static str) -> Self {
        Self { name, steps: Vec::new() }
    }

    fn step(
        mut self,
        name: &'static str,
        condition: Condition,
        run: impl Fn(&ProjectionTables, &Condition) -> RepositoryResult<usize>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.steps.push(CascadeStep {
            name,
            condition,
            run: Box::new(run),
        });
        self
    }

    /// Everything that belongs to the instance, then the instance itself.
    pub fn instance(instance_id: InstanceId) -> Self {
        let scope = instance_condition(&instance_id);
        Self::new("instance")
            .step("sessions", scope.clone(), |t, c| {
                SessionRepository::sessions(t).delete(c)
            })
            .step("authorizations", scope.clone(), |t, c| {
                AuthorizationRepository::authorizations(t).delete(c)
            })
            .step("user_metadata", scope.clone(), |t, c| {
                UserMetadataRepository::user_metadata(t).delete(c)
            })
            .step("users", scope.clone(), |t, c| UserRepository::users(t).delete(c))
            .step("project_grants", scope.clone(), |t, c| {
                ProjectGrantRepository::project_grants(t).delete(c)
            })
            .step("project_roles", scope.clone(), |t, c| {
                ProjectRoleRepository::project_roles(t).delete(c)
            })
            .step("projects", scope.clone(), |t, c| {
                ProjectRepository::projects(t).delete(c)
            })
            .step("idps", scope.clone(), |t, c| IdpRepository::idps(t).delete(c))
            .step("settings", scope.clone(), |t, c| {
                SettingsRepository::settings(t).delete(c)
            })
            .step("org_metadata", scope.clone(), |t, c| {
                OrgMetadataRepository::org_metadata(t).delete(c)
            })
            .step("org_domains", scope.clone(), |t, c| {
                OrgDomainRepository::org_domains(t).delete(c)
            })
            .step("organizations", scope.clone(), |t, c| OrgRepository::orgs(t).delete(c))
            .step("instance_domains", scope, |t, c| {
                InstanceDomainRepository::instance_domains(t).delete(c)
            })
            .step(
                "instance",
                InstanceRepository::primary_key_condition(&instance_id),
                |t, c| InstanceRepository::instances(t).delete(c),
            )
    }

    /// The org's users, projects, grants in both directions, providers,
    /// settings overrides, metadata and domains, then the org.
    pub fn organization(instance_id: InstanceId, org_id: OrgId) -> Self {
        let scope = instance_condition(&instance_id);
        let owned = scope
            .clone()
            .and_also(Condition::equal(columns::ORG_ID, &org_id));
        let received = scope
            .clone()
            .and_also(ProjectGrantRepository::granted_org_condition(&org_id));
        let members = owned.clone();
        let received_grants = received.clone();

        Self::new("organization")
            .step("authorizations", owned.clone(), move |t, granted_here| {
                // Granted in the org, granted to it through a project grant,
                // or held by one of its users elsewhere.
                let authorizations = AuthorizationRepository::authorizations(t);
                let mut removed = authorizations.delete(granted_here)?;
                let grants = ProjectGrantRepository::project_grants(t);
                for grant in grants.list(received_grants.clone())? {
                    let of_grant = scope
                        .clone()
                        .and_also(AuthorizationRepository::grant_condition(&grant.id));
                    removed += authorizations.delete(&of_grant)?;
                }
                for user in UserRepository::users(t).list(members.clone())? {
                    let of_user = scope
                        .clone()
                        .and_also(AuthorizationRepository::user_condition(&user.id));
                    removed += authorizations.delete(&of_user)?;
                }
                Ok(removed)
            })
            .step(
                "sessions",
                instance_condition(&instance_id)
                    .and_also(SessionRepository::user_org_condition(&org_id)),
                |t, c| SessionRepository::sessions(t).delete(c),
            )
            .step("user_metadata", owned.clone(), |t, c| {
                UserMetadataRepository::user_metadata(t).delete(c)
            })
            .step("users", owned.clone(), |t, c| UserRepository::users(t).delete(c))
            .step("project_grants", owned.clone(), move |t, c| {
                let grants = ProjectGrantRepository::project_grants(t);
                Ok(grants.delete(c)? + grants.delete(&received)?)
            })
            .step("project_roles", owned.clone(), |t, c| {
                ProjectRoleRepository::project_roles(t).delete(c)
            })
            .step("projects", owned.clone(), |t, c| {
                ProjectRepository::projects(t).delete(c)
            })
            .step("idps", owned.clone(), |t, c| IdpRepository::idps(t).delete(c))
            .step("settings", owned.clone(), |t, c| {
                SettingsRepository::settings(t).delete(c)
            })
            .step("org_metadata", owned.clone(), |t, c| {
                OrgMetadataRepository::org_metadata(t).delete(c)
            })
            .step("org_domains", owned, |t, c| {
                OrgDomainRepository::org_domains(t).delete(c)
            })
            .step(
                "organization",
                OrgRepository::primary_key_condition(&instance_id, &org_id),
                |t, c| OrgRepository::orgs(t).delete(c),
            )
    }

    pub fn user(instance_id: InstanceId, user_id: UserId) -> Self {
        let scope = instance_condition(&instance_id);
        Self::new("user")
            .step(
                "sessions",
                scope
                    .clone()
                    .and_also(SessionRepository::user_condition(&user_id)),
                |t, c| SessionRepository::sessions(t).delete(c),
            )
            .step(
                "authorizations",
                scope
                    .clone()
                    .and_also(AuthorizationRepository::user_condition(&user_id)),
                |t, c| AuthorizationRepository::authorizations(t).delete(c),
            )
            .step(
                "user_metadata",
                scope.and_also(UserMetadataRepository::user_condition(&user_id)),
                |t, c| UserMetadataRepository::user_metadata(t).delete(c),
            )
            .step(
                "user",
                UserRepository::primary_key_condition(&instance_id, &user_id),
                |t, c| UserRepository::users(t).delete(c),
            )
    }

    pub fn project(instance_id: InstanceId, project_id: ProjectId) -> Self {
        let scope = instance_condition(&instance_id);
        Self::new("project")
            .step(
                "authorizations",
                scope
                    .clone()
                    .and_also(AuthorizationRepository::project_condition(&project_id)),
                |t, c| AuthorizationRepository::authorizations(t).delete(c),
            )
            .step(
                "project_grants",
                scope
                    .clone()
                    .and_also(ProjectGrantRepository::project_condition(&project_id)),
                |t, c| ProjectGrantRepository::project_grants(t).delete(c),
            )
            .step(
                "project_roles",
                scope.and_also(ProjectRoleRepository::project_condition(&project_id)),
                |t, c| ProjectRoleRepository::project_roles(t).delete(c),
            )
            .step(
                "project",
                ProjectRepository::primary_key_condition(&instance_id, &project_id),
                |t, c| ProjectRepository::projects(t).delete(c),
            )
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Step names in execution order.
    pub fn steps(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name).collect()
    }

    /// Run every step in order. Storage retries happen inside each step; the
    /// first step that still fails stops the cascade.
    pub fn run(&self, tables: &ProjectionTables) -> Result<CascadeReport, ReducerError> {
        let mut report = CascadeReport {
            cascade: self.name,
            removed: Vec::with_capacity(self.steps.len()),
        };
        for step in &self.steps {
            let removed = (step.run)(tables, &step.condition).map_err(|source| {
                ReducerError::CascadeIncomplete {
                    cascade: self.name,
                    step: step.name,
                    source,
                }
            })?;
            debug!(cascade = self.name, step = step.name, removed, "cascade step done");
            report.removed.push((step.name, removed));
        }
        info!(cascade = self.name, removed = report.total(), "cascade complete");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{Value as JsonValue, json};
    use warden_events::{AggregateKind, EventEnvelope};

    use super::*;
    use crate::projections::authorization::AuthorizationProjection;
    use crate::projections::session::{SessionProjection, SessionRow};
    use crate::projections::user::UserProjection;
    use crate::retry::RetryPolicy;
    use crate::test_support::{Events, FlakyStore, all_rows, apply_all, tables};

    fn user_graph(events: &mut Events) -> Vec<EventEnvelope<JsonValue>> {
        vec![
            events.owned(
                "org-1",
                AggregateKind::User,
                "user-1",
                "user.human.added",
                json!({
                    "username": "ada",
                    "first_name": "Ada",
                    "last_name": "L",
                    "email": "ada@example.com"
                }),
            ),
            events.next(AggregateKind::Session, "s1", "session.added", json!({})),
            events.next(
                AggregateKind::Session,
                "s1",
                "session.user.checked",
                json!({"user_id": "user-1", "user_org_id": "org-1", "checked_at": events.now()}),
            ),
            events.owned(
                "org-1",
                AggregateKind::Authorization,
                "auth-1",
                "authorization.added",
                json!({"user_id": "user-1", "project_id": "proj-1", "role_keys": ["r"]}),
            ),
        ]
    }

    fn apply_graph(tables: &ProjectionTables, batch: &[EventEnvelope<JsonValue>]) {
        apply_all(&UserProjection, tables, &batch[..1]);
        apply_all(&SessionProjection, tables, &batch[1..3]);
        apply_all(&AuthorizationProjection, tables, &batch[3..]);
    }

    #[test]
    fn plans_delete_children_before_parents() {
        let instance = CascadePlan::instance("inst-1".into());
        let steps = instance.steps();
        assert_eq!(steps.first(), Some(&"sessions"));
        assert_eq!(steps.last(), Some(&"instance"));
        let pos = |name| steps.iter().position(|s| *s == name).unwrap();
        assert!(pos("users") < pos("organizations"));
        assert!(pos("settings") < pos("organizations"));

        let project = CascadePlan::project("inst-1".into(), "proj-1".into());
        assert_eq!(
            project.steps(),
            vec!["authorizations", "project_grants", "project_roles", "project"]
        );
    }

    #[test]
    fn user_cascade_removes_sessions_and_authorizations() {
        let tables = tables();
        let mut events = Events::new("inst-1");
        let batch = user_graph(&mut events);
        apply_graph(&tables, &batch);
        assert_eq!(all_rows(tables.sessions.as_ref()).len(), 1);

        let report = CascadePlan::user("inst-1".into(), "user-1".into())
            .run(&tables)
            .unwrap();
        assert_eq!(
            report.removed,
            vec![
                ("sessions", 1),
                ("authorizations", 1),
                ("user_metadata", 0),
                ("user", 1)
            ]
        );
        assert!(all_rows(tables.users.as_ref()).is_empty());
        assert!(all_rows(tables.sessions.as_ref()).is_empty());
        assert!(all_rows(tables.authorizations.as_ref()).is_empty());
    }

    #[test]
    fn failed_step_stops_the_cascade_and_a_rerun_completes_it() {
        let flaky = Arc::new(FlakyStore::<SessionRow>::new());
        let mut tables = tables().with_retry(RetryPolicy::no_retry());
        tables.sessions = flaky.clone();

        let mut events = Events::new("inst-1");
        let batch = user_graph(&mut events);
        apply_graph(&tables, &batch);

        flaky.fail_next(1);
        let err = CascadePlan::user("inst-1".into(), "user-1".into())
            .run(&tables)
            .unwrap_err();
        assert!(matches!(
            err,
            ReducerError::CascadeIncomplete { cascade: "user", step: "sessions", .. }
        ));
        assert!(err.is_retryable());
        // Nothing past the failed step ran.
        assert_eq!(all_rows(tables.users.as_ref()).len(), 1);

        let report = CascadePlan::user("inst-1".into(), "user-1".into())
            .run(&tables)
            .unwrap();
        assert_eq!(report.total(), 3);
        assert!(all_rows(tables.users.as_ref()).is_empty());
    }

    #[test]
    fn rerunning_a_finished_cascade_removes_nothing() {
        let tables = tables();
        let plan = CascadePlan::organization("inst-1".into(), "org-1".into());
        let report = plan.run(&tables).unwrap();
        assert_eq!(report.total(), 0);
        assert_eq!(report.removed.len(), plan.steps().len());
    }

    #[test]
    fn removal_markers_name_the_owed_cascade() {
        let tables = tables();
        let mut events = Events::new("inst-1");
        let in_org =
            events.owned("org-1", AggregateKind::User, "user-1", "user.human.added", json!({}));
        let in_other_org =
            events.owned("org-2", AggregateKind::User, "user-2", "user.human.added", json!({}));
        let org_event = events.org("org-1", "org.changed", json!({"name": "x"}));
        assert!(removed_scope(&tables, &in_org).unwrap().is_none());

        mark_removed(&tables, &"inst-1".into(), Some(&"org-1".into()), events.now()).unwrap();
        let owed = removed_scope(&tables, &in_org).unwrap().unwrap();
        assert_eq!(owed.name(), "organization");
        assert_eq!(removed_scope(&tables, &org_event).unwrap().unwrap().name(), "organization");
        assert!(removed_scope(&tables, &in_other_org).unwrap().is_none());

        mark_removed(&tables, &"inst-1".into(), None, events.now()).unwrap();
        let owed = removed_scope(&tables, &in_other_org).unwrap().unwrap();
        assert_eq!(owed.name(), "instance");
    }

    #[test]
    fn the_cascade_leaves_the_removal_marker_in_place() {
        let tables = tables();
        mark_removed(&tables, &"inst-1".into(), None, chrono::Utc::now()).unwrap();
        CascadePlan::instance("inst-1".into()).run(&tables).unwrap();
        assert_eq!(all_rows(tables.removals.as_ref()).len(), 1);
    }
}
