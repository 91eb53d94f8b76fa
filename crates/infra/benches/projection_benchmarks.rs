use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::{Value as JsonValue, json};

use warden_core::{InstanceId, OrgId, Query, TextOperation};
use warden_events::{AggregateKind, EventEnvelope};
use warden_infra::projections::{Dispatcher, InMemoryCursorStore, ReducerRegistry};
use warden_infra::read_model::ProjectionTables;
use warden_infra::repository::{OrgRepository, UserRepository, instance_condition};
use warden_infra::retry::RetryPolicy;

fn dispatcher() -> anyhow::Result<Dispatcher> {
    Ok(Dispatcher::new(
        Arc::new(ReducerRegistry::standard()?),
        ProjectionTables::in_memory(RetryPolicy::no_retry()),
        Arc::new(InMemoryCursorStore::new()),
    ))
}

/// One org stream per `orgs`, each an add followed by `changes` renames.
fn org_history(orgs: usize, changes: usize) -> Vec<EventEnvelope<JsonValue>> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_else(Utc::now);
    let instance = InstanceId::from("bench");
    let mut out = Vec::with_capacity(orgs * (changes + 1));
    for o in 0..orgs {
        let org = format!("org-{o}");
        for seq in 0..=changes {
            let (event_type, name) = if seq == 0 {
                ("org.added", format!("org {o}"))
            } else {
                ("org.changed", format!("org {o} v{seq}"))
            };
            out.push(
                EventEnvelope::new(
                    instance.clone(),
                    AggregateKind::Org,
                    org.as_str(),
                    seq as u64 + 1,
                    event_type,
                    start + Duration::seconds(out.len() as i64),
                    json!({"name": name}),
                )
                .with_org(OrgId::from(org.as_str())),
            );
        }
    }
    out
}

fn user_history(users: usize) -> Vec<EventEnvelope<JsonValue>> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_else(Utc::now);
    (0..users)
        .map(|u| {
            EventEnvelope::new(
                InstanceId::from("bench"),
                AggregateKind::User,
                format!("user-{u}"),
                1,
                "user.human.added",
                start + Duration::seconds(u as i64),
                json!({
                    "username": format!("user{u:05}"),
                    "first_name": "Ada",
                    "last_name": format!("Lovelace{}", u % 10),
                    "email": format!("user{u}@example.com"),
                }),
            )
            .with_org(OrgId::from("org-1"))
        })
        .collect()
}

fn bench_dispatch_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_throughput");

    for orgs in [1usize, 10, 100] {
        let history = org_history(orgs, 9);
        group.throughput(Throughput::Elements(history.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(orgs), &history, |b, history| {
            b.iter_with_setup(
                || dispatcher().unwrap(),
                |dispatcher| {
                    for envelope in history {
                        black_box(dispatcher.dispatch(envelope).unwrap());
                    }
                },
            );
        });
    }

    group.finish();
}

fn bench_redelivery(c: &mut Criterion) {
    let mut group = c.benchmark_group("redelivery");
    let history = org_history(50, 4);
    let dispatcher = dispatcher().unwrap();
    for envelope in &history {
        dispatcher.dispatch(envelope).unwrap();
    }

    group.throughput(Throughput::Elements(history.len() as u64));
    group.bench_function("duplicates_dropped_by_cursor", |b| {
        b.iter(|| {
            for envelope in &history {
                black_box(dispatcher.dispatch(envelope).unwrap());
            }
        });
    });
    group.finish();
}

fn bench_condition_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("condition_queries");
    let dispatcher = dispatcher().unwrap();
    for envelope in &user_history(2_000) {
        dispatcher.dispatch(envelope).unwrap();
    }
    let users = UserRepository::users(dispatcher.tables());
    let instance = InstanceId::from("bench");

    group.bench_function("prefix_and_ordered_page", |b| {
        let query = Query::new(
            instance_condition(&instance)
                .and_also(UserRepository::username_condition(TextOperation::StartsWith, "user01")),
        )
        .order_by_asc(warden_core::condition::columns::ID)
        .limit(20);
        b.iter(|| black_box(users.list(query.clone()).unwrap()));
    });

    group.bench_function("get_by_primary_key", |b| {
        for envelope in &org_history(1, 0) {
            dispatcher.dispatch(envelope).unwrap();
        }
        let orgs = OrgRepository::orgs(dispatcher.tables());
        let key = OrgRepository::primary_key_condition(&instance, &OrgId::from("org-0"));
        b.iter(|| black_box(orgs.get(&key).unwrap()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_dispatch_throughput,
    bench_redelivery,
    bench_condition_queries
);
criterion_main!(benches);
