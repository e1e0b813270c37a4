//! End-to-end saga flows across three in-process services.

mod common;

use std::collections::HashSet;
use std::time::Duration;

use serde_json::{json, Value};

use txweave::api::tx::{RequestTxCreateEvent, ResponseTxCreateEvent};
use txweave::coord::context::{ControlContext, ExecStatus, HEADER_CONTROL_CONTEXT, HEADER_LOGGER_ID};
use txweave::storage::domain::User;
use txweave::storage::{EventLogStore, EventStore, UserStore};

use common::{partition_of, spawn_cluster, wait_until, TestCluster};

fn create_event_request(user_id: i64, name: &str) -> RequestTxCreateEvent {
    RequestTxCreateEvent {
        user_id,
        event_name: name.to_string(),
        event_info: "integration".to_string(),
        start_at: None,
        end_at: None,
        location: "somewhere".to_string(),
        participants: vec![],
    }
}

async fn post_create_event(
    cluster: &TestCluster,
    req: &RequestTxCreateEvent,
    logger_id: &str,
) -> reqwest::Response {
    cluster
        .client
        .post(format!("{}/api/v1/tx/create-event", cluster.user.url))
        .header(HEADER_CONTROL_CONTEXT, ControlContext::default().encode())
        .header(HEADER_LOGGER_ID, logger_id)
        .json(req)
        .send()
        .await
        .expect("create-event request")
}

async fn seed_users(cluster: &TestCluster, ids: &[i64]) {
    let store = cluster.user.users.as_ref().expect("user store");
    for id in ids {
        store
            .seed_user(User {
                user_id: *id,
                user_name: format!("user-{id}"),
                host_events: vec![],
            })
            .await;
    }
}

async fn wait_all_completed(cluster: &TestCluster, expected: usize) {
    wait_until(Duration::from_secs(20), || async {
        let statuses = cluster.user.journal.checkpoint_statuses().await;
        statuses.len() == expected
            && statuses.values().all(|status| *status == ExecStatus::Completed)
    })
    .await;
}

/// Happy-path fan-out: one saga touches all three services exactly once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_create_event_saga_happy_path() {
    let cluster = spawn_cluster().await;
    seed_users(&cluster, &[1]).await;

    let response = post_create_event(&cluster, &create_event_request(1, "launch party"), "s1").await;
    assert_eq!(response.status().as_u16(), 201);
    let resp: ResponseTxCreateEvent = response.json().await.expect("response body");
    assert!(resp.event_id > 0);

    wait_all_completed(&cluster, 1).await;

    // each participant cached exactly one result
    assert_eq!(cluster.event.journal.result_count().await, 1);
    assert_eq!(cluster.event_log.journal.result_count().await, 1);
    assert_eq!(cluster.user.journal.result_count().await, 1);

    let event = cluster
        .event
        .events
        .as_ref()
        .expect("event store")
        .get_event(resp.event_id)
        .await
        .expect("created event");
    assert_eq!(event.event_name, "launch party");
    assert_eq!(event.host_id, 1);

    let logs = cluster
        .event_log
        .event_logs
        .as_ref()
        .expect("log store")
        .list_logs(resp.event_id)
        .await
        .expect("logs");
    assert_eq!(logs.len(), 1);

    let user = cluster
        .user
        .users
        .as_ref()
        .expect("user store")
        .get_user(1)
        .await
        .expect("user");
    assert_eq!(user.host_events, vec![resp.event_id]);

    // receiver clocks advanced exactly once per participant
    let partition = partition_of(&[json!(1)]);
    assert_eq!(cluster.event.state.tx_mgr.receiver_clocks.get(partition, "user"), 1);
    assert_eq!(
        cluster.event_log.state.tx_mgr.receiver_clocks.get(partition, "user"),
        1
    );
    assert_eq!(cluster.user.state.tx_mgr.receiver_clocks.get(partition, "user"), 1);
}

/// Concurrent sagas: per (partition, origin) the participants apply stages
/// contiguously, and every saga reaches Completed with exactly one cached
/// result per stage.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_sagas_keep_partition_order() {
    let cluster = spawn_cluster().await;
    let user_ids: Vec<i64> = (1..=4).collect();
    let per_user = 5usize;
    seed_users(&cluster, &user_ids).await;

    let mut handles = Vec::new();
    for user_id in &user_ids {
        for i in 0..per_user {
            let client = cluster.client.clone();
            let url = format!("{}/api/v1/tx/create-event", cluster.user.url);
            let req = create_event_request(*user_id, &format!("event-{user_id}-{i}"));
            handles.push(tokio::spawn(async move {
                let response = client
                    .post(&url)
                    .header(HEADER_CONTROL_CONTEXT, ControlContext::default().encode())
                    .json(&req)
                    .send()
                    .await
                    .expect("request");
                assert_eq!(response.status().as_u16(), 201);
                let resp: ResponseTxCreateEvent = response.json().await.expect("body");
                assert!(resp.event_id > 0);
            }));
        }
    }
    for handle in handles {
        handle.await.expect("request task");
    }

    let total = user_ids.len() * per_user;
    wait_all_completed(&cluster, total).await;

    // stage results: one per saga per participant
    assert_eq!(cluster.event.journal.result_count().await, total);
    assert_eq!(cluster.event_log.journal.result_count().await, total);
    assert_eq!(cluster.user.journal.result_count().await, total);

    // per-partition receiver clocks equal the number of sagas routed there,
    // i.e. handler bodies ran at timestamps 1..=n contiguously
    let mut per_partition = std::collections::HashMap::new();
    for user_id in &user_ids {
        *per_partition.entry(partition_of(&[json!(user_id)])).or_insert(0u64) += per_user as u64;
    }
    for (partition, count) in &per_partition {
        for service in [&cluster.event, &cluster.event_log, &cluster.user] {
            assert_eq!(
                service.state.tx_mgr.receiver_clocks.get(*partition, "user"),
                *count,
                "receiver clock mismatch on partition {partition}"
            );
        }
    }

    // within a partition, commit stages executed in timestamp order, so the
    // event ids observed by the event service are strictly increasing
    for partition in per_partition.keys() {
        let results = cluster.event.recorder.responses(*partition);
        let ids: Vec<i64> = results
            .iter()
            .filter_map(|value| value.get("event_id").and_then(Value::as_i64))
            .collect();
        assert_eq!(ids.len(), per_partition[partition] as usize);
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "out of order: {ids:?}");
    }

    // every user hosts exactly the events created on their behalf
    let mut seen_events = HashSet::new();
    for user_id in &user_ids {
        let user = cluster
            .user
            .users
            .as_ref()
            .expect("user store")
            .get_user(*user_id)
            .await
            .expect("user");
        assert_eq!(user.host_events.len(), per_user);
        for event_id in &user.host_events {
            assert!(seen_events.insert(*event_id), "event hosted twice");
        }
    }
    assert_eq!(
        cluster.event.events.as_ref().expect("event store").event_count().await,
        total
    );
}

/// An unrecoverable continuation stage force-completes the saga: the commit
/// survives, the failing participant's table is untouched.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unrecoverable_stage_force_completes() {
    let cluster = spawn_cluster().await;
    // user 77 is never seeded, so the add-host stage 404s as unrecoverable

    let response = post_create_event(&cluster, &create_event_request(77, "ghost host"), "s4").await;
    assert_eq!(response.status().as_u16(), 201);
    let resp: ResponseTxCreateEvent = response.json().await.expect("body");

    wait_all_completed(&cluster, 1).await;

    // the commit stage's effect is durable
    let event = cluster
        .event
        .events
        .as_ref()
        .expect("event store")
        .get_event(resp.event_id)
        .await
        .expect("event");
    assert_eq!(event.event_name, "ghost host");

    // the failed participant recorded nothing
    assert_eq!(cluster.user.journal.result_count().await, 0);
}

/// Stale timestamp replay: the participant answers from the cache without
/// re-executing or advancing its clock.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stale_timestamp_hits_dedup_cache() {
    let cluster = spawn_cluster().await;
    seed_users(&cluster, &[1]).await;

    let response = post_create_event(&cluster, &create_event_request(1, "original"), "s6").await;
    assert_eq!(response.status().as_u16(), 201);
    let resp: ResponseTxCreateEvent = response.json().await.expect("body");
    wait_all_completed(&cluster, 1).await;

    let partition = partition_of(&[json!(1)]);
    let clock_before = cluster.event.state.tx_mgr.receiver_clocks.get(partition, "user");
    let events_before = cluster.event.events.as_ref().expect("event store").event_count().await;

    // replay the commit stage call with its original (now stale) timestamp
    let stage_ctx = txweave::coord::context::StageContext {
        partition,
        service: "user".to_string(),
        timestamp: 1,
        attrs: vec![],
        dry_run: false,
    };
    let replay = cluster
        .client
        .post(format!("{}/api/v1/events", cluster.event.url))
        .header(
            txweave::coord::context::HEADER_STAGE_CONTEXT,
            stage_ctx.encode(),
        )
        .json(&json!({"event": {"event_name": "replayed", "host_id": 1}}))
        .send()
        .await
        .expect("replay");
    assert_eq!(replay.status().as_u16(), 201);
    let cached: Value = replay.json().await.expect("cached body");
    assert_eq!(cached.get("event_id").and_then(Value::as_i64), Some(resp.event_id));

    // no new execution, no clock movement
    assert_eq!(
        cluster.event.state.tx_mgr.receiver_clocks.get(partition, "user"),
        clock_before
    );
    assert_eq!(
        cluster.event.events.as_ref().expect("event store").event_count().await,
        events_before
    );
    assert_eq!(cluster.event.journal.result_count().await, 1);
}
