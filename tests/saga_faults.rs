//! Fault-injection flows: filtered stages, dropped responses, and retry
//! until the filter clears.

mod common;

use std::time::Duration;

use serde_json::json;

use txweave::api::tx::{
    RequestTxCreateEvent, RequestUpdateTxFilter, ResponseTxCreateEvent, TxFilterOp, TxFilterType,
};
use txweave::coord::context::{ControlContext, ExecStatus, HEADER_CONTROL_CONTEXT};
use txweave::storage::domain::User;

use common::{partition_of, spawn_cluster, wait_until, TestCluster};

async fn update_filter(cluster: &TestCluster, url: &str, req: &RequestUpdateTxFilter) {
    let response = cluster
        .client
        .post(format!("{url}/api/v1/test/tx-filter"))
        .json(req)
        .send()
        .await
        .expect("filter update");
    assert!(response.status().is_success());
}

async fn post_create_event_with_attrs(
    cluster: &TestCluster,
    user_id: i64,
    attrs: Vec<String>,
) -> ResponseTxCreateEvent {
    let ctrl = ControlContext {
        attrs,
        ..Default::default()
    };
    let req = RequestTxCreateEvent {
        user_id,
        event_name: "filtered".to_string(),
        event_info: String::new(),
        start_at: None,
        end_at: None,
        location: String::new(),
        participants: vec![],
    };
    let response = cluster
        .client
        .post(format!("{}/api/v1/tx/create-event", cluster.user.url))
        .header(HEADER_CONTROL_CONTEXT, ctrl.encode())
        .json(&req)
        .send()
        .await
        .expect("create-event");
    assert_eq!(response.status().as_u16(), 201);
    response.json().await.expect("body")
}

/// A request filter on a continuation stage parks the saga in retry; once
/// the filter clears, the stage goes through and the saga completes.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_request_filter_blocks_stage_until_cleared() {
    let cluster = spawn_cluster().await;
    cluster
        .user
        .users
        .as_ref()
        .expect("user store")
        .seed_user(User {
            user_id: 1,
            user_name: "host".to_string(),
            host_events: vec![],
        })
        .await;

    let partition = partition_of(&[json!(1)]);
    update_filter(
        &cluster,
        &cluster.event_log.url,
        &RequestUpdateTxFilter {
            filter_type: TxFilterType::Request,
            filter_op: TxFilterOp::Add,
            partition,
            service: "user".to_string(),
            attrs: vec!["x".to_string()],
        },
    )
    .await;

    let resp = post_create_event_with_attrs(&cluster, 1, vec!["x".to_string()]).await;
    assert!(resp.event_id > 0);

    // the log stage keeps bouncing off the filter; nothing lands
    tokio::time::sleep(Duration::from_millis(300)).await;
    let statuses = cluster.user.journal.checkpoint_statuses().await;
    assert_eq!(statuses.len(), 1);
    assert!(statuses.values().all(|s| *s == ExecStatus::Committed));
    assert_eq!(
        cluster.event_log.event_logs.as_ref().expect("log store").log_count().await,
        0
    );
    // no side effect at the filtered participant, not even a cached result
    assert_eq!(cluster.event_log.journal.result_count().await, 0);

    update_filter(
        &cluster,
        &cluster.event_log.url,
        &RequestUpdateTxFilter {
            filter_type: TxFilterType::Request,
            filter_op: TxFilterOp::Clear,
            partition,
            service: "user".to_string(),
            attrs: vec![],
        },
    )
    .await;

    wait_until(Duration::from_secs(20), || async {
        let statuses = cluster.user.journal.checkpoint_statuses().await;
        statuses.values().all(|s| *s == ExecStatus::Completed)
    })
    .await;
    assert_eq!(
        cluster.event_log.event_logs.as_ref().expect("log store").log_count().await,
        1
    );
}

/// A response filter lets the handler run but the coordinator never sees the
/// answer; retries then drain through the dedup cache, so clearing the
/// filter completes the saga with exactly one physical execution.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_response_filter_drops_answer_but_executes_once() {
    let cluster = spawn_cluster().await;
    cluster
        .user
        .users
        .as_ref()
        .expect("user store")
        .seed_user(User {
            user_id: 2,
            user_name: "host".to_string(),
            host_events: vec![],
        })
        .await;

    let partition = partition_of(&[json!(2)]);
    update_filter(
        &cluster,
        &cluster.event_log.url,
        &RequestUpdateTxFilter {
            filter_type: TxFilterType::Response,
            filter_op: TxFilterOp::Add,
            partition,
            service: "user".to_string(),
            attrs: vec!["y".to_string()],
        },
    )
    .await;

    post_create_event_with_attrs(&cluster, 2, vec!["y".to_string()]).await;

    // the handler executed and cached its result even though every response
    // is being dropped
    wait_until(Duration::from_secs(20), || async {
        cluster.event_log.journal.result_count().await == 1
    })
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        cluster.event_log.event_logs.as_ref().expect("log store").log_count().await,
        1
    );
    let statuses = cluster.user.journal.checkpoint_statuses().await;
    assert!(statuses.values().all(|s| *s == ExecStatus::Committed));

    update_filter(
        &cluster,
        &cluster.event_log.url,
        &RequestUpdateTxFilter {
            filter_type: TxFilterType::Response,
            filter_op: TxFilterOp::Clear,
            partition,
            service: "user".to_string(),
            attrs: vec![],
        },
    )
    .await;

    wait_until(Duration::from_secs(20), || async {
        let statuses = cluster.user.journal.checkpoint_statuses().await;
        statuses.values().all(|s| *s == ExecStatus::Completed)
    })
    .await;

    // retries drained through the cache: still exactly one log row
    assert_eq!(
        cluster.event_log.event_logs.as_ref().expect("log store").log_count().await,
        1
    );
    assert_eq!(cluster.event_log.journal.result_count().await, 1);
}
