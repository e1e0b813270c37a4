//! Boot-time recovery: clock reload and re-driving of unfinished sagas.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use txweave::client::default_client;
use txweave::config::{SERVICE_EVENT, SERVICE_EVENT_LOG, SERVICE_USER};
use txweave::coord::context::{ControlContext, ExecStatus, ExecutorContext};
use txweave::coord::recovery::TxRecoveryManager;
use txweave::storage::domain::User;
use txweave::storage::{EventLogStore, TxJournal, UserStore};

use common::{spawn_cluster, wait_until, TestCluster};

fn saga_checkpoint(
    cluster: &TestCluster,
    partition: u64,
    status: ExecStatus,
    curr: usize,
    input: serde_json::Value,
    result: serde_json::Value,
) -> ExecutorContext {
    ExecutorContext {
        exec_id: 0,
        ctrl_ctx: ControlContext {
            partition,
            service: SERVICE_USER.to_string(),
            attrs: vec![],
            dry_run: false,
            logger_id: "recovery-test".to_string(),
        },
        receivers: vec![
            SERVICE_EVENT.to_string(),
            SERVICE_EVENT_LOG.to_string(),
            SERVICE_USER.to_string(),
        ],
        timestamps: vec![1, 1, 1],
        input,
        result,
        status,
        curr,
        method: "POST".to_string(),
        endpoint: format!("{}/api/v1/tx/create-event", cluster.user.url),
        recovered: false,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_recovery_reloads_clocks_and_redrives_executors() {
    let cluster = spawn_cluster().await;
    let journal = cluster.user.journal.clone();

    cluster
        .user
        .users
        .as_ref()
        .expect("user store")
        .seed_user(User {
            user_id: 10,
            user_name: "pending-host".to_string(),
            host_events: vec![],
        })
        .await;
    cluster
        .user
        .users
        .as_ref()
        .expect("user store")
        .seed_user(User {
            user_id: 20,
            user_name: "committed-host".to_string(),
            host_events: vec![],
        })
        .await;

    // persisted clock rows from the previous incarnation
    journal.seed_sender_clock(9, SERVICE_EVENT, 17).await;
    journal.seed_sender_clock(9, SERVICE_EVENT_LOG, 13).await;
    journal.seed_receiver_clock(9, SERVICE_USER, 42).await;

    // terminal rows must not be re-driven
    let mut completed = saga_checkpoint(
        &cluster,
        4,
        ExecStatus::Completed,
        2,
        json!({"user_id": 4}),
        json!({"event_id": 99}),
    );
    journal.insert_checkpoint(&mut completed).await.expect("insert");
    let mut aborted = saga_checkpoint(
        &cluster,
        5,
        ExecStatus::Aborted,
        0,
        json!({"user_id": 5}),
        json!(null),
    );
    journal.insert_checkpoint(&mut aborted).await.expect("insert");

    // crash before the commit result was persisted: replays with a dry-run
    // commit stage
    let mut pending = saga_checkpoint(
        &cluster,
        1,
        ExecStatus::Pending,
        0,
        json!({
            "user_id": 10,
            "event_name": "pending event",
            "event_info": "",
            "location": "",
            "participants": []
        }),
        json!(null),
    );
    journal.insert_checkpoint(&mut pending).await.expect("insert");

    // crash after the commit: remaining stages re-driven from the threaded
    // state, commit result served from the checkpoint
    let mut committed = saga_checkpoint(
        &cluster,
        2,
        ExecStatus::Committed,
        0,
        json!({
            "user_id": 20,
            "event_name": "committed event",
            "event_info": "",
            "location": "",
            "participants": [],
            "event_id": 555
        }),
        json!({"event_id": 555}),
    );
    journal.insert_checkpoint(&mut committed).await.expect("insert");

    // crash mid force-complete: the manager finishes the complete hooks
    let mut force_complete = saga_checkpoint(
        &cluster,
        3,
        ExecStatus::ForceComplete,
        1,
        json!({"user_id": 30, "event_name": "doomed", "event_id": 777}),
        json!({"event_id": 777}),
    );
    journal
        .insert_checkpoint(&mut force_complete)
        .await
        .expect("insert");

    let recovery = TxRecoveryManager::new(
        journal.clone() as Arc<dyn TxJournal>,
        cluster.user.state.tx_mgr.sender_clocks.clone(),
        cluster.user.state.tx_mgr.receiver_clocks.clone(),
        default_client(),
    );
    recovery.recover().await.expect("recover");

    // clocks equal the maxima of their persisted tables
    assert_eq!(
        cluster.user.state.tx_mgr.sender_clocks.get(9, SERVICE_EVENT),
        17
    );
    assert_eq!(
        cluster.user.state.tx_mgr.sender_clocks.get(9, SERVICE_EVENT_LOG),
        13
    );
    assert_eq!(
        cluster.user.state.tx_mgr.receiver_clocks.get(9, SERVICE_USER),
        42
    );

    wait_until(Duration::from_secs(20), || async {
        let statuses = journal.checkpoint_statuses().await;
        statuses.get(&pending.exec_id) == Some(&ExecStatus::Completed)
            && statuses.get(&committed.exec_id) == Some(&ExecStatus::Completed)
            && statuses.get(&force_complete.exec_id) == Some(&ExecStatus::Completed)
    })
    .await;

    let statuses = journal.checkpoint_statuses().await;
    assert_eq!(statuses.get(&completed.exec_id), Some(&ExecStatus::Completed));
    assert_eq!(statuses.get(&aborted.exec_id), Some(&ExecStatus::Aborted));

    // the committed saga's trailing stages ran against its recorded state
    let user = cluster
        .user
        .users
        .as_ref()
        .expect("user store")
        .get_user(20)
        .await
        .expect("user");
    assert_eq!(user.host_events, vec![555]);
    let logs = cluster
        .event_log
        .event_logs
        .as_ref()
        .expect("log store")
        .list_logs(555)
        .await
        .expect("logs");
    assert_eq!(logs.len(), 1);

    // the pending saga replayed its commit as a dry run against an empty
    // cache: no event was materialized
    assert_eq!(
        cluster.event.events.as_ref().expect("event store").event_count().await,
        0
    );
}
