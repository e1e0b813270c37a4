//! Shared harness: an in-process three-service cluster over in-memory
//! journals, with trace recorders wired into every instrumenter.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use txweave::api::{Api, PARTICIPANT_APIS};
use txweave::client::default_client;
use txweave::config::{Config, PeerConfig, StorageBackend};
use txweave::coord::instrument::TraceRecorder;
use txweave::coord::manager::constant_retry;
use txweave::coord::partition::TxPartitionManager;
use txweave::coord::TxManager;
use txweave::lifecycle::{dedup_after_hook, dedup_before_hook, TxHookMap, TxLifeCycle};
use txweave::server::{self, ServiceState, SharedState};
use txweave::storage::{
    MemoryEventLogStore, MemoryEventStore, MemoryTxJournal, MemoryUserStore, TxJournal,
};

pub const PARTITIONS: u64 = 10;

/// One in-process service with handles onto its in-memory backing state.
pub struct TestService {
    pub state: SharedState,
    pub url: String,
    pub journal: Arc<MemoryTxJournal>,
    pub users: Option<Arc<MemoryUserStore>>,
    pub events: Option<Arc<MemoryEventStore>>,
    pub event_logs: Option<Arc<MemoryEventLogStore>>,
    pub recorder: Arc<TraceRecorder>,
}

pub struct TestCluster {
    pub user: TestService,
    pub event: TestService,
    pub event_log: TestService,
    pub client: reqwest::Client,
}

struct Role {
    user: bool,
    event: bool,
    event_log: bool,
}

async fn spawn_service(listener: TcpListener, peers: PeerConfig, role: Role) -> TestService {
    let addr = listener.local_addr().expect("listener addr");

    let mut config = Config::for_test();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = addr.port();
    config.peers = peers;
    config.tables.user = role.user;
    config.tables.event = role.event;
    config.tables.event_log = role.event_log;
    assert_eq!(config.storage.backend, StorageBackend::Memory);

    let journal = MemoryTxJournal::new();
    let users = role.user.then(MemoryUserStore::new);
    let events = role.event.then(MemoryEventStore::new);
    let event_logs = role.event_log.then(MemoryEventLogStore::new);

    let mut hooks = TxHookMap::new();
    for api in PARTICIPANT_APIS {
        hooks.before_hook(*api, dedup_before_hook(journal.clone()));
        hooks.after_hook(*api, dedup_after_hook(journal.clone()));
    }

    let tx_mgr = TxManager::new(config.partitions, constant_retry(Duration::from_millis(10)));
    tx_mgr.executors.start();

    let recorder = Arc::new(TraceRecorder::new(config.partitions));
    tx_mgr.instrumenter.recorder(recorder.clone());

    let self_url = config.server.advertise_url();
    let state: SharedState = Arc::new(ServiceState {
        config,
        tx_mgr,
        journal: journal.clone() as Arc<dyn TxJournal>,
        lifecycle: Arc::new(TxLifeCycle::<Api>::new(hooks)),
        users: users.clone().map(|s| s as _),
        events: events.clone().map(|s| s as _),
        event_logs: event_logs.clone().map(|s| s as _),
        client: default_client(),
        self_url,
    });

    let app = server::router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server");
    });

    TestService {
        url: format!("http://{addr}"),
        state,
        journal,
        users,
        events,
        event_logs,
        recorder,
    }
}

/// Spin up user, event, and event-log services on ephemeral ports.
///
/// Recovery is NOT started automatically; tests drive it explicitly.
pub async fn spawn_cluster() -> TestCluster {
    let user_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let event_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let log_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");

    let peers = PeerConfig {
        user: format!("http://{}", user_listener.local_addr().expect("addr")),
        event: format!("http://{}", event_listener.local_addr().expect("addr")),
        event_log: format!("http://{}", log_listener.local_addr().expect("addr")),
    };

    let user = spawn_service(
        user_listener,
        peers.clone(),
        Role {
            user: true,
            event: false,
            event_log: false,
        },
    )
    .await;
    let event = spawn_service(
        event_listener,
        peers.clone(),
        Role {
            user: false,
            event: true,
            event_log: false,
        },
    )
    .await;
    let event_log = spawn_service(
        log_listener,
        peers,
        Role {
            user: false,
            event: false,
            event_log: true,
        },
    )
    .await;

    TestCluster {
        user,
        event,
        event_log,
        client: default_client(),
    }
}

/// The partition a key-set lands on, mirroring the coordinator's mapping.
pub fn partition_of(keys: &[serde_json::Value]) -> u64 {
    TxPartitionManager::new(PARTITIONS).partition(keys)
}

/// Poll until `check` returns true or the timeout elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
