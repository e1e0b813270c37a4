//! Service wiring: state construction, router assembly, and serving.
//!
//! Every process runs the same router skeleton; the table-role flags decide
//! which participant routes it owns and which coordinator endpoints it
//! exposes. Recovery kicks off once the listener is bound, so re-injected
//! requests land on a live ingress.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::Extension;
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tracing::{error, info};

use crate::api::tx::{
    CREATE_EVENT_RECEIVERS, DELETE_EVENT_RECEIVERS, JOIN_EVENT_RECEIVERS, LEAVE_EVENT_RECEIVERS,
    UPDATE_EVENT_RECEIVERS,
};
use crate::api::{self, Api, PARTICIPANT_APIS};
use crate::client::default_client;
use crate::config::{Config, StorageBackend, SERVICE_EVENT, SERVICE_USER};
use crate::coord::manager::exponential_backoff_retry;
use crate::coord::recovery::TxRecoveryManager;
use crate::coord::TxManager;
use crate::lifecycle::{dedup_after_hook, dedup_before_hook, TxHookMap, TxLifeCycle};
use crate::middleware::{tx_coordinator, tx_participant, CoordinatorSpec};
use crate::storage::{
    EventLogStore, EventStore, MemoryEventLogStore, MemoryEventStore, MemoryTxJournal,
    MemoryUserStore, PostgresEventLogStore, PostgresEventStore, PostgresTxJournal,
    PostgresUserStore, TxJournal, UserStore,
};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("storage initialization failed: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("server io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything a request handler can reach.
pub struct ServiceState {
    pub config: Config,
    pub tx_mgr: Arc<TxManager>,
    pub journal: Arc<dyn TxJournal>,
    pub lifecycle: Arc<TxLifeCycle<Api>>,
    pub users: Option<Arc<dyn UserStore>>,
    pub events: Option<Arc<dyn EventStore>>,
    pub event_logs: Option<Arc<dyn EventLogStore>>,
    pub client: reqwest::Client,
    pub self_url: String,
}

pub type SharedState = Arc<ServiceState>;

/// Build the state for one service process and start its executor manager.
pub async fn build_state(config: Config) -> Result<SharedState, ServerError> {
    let retry = exponential_backoff_retry(Duration::from_millis(100), Duration::from_secs(5));
    let tx_mgr = TxManager::new(config.partitions, retry);

    let journal: Arc<dyn TxJournal>;
    let mut users: Option<Arc<dyn UserStore>> = None;
    let mut events: Option<Arc<dyn EventStore>> = None;
    let mut event_logs: Option<Arc<dyn EventLogStore>> = None;

    match config.storage.backend {
        StorageBackend::Memory => {
            journal = MemoryTxJournal::new();
            if config.tables.user {
                users = Some(MemoryUserStore::new());
            }
            if config.tables.event {
                events = Some(MemoryEventStore::new());
            }
            if config.tables.event_log {
                event_logs = Some(MemoryEventLogStore::new());
            }
        }
        StorageBackend::Postgres => {
            info!(url = %config.storage.database_url, "connecting to postgres");
            let pool = sqlx::PgPool::connect(&config.storage.database_url).await?;

            let pg_journal = PostgresTxJournal::new(pool.clone());
            pg_journal.migrate().await?;
            journal = Arc::new(pg_journal);

            if config.tables.user {
                let store = PostgresUserStore::new(pool.clone());
                store.migrate().await?;
                users = Some(Arc::new(store));
            }
            if config.tables.event {
                let store = PostgresEventStore::new(pool.clone());
                store.migrate().await?;
                events = Some(Arc::new(store));
            }
            if config.tables.event_log {
                let store = PostgresEventLogStore::new(pool.clone());
                store.migrate().await?;
                event_logs = Some(Arc::new(store));
            }
        }
    }

    // Static hook registration: every participant operation gets the dedup
    // pair over the shared journal.
    let mut hooks = TxHookMap::new();
    for api in PARTICIPANT_APIS {
        hooks.before_hook(*api, dedup_before_hook(journal.clone()));
        hooks.after_hook(*api, dedup_after_hook(journal.clone()));
    }

    tx_mgr.executors.start();

    let self_url = config.server.advertise_url();
    Ok(Arc::new(ServiceState {
        config,
        tx_mgr,
        journal,
        lifecycle: Arc::new(TxLifeCycle::new(hooks)),
        users,
        events,
        event_logs,
        client: default_client(),
        self_url,
    }))
}

/// Assemble the router for one service process.
pub fn router(state: SharedState) -> Router {
    let mut participant = Router::new();
    if state.config.tables.user {
        participant = participant
            .route("/users", post(api::user::handle_create_user))
            .route("/users", get(api::user::handle_get_user))
            .route("/users/host-events/add", put(api::user::handle_add_host_event))
            .route(
                "/users/host-events/remove",
                put(api::user::handle_remove_host_event),
            );
    }
    if state.config.tables.event {
        participant = participant
            .route("/events", post(api::event::handle_create_event))
            .route("/events", get(api::event::handle_get_event))
            .route("/events", put(api::event::handle_update_event))
            .route("/events", delete(api::event::handle_delete_event))
            .route(
                "/events/participants/add",
                put(api::event::handle_add_participant),
            )
            .route(
                "/events/participants/remove",
                put(api::event::handle_remove_participant),
            );
    }
    if state.config.tables.event_log {
        participant = participant
            .route("/event-logs", post(api::event_log::handle_create_log))
            .route("/event-logs", get(api::event_log::handle_list_logs));
    }
    let participant = participant.layer(from_fn_with_state(state.clone(), tx_participant));

    let mut coordinator = Router::new();
    if state.config.tables.user {
        coordinator = coordinator
            .route(
                "/tx/create-event",
                post(api::tx::handle_tx_create_event)
                    .layer::<_, std::convert::Infallible>(from_fn_with_state(
                        state.clone(),
                        tx_coordinator::<api::tx::RequestTxCreateEvent>,
                    ))
                    .layer(Extension(CoordinatorSpec::new(
                        SERVICE_USER,
                        CREATE_EVENT_RECEIVERS,
                    ))),
            )
            .route(
                "/tx/update-event",
                post(api::tx::handle_tx_update_event)
                    .layer::<_, std::convert::Infallible>(from_fn_with_state(
                        state.clone(),
                        tx_coordinator::<api::tx::RequestTxUpdateEvent>,
                    ))
                    .layer(Extension(CoordinatorSpec::new(
                        SERVICE_USER,
                        UPDATE_EVENT_RECEIVERS,
                    ))),
            )
            .route(
                "/tx/delete-event",
                post(api::tx::handle_tx_delete_event)
                    .layer::<_, std::convert::Infallible>(from_fn_with_state(
                        state.clone(),
                        tx_coordinator::<api::tx::RequestTxDeleteEvent>,
                    ))
                    .layer(Extension(CoordinatorSpec::new(
                        SERVICE_USER,
                        DELETE_EVENT_RECEIVERS,
                    ))),
            );
    }
    if state.config.tables.event {
        coordinator = coordinator
            .route(
                "/tx/join-event",
                post(api::tx::handle_tx_join_event)
                    .layer::<_, std::convert::Infallible>(from_fn_with_state(
                        state.clone(),
                        tx_coordinator::<api::tx::RequestTxJoinEvent>,
                    ))
                    .layer(Extension(CoordinatorSpec::new(
                        SERVICE_EVENT,
                        JOIN_EVENT_RECEIVERS,
                    ))),
            )
            .route(
                "/tx/leave-event",
                post(api::tx::handle_tx_leave_event)
                    .layer::<_, std::convert::Infallible>(from_fn_with_state(
                        state.clone(),
                        tx_coordinator::<api::tx::RequestTxLeaveEvent>,
                    ))
                    .layer(Extension(CoordinatorSpec::new(
                        SERVICE_EVENT,
                        LEAVE_EVENT_RECEIVERS,
                    ))),
            );
    }

    let admin = Router::new()
        .route("/test/tx-filter", post(api::tx::handle_update_filter))
        .route("/test/tx-timestamp", post(api::tx::handle_advance_timestamp))
        .route("/test/tx-executors", delete(api::tx::handle_clear_executors));

    Router::new()
        .nest("/api/v1", participant.merge(coordinator).merge(admin))
        .with_state(state)
}

/// Serve until the process is stopped; recovery starts once the listener is
/// accepting connections.
pub async fn serve(state: SharedState) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(state.config.server.bind_addr()).await?;
    info!(addr = %state.config.server.bind_addr(), "listening");

    let recovery = TxRecoveryManager::new(
        state.journal.clone(),
        state.tx_mgr.sender_clocks.clone(),
        state.tx_mgr.receiver_clocks.clone(),
        state.client.clone(),
    );
    tokio::spawn(async move {
        if let Err(err) = recovery.recover().await {
            error!(error = %err, "recovery failed");
        }
    });

    let app = router(state);
    axum::serve(listener, app).await?;
    Ok(())
}
