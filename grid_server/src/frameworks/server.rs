// Framework bootstrap for the grid server runtime.

use crate::domain::CellStore;
use crate::frameworks::{config, db};
use crate::interface_adapters::http::health_handler;
use crate::interface_adapters::net::{SessionSettings, ws_handler};
use crate::interface_adapters::state::AppState;
use crate::interface_adapters::stores::{InMemoryCellStore, PostgresCellStore, SystemClock};
use crate::use_cases::{GridStore, HubHandle, HubSettings, ToggleCellUseCase, VersionSequence};

use axum::{Router, routing::get};
use std::net::SocketAddr;
use std::{io::Result, sync::Arc};

/// Everything needed to build the shared server state.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub grid_size: u32,
    pub hub: HubSettings,
    pub session: SessionSettings,
}

impl ServerSettings {
    pub fn from_config() -> Self {
        Self {
            grid_size: config::grid_size(),
            hub: HubSettings {
                session_queue_capacity: config::SESSION_QUEUE_CAPACITY,
            },
            session: SessionSettings {
                read_timeout: config::READ_TIMEOUT,
                ping_period: config::PING_PERIOD,
                write_timeout: config::WRITE_TIMEOUT,
                max_message_size: config::MAX_MESSAGE_SIZE,
                max_coalesced: config::MAX_COALESCED,
            },
        }
    }
}

fn init_runtime() {
    let _ = dotenvy::dotenv();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

pub async fn run(
    listener: tokio::net::TcpListener,
    settings: ServerSettings,
    store: Arc<dyn CellStore>,
) -> Result<()> {
    let address = listener.local_addr()?;
    let state = build_state(settings, store).await;
    let app = app(state);

    tracing::info!(%address, "listening");

    // Peer addresses feed attribution when no proxy header is present.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .inspect_err(|e| {
        tracing::error!(error = %e, "server error");
    })
}

pub async fn run_with_config() -> Result<()> {
    init_runtime();

    let address = SocketAddr::new(config::bind_ip(), config::http_port());

    let listener = tokio::net::TcpListener::bind(address)
        .await
        .inspect_err(|e| {
            tracing::error!(%address, error = %e, "failed to bind");
        })?;

    let store = open_store().await;
    run(listener, ServerSettings::from_config(), store).await
}

// Falls back to a process-local store when the database is missing or unreachable.
async fn open_store() -> Arc<dyn CellStore> {
    let Some(database_url) = config::database_url() else {
        tracing::warn!("DATABASE_URL not set; cell changes will not survive a restart");
        return Arc::new(InMemoryCellStore::default());
    };

    let pool = match db::connect_pool(&database_url, config::db_max_connections()).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(error = %e, "database unreachable; persistence disabled");
            return Arc::new(InMemoryCellStore::default());
        }
    };

    if let Err(e) = db::run_migrations(&pool).await {
        tracing::warn!(error = %e, "failed to run migrations");
    }
    tracing::debug!(
        max_connections = config::db_max_connections(),
        "postgres cell store configured"
    );
    Arc::new(PostgresCellStore { db: pool })
}

pub async fn build_state(settings: ServerSettings, store: Arc<dyn CellStore>) -> Arc<AppState> {
    let grid = Arc::new(GridStore::new(settings.grid_size));
    let newest_version = load_grid(&grid, store.as_ref()).await;

    // The hub owns the session registry and snapshots the grid on every register.
    let hub = HubHandle::spawn(grid.clone(), settings.hub);
    let toggle = ToggleCellUseCase {
        grid,
        hub: hub.clone(),
        store,
        clock: Arc::new(SystemClock),
        versions: Arc::new(VersionSequence::starting_after(newest_version)),
    };

    Arc::new(AppState {
        hub,
        toggle,
        session: settings.session,
    })
}

// A failed load leaves the grid empty; the server still starts.
// Returns the highest stored version so new writes sort after it.
async fn load_grid(grid: &GridStore, store: &dyn CellStore) -> u64 {
    match store.load_all().await {
        Ok(rows) => {
            let applied = grid.load(&rows).await;
            let active = grid.active_count().await;
            tracing::info!(
                rows = rows.len(),
                applied,
                active,
                size = grid.size(),
                "grid loaded"
            );
            rows.iter().map(|row| row.version).max().unwrap_or_default()
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to load grid; starting empty");
            0
        }
    }
}
