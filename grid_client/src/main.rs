use grid_client::{ClientSettings, ConnectionState, GridClient};
use std::env;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(env::var("LOG_FORMAT").as_deref(), Ok("json"));
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

#[tokio::main]
async fn main() {
    // Load .env locally; safe to ignore when not present.
    let _ = dotenvy::dotenv();
    init_tracing();

    let url = env::var("GRID_SERVER_URL").unwrap_or_else(|_| "ws://127.0.0.1:3000/ws".to_string());
    tracing::info!(%url, "starting viewer");

    let client = GridClient::spawn(ClientSettings::new(url));
    let mut status = client.status();
    let mut peers = client.peer_count();
    let replica = client.replica();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *status.borrow_and_update();
                let (size, active) = {
                    let replica = replica.read().await;
                    (replica.size(), replica.active_count())
                };
                tracing::info!(?state, size, active, "status changed");
                if state == ConnectionState::GaveUp {
                    break;
                }
            }
            changed = peers.changed() => {
                if changed.is_err() {
                    break;
                }
                let peers = *peers.borrow_and_update();
                tracing::info!(peers, "peer count changed");
            }
        }
    }

    client.shutdown().await;
}
