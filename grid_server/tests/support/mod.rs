// Shared bootstrapping and WebSocket helpers for grid server integration tests.
#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use grid_server::{InMemoryCellStore, ServerSettings, SessionSettings};
use serde_json::Value;
use std::{
    collections::VecDeque,
    sync::{Arc, OnceLock},
    time::Duration,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

// Ping fast enough that a test can observe one.
pub const PING_PERIOD: Duration = Duration::from_millis(200);
const RECV_TIMEOUT: Duration = Duration::from_secs(3);

// Base URL of the one server shared by every test in a binary.
static SERVER_URL: OnceLock<String> = OnceLock::new();

pub fn test_settings() -> ServerSettings {
    ServerSettings {
        grid_size: 1000,
        hub: grid_server::use_cases::HubSettings {
            session_queue_capacity: 256,
        },
        session: SessionSettings {
            read_timeout: Duration::from_secs(5),
            ping_period: PING_PERIOD,
            write_timeout: Duration::from_secs(2),
            max_message_size: 512,
            max_coalesced: 256,
        },
    }
}

// Boot the server once per test binary and return its base URL.
pub fn ensure_server() -> &'static str {
    SERVER_URL.get_or_init(|| {
        let published = Arc::new(OnceLock::<String>::new());
        let published_thread = Arc::clone(&published);
        // The server gets its own runtime so it outlives each `#[tokio::test]` runtime.
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().expect("test runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind ephemeral test port");
                let addr = listener.local_addr().expect("get local addr");
                let _ = published_thread.set(format!("http://{addr}"));
                grid_server::run(
                    listener,
                    test_settings(),
                    Arc::new(InMemoryCellStore::default()),
                )
                .await
                .expect("server failed");
            });
        });
        wait_until_accepting(&published)
    })
}

fn wait_until_accepting(published: &OnceLock<String>) -> String {
    let base_url = loop {
        if let Some(url) = published.get() {
            break url.clone();
        }
        std::thread::sleep(Duration::from_millis(10));
    };

    let addr = base_url
        .strip_prefix("http://")
        .expect("base url should use http://");
    for _ in 0..100 {
        if std::net::TcpStream::connect(addr).is_ok() {
            return base_url;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("server did not become ready in time");
}

pub fn ws_url() -> String {
    let base = ensure_server();
    format!("{}/ws", base.replacen("http://", "ws://", 1))
}

// A server private to the calling test, living on that test's runtime. Returns its ws URL.
pub async fn spawn_server(settings: ServerSettings) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral test port");
    let addr = listener.local_addr().expect("get local addr");
    tokio::spawn(grid_server::run(
        listener,
        settings,
        Arc::new(InMemoryCellStore::default()),
    ));
    format!("ws://{addr}/ws")
}

// One viewer connection; lines from coalesced frames are buffered until consumed.
pub struct TestClient {
    pub ws: Ws,
    pending: VecDeque<Value>,
}

impl TestClient {
    pub async fn connect() -> Self {
        Self::connect_to(&ws_url()).await
    }

    pub async fn connect_to(url: &str) -> Self {
        let (ws, _) = connect_async(url).await.expect("websocket connect");
        Self {
            ws,
            pending: VecDeque::new(),
        }
    }

    pub async fn connect_synced() -> (Self, Value) {
        Self::connect_synced_to(&ws_url()).await
    }

    // Connect and consume the init snapshot, which must be the first line.
    pub async fn connect_synced_to(url: &str) -> (Self, Value) {
        let mut client = Self::connect_to(url).await;
        let first = client.next_line().await;
        assert_eq!(first["type"], "init", "first message must be the snapshot");
        (client, first)
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string().into()))
            .await
            .expect("send text");
    }

    pub async fn send_toggle(&mut self, x: i64, y: i64, color: &str) {
        let payload = serde_json::json!({ "x": x, "y": y, "color": color });
        self.send_text(&payload.to_string()).await;
    }

    // Next JSON line from the server, splitting coalesced frames.
    pub async fn next_line(&mut self) -> Value {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return line;
            }
            let message = self.next_message().await;
            if let Message::Text(text) = message {
                self.pending.extend(
                    text.as_str()
                        .split('\n')
                        .filter(|line| !line.trim().is_empty())
                        .map(|line| serde_json::from_str::<Value>(line).expect("server sent invalid json")),
                );
            }
        }
    }

    // Raw next frame, control frames included.
    pub async fn next_message(&mut self) -> Message {
        tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
            .await
            .expect("timed out waiting for server message")
            .expect("connection closed")
            .expect("websocket error")
    }

    // Read until the server ends the connection; panics if it is still open after `within`.
    // Returns the close frame's code when the server sent one.
    pub async fn wait_closed(&mut self, within: Duration) -> Option<u16> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            match tokio::time::timeout_at(deadline, self.ws.next()).await {
                Err(_) => panic!("connection still open after {within:?}"),
                Ok(Some(Ok(Message::Close(frame)))) => return frame.map(|f| u16::from(f.code)),
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(_))) | Ok(None) => return None,
            }
        }
    }

    // Keep reading, which answers pings, for `period`. Panics if the connection ends.
    pub async fn stay_responsive(&mut self, period: Duration) {
        let deadline = tokio::time::Instant::now() + period;
        loop {
            match tokio::time::timeout_at(deadline, self.ws.next()).await {
                Err(_) => return,
                Ok(Some(Ok(Message::Close(frame)))) => panic!("server closed a live connection: {frame:?}"),
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(e))) => panic!("connection failed while answering pings: {e}"),
                Ok(None) => panic!("connection ended while answering pings"),
            }
        }
    }

    // Skip unrelated traffic until an update for (x, y) arrives.
    pub async fn next_update_at(&mut self, x: i64, y: i64) -> Value {
        loop {
            let line = self.next_line().await;
            if line["t"] == "u" && line["x"] == x && line["y"] == y {
                return line;
            }
        }
    }
}
