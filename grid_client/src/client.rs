// Reconnecting viewer: keeps a local replica in sync with the shared grid.
//
// One driver task owns the connection state machine. Every connection carries a generation
// number; events from older generations are dropped, so a late teardown of a replaced
// connection never schedules a second reconnect.

use crate::backoff::Backoff;
use crate::error::ClientError;
use crate::protocol::{EditRequest, ServerEvent, decode_frame, encode_edit};
use crate::replica::LocalReplica;

use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::{
    pin::Pin,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::net::TcpStream;
use tokio::sync::{RwLock, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Sleep, timeout};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, Utf8Bytes},
};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:3000/ws`.
    pub url: String,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failed reconnects before giving up.
    pub max_attempts: u32,
    pub edit_queue_capacity: usize,
    /// Upper bound for the TCP + WebSocket handshake.
    pub connect_timeout: Duration,
    /// How long an open connection may go without delivering the snapshot.
    pub snapshot_timeout: Duration,
    /// Silence after which a connection counts as dead; longer than the server ping period.
    pub idle_timeout: Duration,
}

impl ClientSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
            edit_queue_capacity: 256,
            connect_timeout: Duration::from_secs(10),
            snapshot_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(75),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Snapshot applied; deltas are flowing.
    Synchronized,
    /// Disconnected for good after exhausting the reconnect attempts.
    GaveUp,
}

/// Handle to a running client. Dropping it stops the driver.
pub struct GridClient {
    edits: mpsc::Sender<EditRequest>,
    status: watch::Receiver<ConnectionState>,
    peers: watch::Receiver<usize>,
    replica: Arc<RwLock<LocalReplica>>,
    shutdown: oneshot::Sender<()>,
    driver: JoinHandle<()>,
}

impl GridClient {
    /// Starts connecting immediately.
    pub fn spawn(settings: ClientSettings) -> Self {
        let (edits, edits_rx) = mpsc::channel(settings.edit_queue_capacity.max(1));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ConnectionState::Disconnected);
        let (peers_tx, peers) = watch::channel(0);
        let (shutdown, shutdown_rx) = oneshot::channel();
        let replica = Arc::new(RwLock::new(LocalReplica::default()));

        let driver = Driver::new(settings, status_tx, peers_tx, replica.clone(), events_tx);
        let driver = tokio::spawn(driver.run(edits_rx, events_rx, shutdown_rx));

        Self {
            edits,
            status,
            peers,
            replica,
            shutdown,
            driver,
        }
    }

    /// Requests a toggle. Fire-and-forget: dropped unless a connection is open, and the
    /// replica only changes once the server's delta comes back.
    pub fn toggle(&self, x: u32, y: u32, color: Option<&str>) -> Result<(), ClientError> {
        let edit = EditRequest {
            x,
            y,
            color: color.map(str::to_string),
        };
        self.edits.try_send(edit).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ClientError::EditQueueFull,
            mpsc::error::TrySendError::Closed(_) => ClientError::Stopped,
        })
    }

    pub fn status(&self) -> watch::Receiver<ConnectionState> {
        self.status.clone()
    }

    pub fn peer_count(&self) -> watch::Receiver<usize> {
        self.peers.clone()
    }

    pub fn replica(&self) -> Arc<RwLock<LocalReplica>> {
        self.replica.clone()
    }

    /// Closes the connection and waits for the driver to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.driver.await {
            warn!(error = %e, "client driver task failed");
        }
    }
}

enum DriverEvent {
    Connected {
        generation: u64,
        ws: Box<WsStream>,
    },
    ConnectFailed {
        generation: u64,
        error: ClientError,
    },
    Frame {
        generation: u64,
        text: Utf8Bytes,
    },
    Closed {
        generation: u64,
        error: ClientError,
    },
}

const LOG_THROTTLE: Duration = Duration::from_secs(2);

struct Driver {
    settings: ClientSettings,
    generation: u64,
    state: ConnectionState,
    backoff: Backoff,
    sink: Option<WsSink>,
    reader: Option<JoinHandle<()>>,
    retry: Option<Pin<Box<Sleep>>>,
    // Armed between the handshake and the snapshot.
    snapshot_deadline: Option<Pin<Box<Sleep>>>,
    events_tx: mpsc::UnboundedSender<DriverEvent>,
    status: watch::Sender<ConnectionState>,
    peers: watch::Sender<usize>,
    replica: Arc<RwLock<LocalReplica>>,
    last_parse_log: Instant,
}

impl Driver {
    fn new(
        settings: ClientSettings,
        status: watch::Sender<ConnectionState>,
        peers: watch::Sender<usize>,
        replica: Arc<RwLock<LocalReplica>>,
        events_tx: mpsc::UnboundedSender<DriverEvent>,
    ) -> Self {
        let backoff = Backoff::new(settings.base_delay, settings.max_delay, settings.max_attempts);
        Self {
            settings,
            generation: 0,
            state: ConnectionState::Disconnected,
            backoff,
            sink: None,
            reader: None,
            retry: None,
            snapshot_deadline: None,
            events_tx,
            status,
            peers,
            replica,
            last_parse_log: Instant::now() - LOG_THROTTLE,
        }
    }

    async fn run(
        mut self,
        mut edits: mpsc::Receiver<EditRequest>,
        mut events: mpsc::UnboundedReceiver<DriverEvent>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        self.begin_connect();

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(event) = events.recv() => self.handle_event(event).await,
                edit = edits.recv() => match edit {
                    Some(edit) => self.send_edit(edit).await,
                    None => break,
                },
                _ = sleep_if_armed(&mut self.retry) => {
                    self.retry = None;
                    self.begin_connect();
                }
                _ = sleep_if_armed(&mut self.snapshot_deadline) => {
                    self.snapshot_deadline = None;
                    let generation = self.generation;
                    self.teardown(generation, ClientError::Timeout("snapshot"));
                }
            }
        }

        self.close().await;
        debug!("client driver stopped");
    }

    fn begin_connect(&mut self) {
        // A new generation disarms whatever the previous connection reports later.
        self.generation += 1;
        self.drop_connection();
        self.set_state(ConnectionState::Connecting);

        let generation = self.generation;
        let url = self.settings.url.clone();
        let connect_timeout = self.settings.connect_timeout;
        let events = self.events_tx.clone();
        debug!(generation, %url, attempt = self.backoff.attempt(), "connecting");
        tokio::spawn(async move {
            let event = match timeout(connect_timeout, connect_async(url.as_str())).await {
                Ok(Ok((ws, _response))) => DriverEvent::Connected {
                    generation,
                    ws: Box::new(ws),
                },
                Ok(Err(e)) => DriverEvent::ConnectFailed {
                    generation,
                    error: ClientError::Connect(e),
                },
                Err(_) => DriverEvent::ConnectFailed {
                    generation,
                    error: ClientError::Timeout("handshake"),
                },
            };
            let _ = events.send(event);
        });
    }

    async fn handle_event(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::Connected { generation, ws } => {
                if generation != self.generation {
                    debug!(generation, "dropping connection from a stale attempt");
                    return;
                }
                let (sink, stream) = (*ws).split();
                self.sink = Some(sink);
                self.reader = Some(tokio::spawn(read_connection(
                    generation,
                    stream,
                    self.settings.idle_timeout,
                    self.events_tx.clone(),
                )));
                self.snapshot_deadline =
                    Some(Box::pin(tokio::time::sleep(self.settings.snapshot_timeout)));
                debug!(generation, "connected; waiting for snapshot");
            }
            DriverEvent::ConnectFailed { generation, error }
            | DriverEvent::Closed { generation, error } => self.teardown(generation, error),
            DriverEvent::Frame { generation, text } => {
                if generation == self.generation {
                    self.apply_frame(text.as_str()).await;
                }
            }
        }
    }

    async fn apply_frame(&mut self, text: &str) {
        let decoded = decode_frame(text);
        if decoded.skipped > 0 && should_log(&mut self.last_parse_log) {
            warn!(
                skipped = decoded.skipped,
                error = ?decoded.last_error,
                "failed to parse server message"
            );
        }

        for event in decoded.events {
            match event {
                ServerEvent::Snapshot { size, active } => {
                    let count = active.len();
                    self.replica.write().await.replace(size, active);
                    self.snapshot_deadline = None;
                    self.backoff.reset();
                    self.set_state(ConnectionState::Synchronized);
                    info!(generation = self.generation, size, active = count, "synchronized");
                }
                ServerEvent::Delta {
                    x,
                    y,
                    active,
                    color,
                } => {
                    if self.state == ConnectionState::Synchronized {
                        self.replica.write().await.apply(x, y, active, color);
                    } else {
                        debug!(x, y, "delta before snapshot; skipping");
                    }
                }
                ServerEvent::PeerCount(count) => {
                    self.peers.send_replace(count);
                }
            }
        }
    }

    fn teardown(&mut self, generation: u64, error: ClientError) {
        if generation != self.generation {
            debug!(generation, current = self.generation, error = %error, "ignoring stale teardown");
            return;
        }
        // Already torn down (e.g. a write error followed by the reader's close).
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Synchronized
        ) {
            return;
        }
        warn!(generation, error = %error, "connection lost");
        self.drop_connection();
        self.schedule_retry();
    }

    fn schedule_retry(&mut self) {
        match self.backoff.next_delay() {
            Some(delay) => {
                self.set_state(ConnectionState::Disconnected);
                info!(
                    attempt = self.backoff.attempt(),
                    delay_ms = delay.as_millis() as u64,
                    "reconnect scheduled"
                );
                self.retry = Some(Box::pin(tokio::time::sleep(delay)));
            }
            None => {
                self.set_state(ConnectionState::GaveUp);
                warn!(
                    attempts = self.backoff.attempt(),
                    "giving up after repeated connection failures"
                );
            }
        }
    }

    async fn send_edit(&mut self, edit: EditRequest) {
        let Some(sink) = self.sink.as_mut() else {
            debug!(x = edit.x, y = edit.y, "not connected; dropping edit");
            return;
        };
        let text = match encode_edit(&edit) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %ClientError::Encode(e), "dropping edit");
                return;
            }
        };
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            let generation = self.generation;
            self.teardown(generation, ClientError::Transport(e));
        }
    }

    fn drop_connection(&mut self) {
        self.sink = None;
        self.snapshot_deadline = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    async fn close(&mut self) {
        self.retry = None;
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "close handshake failed");
            }
        }
        self.drop_connection();
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "connection state changed");
            self.state = state;
            self.status.send_replace(state);
        }
    }
}

async fn sleep_if_armed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

// Forwards frames until the connection ends, then reports the teardown once.
async fn read_connection(
    generation: u64,
    mut stream: SplitStream<WsStream>,
    idle_timeout: Duration,
    events: mpsc::UnboundedSender<DriverEvent>,
) {
    let error = loop {
        // Any frame, server pings included, proves the connection alive.
        let Ok(next) = timeout(idle_timeout, stream.next()).await else {
            break ClientError::Timeout("server traffic");
        };
        match next {
            Some(Ok(Message::Text(text))) => {
                if events.send(DriverEvent::Frame { generation, text }).is_err() {
                    return;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                debug!(generation, ?frame, "server sent close frame");
                break ClientError::Closed;
            }
            // Pings are answered by the transport; binary frames are not part of the protocol.
            Some(Ok(_)) => {}
            Some(Err(e)) => break ClientError::Transport(e),
            None => break ClientError::Closed,
        }
    };
    let _ = events.send(DriverEvent::Closed { generation, error });
}

fn should_log(last: &mut Instant) -> bool {
    if last.elapsed() >= LOG_THROTTLE {
        *last = Instant::now();
        true
    } else {
        false
    }
}
