use crate::interface_adapters::protocol::{ToggleRequestDto, encode};
use crate::interface_adapters::state::AppState;
use crate::interface_adapters::utils::ids::next_session_id;
use crate::use_cases::{RegisterOutcome, SessionId, SessionMessage, ToggleOutcome};

use axum::{
    body::Bytes,
    extract::{
        ConnectInfo, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures::{Sink, SinkExt, StreamExt, stream::SplitStream};
use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, timeout, timeout_at};
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

/// Per-connection timing and size limits.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Connection is dropped when no pong arrives within this window.
    pub read_timeout: Duration,
    /// Ping interval; must be shorter than `read_timeout`.
    pub ping_period: Duration,
    /// Upper bound for a single write, close frames included.
    pub write_timeout: Duration,
    /// Largest inbound message accepted by the transport.
    pub max_message_size: usize,
    /// Most queued messages merged into one text frame.
    pub max_coalesced: usize,
}

#[derive(Debug)]
enum NetError {
    // Categorizes connection lifecycle failures for teardown logging.
    #[allow(dead_code)]
    Ws(axum::Error),
    ReadTimeout,
    WriteTimeout,
}

impl From<axum::Error> for NetError {
    fn from(e: axum::Error) -> Self {
        NetError::Ws(e)
    }
}

const LOG_THROTTLE: Duration = Duration::from_secs(2);

fn should_log(last: &mut Instant) -> bool {
    if last.elapsed() >= LOG_THROTTLE {
        *last = Instant::now();
        true
    } else {
        false
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let addr = client_addr(&headers, peer);
    ws.max_message_size(state.session.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state, addr))
}

/// Resolves the viewer address for attribution, honoring reverse-proxy headers.
pub fn client_addr(headers: &HeaderMap, peer: SocketAddr) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.ip().to_string()
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, addr: String) {
    let session_id = next_session_id();
    let span = info_span!("conn", session_id, addr = %addr);
    run_session(socket, state, session_id, addr)
        .instrument(span)
        .await
}

#[derive(Debug, Default)]
struct ReadStats {
    msgs_in: u64,
    bytes_in: u64,
    malformed: u32,
    out_of_range: u32,
}

#[derive(Debug, Default)]
struct WriteStats {
    msgs_out: u64,
    frames_out: u64,
    bytes_out: u64,
}

async fn run_session(
    mut socket: WebSocket,
    state: Arc<AppState>,
    session_id: SessionId,
    addr: String,
) {
    // Registration queues the snapshot before the session is visible to fan-out.
    let queue = match state.hub.register(session_id, addr.clone()).await {
        Ok(RegisterOutcome::Registered(queue)) => queue,
        Ok(RegisterOutcome::AlreadyRegistered) => {
            warn!("session id already registered; closing duplicate connection");
            let _ = send_close(&mut socket, close_code::POLICY, "duplicate session").await;
            return;
        }
        Err(e) => {
            error!(error = %e, "failed to register session");
            let _ = send_close(&mut socket, close_code::ERROR, "hub unavailable").await;
            return;
        }
    };
    info!("client connected");

    let settings = state.session.clone();
    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(
        write_loop(sink, queue, settings.clone()).instrument(Span::current()),
    );

    let mut read_stats = ReadStats::default();
    let mut write_stats = None;
    let mut writer_done = false;

    // Whichever direction stops first ends the connection.
    tokio::select! {
        result = read_loop(stream, &state, &addr, &settings, &mut read_stats) => {
            match result {
                Ok(()) => info!("client closed connection"),
                Err(e) => warn!(error = ?e, "read loop ended"),
            }
        }
        joined = &mut writer => {
            writer_done = true;
            match joined {
                Ok(stats) => write_stats = Some(stats),
                Err(e) => error!(error = %e, "write loop task failed"),
            }
        }
    }

    // Dropping the registry entry closes the queue, which lets the writer send its close frame.
    state.hub.unregister(session_id);

    if !writer_done {
        match timeout(settings.write_timeout, &mut writer).await {
            Ok(Ok(stats)) => write_stats = Some(stats),
            Ok(Err(e)) => error!(error = %e, "write loop task failed"),
            Err(_) => {
                debug!("write loop did not finish in time; aborting");
                writer.abort();
            }
        }
    }

    let write_stats = write_stats.unwrap_or_default();
    debug!(
        msgs_in = read_stats.msgs_in,
        bytes_in = read_stats.bytes_in,
        malformed = read_stats.malformed,
        out_of_range = read_stats.out_of_range,
        msgs_out = write_stats.msgs_out,
        frames_out = write_stats.frames_out,
        bytes_out = write_stats.bytes_out,
        "connection stats"
    );
    info!("client disconnected");
}

async fn send_close(socket: &mut WebSocket, code: u16, reason: &'static str) -> Result<(), NetError> {
    socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await
        .map_err(NetError::Ws)
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    state: &AppState,
    addr: &str,
    settings: &SessionSettings,
    stats: &mut ReadStats,
) -> Result<(), NetError> {
    let mut deadline = tokio::time::Instant::now() + settings.read_timeout;
    let mut last_invalid_log = Instant::now() - LOG_THROTTLE;

    loop {
        let incoming = match timeout_at(deadline, stream.next()).await {
            Ok(incoming) => incoming,
            Err(_) => return Err(NetError::ReadTimeout),
        };

        let message = match incoming {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(NetError::Ws(e)),
            None => return Ok(()),
        };

        match message {
            Message::Text(text) => {
                stats.msgs_in += 1;
                stats.bytes_in += text.len() as u64;
                handle_request(text.as_str(), state, addr, stats, &mut last_invalid_log).await;
            }
            Message::Binary(bytes) => {
                stats.msgs_in += 1;
                stats.bytes_in += bytes.len() as u64;
                stats.malformed += 1;
                if should_log(&mut last_invalid_log) {
                    warn!(bytes = bytes.len(), "binary messages not supported; dropping");
                }
            }
            Message::Pong(_) => {
                deadline = tokio::time::Instant::now() + settings.read_timeout;
            }
            // Pings are answered by the transport.
            Message::Ping(_) => {}
            Message::Close(frame) => {
                debug!(?frame, "close frame received");
                return Ok(());
            }
        }
    }
}

async fn handle_request(
    text: &str,
    state: &AppState,
    addr: &str,
    stats: &mut ReadStats,
    last_invalid_log: &mut Instant,
) {
    let request = match serde_json::from_str::<ToggleRequestDto>(text) {
        Ok(request) => request,
        Err(e) => {
            stats.malformed += 1;
            if should_log(last_invalid_log) {
                warn!(bytes = text.len(), error = %e, "failed to parse client message");
            }
            return;
        }
    };

    let (x, y) = (request.x, request.y);
    match state.toggle.execute(request.into(), addr).await {
        ToggleOutcome::Applied(change) => {
            debug!(x, y, active = change.state.is_active(), "cell toggled");
        }
        ToggleOutcome::OutOfRange => {
            stats.out_of_range += 1;
            if should_log(last_invalid_log) {
                warn!(x, y, "invalid coordinates; dropping");
            }
        }
    }
}

async fn write_loop<S>(
    mut sink: S,
    mut queue: mpsc::Receiver<SessionMessage>,
    settings: SessionSettings,
) -> WriteStats
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let mut stats = WriteStats::default();
    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + settings.ping_period,
        settings.ping_period,
    );
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            queued = queue.recv() => {
                let Some(first) = queued else {
                    // The hub dropped our queue: unregistered or evicted.
                    let close = Message::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: "session closed".into(),
                    }));
                    let _ = send_with_timeout(&mut sink, close, settings.write_timeout).await;
                    break;
                };

                let (frame, count) = coalesce(first, &mut queue, settings.max_coalesced);
                if count == 0 {
                    continue;
                }
                let len = frame.len();
                if let Err(e) =
                    send_with_timeout(&mut sink, Message::Text(frame.into()), settings.write_timeout).await
                {
                    warn!(error = ?e, "failed to write to connection");
                    break;
                }
                stats.msgs_out += count as u64;
                stats.frames_out += 1;
                stats.bytes_out += len as u64;
            }
            _ = ping.tick() => {
                if let Err(e) =
                    send_with_timeout(&mut sink, Message::Ping(Bytes::new()), settings.write_timeout).await
                {
                    warn!(error = ?e, "failed to send ping");
                    break;
                }
            }
        }
    }

    if let Err(e) = timeout(settings.write_timeout, sink.close()).await {
        debug!(error = %e, "socket close timed out");
    }
    stats
}

/// Joins `first` and whatever is already queued into one newline-delimited frame.
fn coalesce(
    first: SessionMessage,
    queue: &mut mpsc::Receiver<SessionMessage>,
    max_coalesced: usize,
) -> (String, usize) {
    let mut frame = String::new();
    let mut count = 0;
    let mut next = Some(first);

    while let Some(message) = next.take() {
        match encode(&message) {
            Ok(line) => {
                if count > 0 {
                    frame.push('\n');
                }
                frame.push_str(&line);
                count += 1;
            }
            Err(e) => error!(error = ?e, "failed to serialize outbound message"),
        }
        if count < max_coalesced {
            next = queue.try_recv().ok();
        }
    }

    (frame, count)
}

async fn send_with_timeout<S>(
    sink: &mut S,
    message: Message,
    write_timeout: Duration,
) -> Result<(), NetError>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    match timeout(write_timeout, sink.send(message)).await {
        Ok(result) => result.map_err(NetError::from),
        Err(_) => Err(NetError::WriteTimeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CellChange, CellState, GridSnapshot, PaletteColor};
    use axum::http::HeaderValue;
    use futures::channel::mpsc as frames;

    fn peer() -> SocketAddr {
        SocketAddr::from(([192, 0, 2, 10], 40000))
    }

    #[test]
    fn client_addr_prefers_first_forwarded_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 203.0.113.5 , 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.1"));
        assert_eq!(client_addr(&headers, peer()), "203.0.113.5");
    }

    #[test]
    fn client_addr_falls_back_to_real_ip_then_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.1"));
        assert_eq!(client_addr(&headers, peer()), "198.51.100.1");
        assert_eq!(client_addr(&HeaderMap::new(), peer()), "192.0.2.10");
    }

    fn change(x: u32) -> SessionMessage {
        SessionMessage::Cell(CellChange {
            x,
            y: 0,
            state: CellState::Active(PaletteColor::Red),
        })
    }

    #[tokio::test]
    async fn coalesce_joins_queued_messages_with_newlines() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(change(2)).await.expect("send");
        tx.send(SessionMessage::PeerCount(4)).await.expect("send");

        let (frame, count) = coalesce(change(1), &mut rx, 16);

        assert_eq!(count, 3);
        let lines: Vec<&str> = frame.split('\n').collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains(r#""x":1"#));
        assert!(lines[1].contains(r#""x":2"#));
        assert_eq!(lines[2], r#"{"t":"c","count":4}"#);
    }

    #[tokio::test]
    async fn coalesce_stops_at_the_configured_limit() {
        let (tx, mut rx) = mpsc::channel(8);
        for x in 2..6 {
            tx.send(change(x)).await.expect("send");
        }

        let (frame, count) = coalesce(change(1), &mut rx, 2);

        assert_eq!(count, 2);
        assert_eq!(frame.lines().count(), 2);
        // The rest stays queued for the next frame.
        assert!(matches!(rx.try_recv(), Ok(SessionMessage::Cell(c)) if c.x == 3));
    }

    #[tokio::test]
    async fn coalesce_keeps_snapshot_as_a_single_line() {
        let (_tx, mut rx) = mpsc::channel::<SessionMessage>(1);
        let snapshot = SessionMessage::Snapshot(GridSnapshot {
            size: 10,
            active: Vec::new(),
        });

        let (frame, count) = coalesce(snapshot, &mut rx, 16);

        assert_eq!(count, 1);
        assert_eq!(frame, r#"{"type":"init","size":10,"active":[]}"#);
    }

    fn settings(ping_period: Duration) -> SessionSettings {
        SessionSettings {
            read_timeout: Duration::from_secs(5),
            ping_period,
            write_timeout: Duration::from_secs(1),
            max_message_size: 512,
            max_coalesced: 16,
        }
    }

    #[tokio::test]
    async fn when_queue_closes_then_writer_flushes_and_sends_normal_close() {
        let (frames_tx, frames_rx) = frames::unbounded::<Message>();
        let sink = frames_tx.sink_map_err(axum::Error::new);
        let (queue_tx, queue) = mpsc::channel(8);
        queue_tx.send(change(7)).await.expect("send");
        // Dropping the sender is what unregister and eviction do to the queue.
        drop(queue_tx);

        let stats = write_loop(sink, queue, settings(Duration::from_secs(60))).await;

        let sent: Vec<Message> = frames_rx.collect().await;
        assert_eq!(sent.len(), 2);
        assert!(matches!(&sent[0], Message::Text(text) if text.as_str().contains(r#""x":7"#)));
        match &sent[1] {
            Message::Close(Some(frame)) => assert_eq!(frame.code, close_code::NORMAL),
            other => panic!("expected close frame, got {other:?}"),
        }
        assert_eq!(stats.msgs_out, 1);
        assert_eq!(stats.frames_out, 1);
    }

    #[tokio::test]
    async fn when_idle_then_writer_pings_every_period() {
        let (frames_tx, mut frames_rx) = frames::unbounded::<Message>();
        let sink = frames_tx.sink_map_err(axum::Error::new);
        let (queue_tx, queue) = mpsc::channel(8);
        let writer = tokio::spawn(write_loop(sink, queue, settings(Duration::from_millis(20))));

        for _ in 0..2 {
            let next = tokio::time::timeout(Duration::from_secs(2), frames_rx.next())
                .await
                .expect("ping should arrive within the period");
            assert!(matches!(next, Some(Message::Ping(_))));
        }

        drop(queue_tx);
        let stats = writer.await.expect("writer task");
        assert_eq!(stats.frames_out, 0);
    }

    #[tokio::test]
    async fn when_sink_fails_then_writer_stops() {
        let (frames_tx, frames_rx) = frames::unbounded::<Message>();
        drop(frames_rx);
        let sink = frames_tx.sink_map_err(axum::Error::new);
        let (queue_tx, queue) = mpsc::channel(8);
        queue_tx.send(change(1)).await.expect("send");

        let stats = write_loop(sink, queue, settings(Duration::from_secs(60))).await;

        assert_eq!(stats.frames_out, 0);
        // The writer gave up on its own and dropped the queue.
        assert!(queue_tx.is_closed());
    }
}
