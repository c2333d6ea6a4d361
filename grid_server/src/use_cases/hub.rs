// Broadcast hub: owns the live-session registry and fans events out to every session.
//
// All registry mutation and fan-out happens inside one actor task, so membership never
// changes mid-iteration. Delivery to a session is `try_send` only; a session whose queue is
// full is evicted after the iteration through the same path as a normal unregister.
//
// Register scans the whole grid for the snapshot inside the actor. That keeps the snapshot
// and the first delta gap-free, at the cost of pausing fan-out for every session while a
// new viewer connects; a burst of N connects on a large grid costs N full scans in a row.

use crate::use_cases::grid_store::GridStore;
use crate::use_cases::types::{SessionId, SessionMessage};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Hub tuning shared by every session.
#[derive(Debug, Clone)]
pub struct HubSettings {
    /// Bounded outbound queue length per session.
    pub session_queue_capacity: usize,
}

/// Result of a register request.
#[derive(Debug)]
pub enum RegisterOutcome {
    /// The session is live; its queue already holds the snapshot.
    Registered(mpsc::Receiver<SessionMessage>),
    /// The id was already registered; nothing changed.
    AlreadyRegistered,
}

#[derive(Debug)]
pub enum HubError {
    /// The hub task is gone.
    Closed,
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubError::Closed => write!(f, "broadcast hub closed"),
        }
    }
}

impl std::error::Error for HubError {}

enum HubCommand {
    Register {
        session_id: SessionId,
        addr: String,
        reply: oneshot::Sender<RegisterOutcome>,
    },
    Unregister {
        session_id: SessionId,
    },
    Broadcast(SessionMessage),
}

/// Cloneable handle to the hub task.
#[derive(Clone)]
pub struct HubHandle {
    // Unbounded so broadcasting never awaits (it runs under the grid write lock).
    commands: mpsc::UnboundedSender<HubCommand>,
    peers: Arc<AtomicUsize>,
}

impl HubHandle {
    /// Spawns the hub task. It exits once every handle is dropped.
    pub fn spawn(grid: Arc<GridStore>, settings: HubSettings) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let peers = Arc::new(AtomicUsize::new(0));
        let hub = Hub {
            grid,
            queue_capacity: settings.session_queue_capacity.max(1),
            sessions: HashMap::new(),
            peers: peers.clone(),
        };
        tokio::spawn(hub_task(hub, commands_rx));
        Self { commands, peers }
    }

    /// Registers a session and hands back its outbound queue.
    ///
    /// The snapshot is the first queued item; no delta can precede it.
    pub async fn register(
        &self,
        session_id: SessionId,
        addr: impl Into<String>,
    ) -> Result<RegisterOutcome, HubError> {
        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(HubCommand::Register {
                session_id,
                addr: addr.into(),
                reply,
            })
            .map_err(|_| HubError::Closed)?;
        reply_rx.await.map_err(|_| HubError::Closed)
    }

    /// Removes a session if present and closes its queue. Idempotent.
    pub fn unregister(&self, session_id: SessionId) {
        if self
            .commands
            .send(HubCommand::Unregister { session_id })
            .is_err()
        {
            debug!(session_id, "hub closed before unregister");
        }
    }

    /// Queues a message for every registered session. Never blocks.
    pub fn broadcast(&self, message: SessionMessage) -> Result<(), HubError> {
        self.commands
            .send(HubCommand::Broadcast(message))
            .map_err(|_| HubError::Closed)
    }

    /// Number of registered sessions, readable without going through the hub task.
    pub fn peer_count(&self) -> usize {
        self.peers.load(Ordering::Relaxed)
    }
}

struct SessionEntry {
    addr: String,
    tx: mpsc::Sender<SessionMessage>,
}

struct Hub {
    grid: Arc<GridStore>,
    queue_capacity: usize,
    sessions: HashMap<SessionId, SessionEntry>,
    peers: Arc<AtomicUsize>,
}

async fn hub_task(mut hub: Hub, mut commands: mpsc::UnboundedReceiver<HubCommand>) {
    while let Some(command) = commands.recv().await {
        match command {
            HubCommand::Register {
                session_id,
                addr,
                reply,
            } => hub.register(session_id, addr, reply).await,
            HubCommand::Unregister { session_id } => {
                if hub.remove_sessions(&[session_id]) {
                    hub.deliver(SessionMessage::PeerCount(hub.sessions.len()));
                }
            }
            HubCommand::Broadcast(message) => hub.deliver(message),
        }
    }
    info!("hub mailbox closed; hub exiting");
}

impl Hub {
    async fn register(
        &mut self,
        session_id: SessionId,
        addr: String,
        reply: oneshot::Sender<RegisterOutcome>,
    ) {
        if self.sessions.contains_key(&session_id) {
            debug!(session_id, "session already registered; skipping");
            let _ = reply.send(RegisterOutcome::AlreadyRegistered);
            return;
        }

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        // Snapshot inside the actor: broadcasts handled before this point are already
        // reflected in the grid, and everything after it is delivered to the new queue.
        let snapshot = self.grid.snapshot().await;
        let active = snapshot.active.len();
        if tx.try_send(SessionMessage::Snapshot(snapshot)).is_err() {
            warn!(session_id, "failed to queue snapshot; refusing registration");
            return;
        }

        if reply.send(RegisterOutcome::Registered(rx)).is_err() {
            debug!(session_id, "registrant went away before registration completed");
            return;
        }

        self.sessions.insert(session_id, SessionEntry { addr, tx });
        self.peers.store(self.sessions.len(), Ordering::Relaxed);
        info!(
            session_id,
            active_cells = active,
            total = self.sessions.len(),
            "session registered"
        );
        self.deliver(SessionMessage::PeerCount(self.sessions.len()));
    }

    /// Fans a message out, then evicts unresponsive sessions and announces the new count.
    fn deliver(&mut self, message: SessionMessage) {
        let mut pending = Some(message);
        while let Some(message) = pending.take() {
            let evicted = self.fan_out(&message);
            if self.remove_sessions(&evicted) {
                pending = Some(SessionMessage::PeerCount(self.sessions.len()));
            }
        }
    }

    fn fan_out(&self, message: &SessionMessage) -> Vec<SessionId> {
        let mut evicted = Vec::new();
        for (session_id, entry) in &self.sessions {
            match entry.tx.try_send(message.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        session_id = *session_id,
                        addr = %entry.addr,
                        "outbound queue full; evicting session"
                    );
                    evicted.push(*session_id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(session_id = *session_id, "outbound queue closed; evicting session");
                    evicted.push(*session_id);
                }
            }
        }
        evicted
    }

    /// Drops the listed sessions (closing their queues). Returns true if any were present.
    fn remove_sessions(&mut self, session_ids: &[SessionId]) -> bool {
        let mut removed = false;
        for session_id in session_ids {
            if let Some(entry) = self.sessions.remove(session_id) {
                removed = true;
                info!(
                    session_id = *session_id,
                    addr = %entry.addr,
                    total = self.sessions.len(),
                    "session unregistered"
                );
            }
        }
        if removed {
            self.peers.store(self.sessions.len(), Ordering::Relaxed);
        }
        removed
    }
}
