// Use-case level messages flowing from the hub to sessions.

use crate::domain::{CellChange, GridSnapshot};

/// Process-unique connection identifier.
pub type SessionId = u64;

/// Items placed on a session's outbound queue.
#[derive(Debug, Clone)]
pub enum SessionMessage {
    // Full sparse state; only ever the first item of a queue.
    Snapshot(GridSnapshot),
    // One committed cell change.
    Cell(CellChange),
    // Current number of registered sessions.
    PeerCount(usize),
}

/// A decoded toggle request, before validation.
#[derive(Debug, Clone)]
pub struct ToggleRequest {
    pub x: i64,
    pub y: i64,
    pub color: Option<String>,
}
