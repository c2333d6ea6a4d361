// Wire protocol DTOs and conversions for the public grid WebSocket.

use crate::domain::{ActiveCell, GridSnapshot};
use crate::use_cases::{SessionMessage, ToggleRequest};
use serde::{Deserialize, Serialize};

/// Toggle request sent by viewers: `{ "x": int, "y": int, "color"?: string }`.
#[derive(Debug, Clone, Deserialize)]
pub struct ToggleRequestDto {
    pub x: i64,
    pub y: i64,
    #[serde(default)]
    pub color: Option<String>,
}

impl From<ToggleRequestDto> for ToggleRequest {
    fn from(dto: ToggleRequestDto) -> Self {
        Self {
            x: dto.x,
            y: dto.y,
            color: dto.color,
        }
    }
}

/// Messages the server sends to connected viewers.
///
/// The snapshot is tagged with `type`, the live events with `t`; both shapes are emitted
/// flat, so this enum is untagged.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Control(ControlMessage),
    Event(EventMessage),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    // Full sparse state, first message on every connection.
    #[serde(rename = "init")]
    Init { size: u32, active: Vec<ActiveCellDto> },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "t")]
pub enum EventMessage {
    // One committed cell change; `a` is 1 when active.
    #[serde(rename = "u")]
    Update {
        x: u32,
        y: u32,
        a: u8,
        color: &'static str,
    },
    // Connected peer count.
    #[serde(rename = "c")]
    Count { count: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveCellDto {
    pub x: u32,
    pub y: u32,
    pub color: &'static str,
}

impl From<&ActiveCell> for ActiveCellDto {
    fn from(cell: &ActiveCell) -> Self {
        Self {
            x: cell.x,
            y: cell.y,
            color: cell.color.hex(),
        }
    }
}

impl From<&GridSnapshot> for ServerMessage {
    fn from(snapshot: &GridSnapshot) -> Self {
        ServerMessage::Control(ControlMessage::Init {
            size: snapshot.size,
            active: snapshot.active.iter().map(ActiveCellDto::from).collect(),
        })
    }
}

impl From<&SessionMessage> for ServerMessage {
    fn from(message: &SessionMessage) -> Self {
        match message {
            SessionMessage::Snapshot(snapshot) => snapshot.into(),
            SessionMessage::Cell(change) => ServerMessage::Event(EventMessage::Update {
                x: change.x,
                y: change.y,
                a: u8::from(change.state.is_active()),
                color: change.state.color_hex(),
            }),
            SessionMessage::PeerCount(count) => {
                ServerMessage::Event(EventMessage::Count { count: *count })
            }
        }
    }
}

/// Serializes one queued message to its JSON line.
pub fn encode(message: &SessionMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(&ServerMessage::from(message))
}
