// Wire protocol as seen from a viewer: decoding server lines, encoding edits.

use serde::{Deserialize, Serialize};

/// Edit sent to the server; `color` is omitted when the server default should apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditRequest {
    pub x: u32,
    pub y: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActiveCellDto {
    pub x: u32,
    pub y: u32,
    pub color: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ControlLine {
    #[serde(rename = "init")]
    Init { size: u32, active: Vec<ActiveCellDto> },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "t")]
enum EventLine {
    #[serde(rename = "u")]
    Update { x: u32, y: u32, a: u8, color: String },
    #[serde(rename = "c")]
    Count { count: usize },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ServerLine {
    Control(ControlLine),
    Event(EventLine),
}

/// One decoded server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Snapshot {
        size: u32,
        active: Vec<(u32, u32, String)>,
    },
    Delta {
        x: u32,
        y: u32,
        active: bool,
        color: String,
    },
    PeerCount(usize),
}

impl From<ServerLine> for ServerEvent {
    fn from(line: ServerLine) -> Self {
        match line {
            ServerLine::Control(ControlLine::Init { size, active }) => ServerEvent::Snapshot {
                size,
                active: active
                    .into_iter()
                    .map(|cell| (cell.x, cell.y, cell.color))
                    .collect(),
            },
            ServerLine::Event(EventLine::Update { x, y, a, color }) => ServerEvent::Delta {
                x,
                y,
                active: a != 0,
                color,
            },
            ServerLine::Event(EventLine::Count { count }) => ServerEvent::PeerCount(count),
        }
    }
}

/// Lines of one frame that decoded, plus how many were skipped.
#[derive(Debug, Default)]
pub struct DecodedFrame {
    pub events: Vec<ServerEvent>,
    pub skipped: usize,
    pub last_error: Option<serde_json::Error>,
}

/// Splits a possibly coalesced frame on `\n` and decodes each line on its own.
pub fn decode_frame(text: &str) -> DecodedFrame {
    let mut decoded = DecodedFrame::default();
    for line in text.split('\n').map(str::trim).filter(|line| !line.is_empty()) {
        match serde_json::from_str::<ServerLine>(line) {
            Ok(line) => decoded.events.push(line.into()),
            Err(e) => {
                decoded.skipped += 1;
                decoded.last_error = Some(e);
            }
        }
    }
    decoded
}

pub fn encode_edit(edit: &EditRequest) -> Result<String, serde_json::Error> {
    serde_json::to_string(edit)
}
