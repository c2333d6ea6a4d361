use std::fmt;
use tokio_tungstenite::tungstenite;

#[derive(Debug)]
pub enum ClientError {
    /// Opening the WebSocket failed.
    Connect(tungstenite::Error),
    /// The open connection failed while reading or writing.
    Transport(tungstenite::Error),
    /// The server closed the connection.
    Closed,
    /// Nothing arrived in time; names what was being waited for.
    Timeout(&'static str),
    /// An edit could not be encoded.
    Encode(serde_json::Error),
    /// The local edit queue is full; the edit was dropped.
    EditQueueFull,
    /// The driver task has stopped.
    Stopped,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Connect(e) => write!(f, "connect failed: {e}"),
            ClientError::Transport(e) => write!(f, "connection error: {e}"),
            ClientError::Closed => write!(f, "connection closed by server"),
            ClientError::Timeout(what) => write!(f, "timed out waiting for {what}"),
            ClientError::Encode(e) => write!(f, "failed to encode edit: {e}"),
            ClientError::EditQueueFull => write!(f, "edit queue full"),
            ClientError::Stopped => write!(f, "client stopped"),
        }
    }
}

impl std::error::Error for ClientError {}
