use async_trait::async_trait;
use std::fmt;

// Durable record of one cell, keyed by (x, y).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedCell {
    pub x: i32,
    pub y: i32,
    pub active: bool,
    pub color: String,
    // Originating address of the last writer.
    pub placed_by: Option<String>,
    pub updated_at: u64,
    // Commit order of the write; a save never replaces a row with a higher version.
    pub version: u64,
}

#[derive(Debug)]
pub enum StoreError {
    Unavailable(String),
    Query(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "cell store unavailable: {msg}"),
            StoreError::Query(msg) => write!(f, "cell store query failed: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

// Port for the durable cell store consumed at boot and on every toggle.
#[async_trait]
pub trait CellStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<PersistedCell>, StoreError>;
    async fn save(&self, cell: PersistedCell) -> Result<(), StoreError>;
}

// Port for retrieving the current time.
pub trait Clock: Send + Sync {
    fn now_epoch_seconds(&self) -> u64;

    fn now_epoch_nanos(&self) -> u64 {
        self.now_epoch_seconds().saturating_mul(1_000_000_000)
    }
}
