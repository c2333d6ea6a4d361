// Network adapter: one WebSocket session per connected viewer.

pub mod session;

pub use session::{SessionSettings, ws_handler};
