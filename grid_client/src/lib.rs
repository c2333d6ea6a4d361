pub mod backoff;
pub mod client;
pub mod error;
pub mod protocol;
pub mod replica;

pub use backoff::Backoff;
pub use client::{ClientSettings, ConnectionState, GridClient};
pub use error::ClientError;
pub use replica::LocalReplica;
