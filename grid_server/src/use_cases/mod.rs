// Use cases layer: grid ownership, session fan-out and the toggle workflow.

pub mod canvas;
pub mod grid_store;
pub mod hub;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use canvas::{ToggleCellUseCase, ToggleOutcome, VersionSequence};
pub use grid_store::GridStore;
pub use hub::{HubError, HubHandle, HubSettings, RegisterOutcome};
pub use types::{SessionId, SessionMessage, ToggleRequest};
