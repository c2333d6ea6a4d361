use crate::interface_adapters::net::SessionSettings;
use crate::use_cases::{HubHandle, ToggleCellUseCase};

#[derive(Clone)]
pub struct AppState {
    // Session registry and fan-out.
    pub hub: HubHandle,
    // Toggle workflow invoked by every session read loop.
    pub toggle: ToggleCellUseCase,
    // Per-connection timing and limits.
    pub session: SessionSettings,
}
