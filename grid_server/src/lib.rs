pub mod domain;
pub mod frameworks;
pub mod interface_adapters;
pub mod use_cases;

pub use domain::{CellStore, PersistedCell, StoreError};
pub use frameworks::config::http_port;
pub use frameworks::server::{ServerSettings, app, build_state, run, run_with_config};
pub use interface_adapters::net::SessionSettings;
pub use interface_adapters::stores::InMemoryCellStore;
