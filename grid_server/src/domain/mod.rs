// Domain layer: cell rules, the grid matrix and persistence ports.

pub mod cell;
pub mod grid;
pub mod ports;

pub use cell::{ActiveCell, CellChange, CellState, GridSnapshot, PaletteColor, UNSET_COLOR};
pub use grid::Grid;
pub use ports::{CellStore, Clock, PersistedCell, StoreError};
