// Authoritative grid shared by every connection.

use crate::domain::{CellChange, CellState, Grid, GridSnapshot, PaletteColor, PersistedCell};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Readers-writer wrapper around the grid; the only way to reach cell memory.
pub struct GridStore {
    size: u32,
    grid: RwLock<Grid>,
}

impl GridStore {
    pub fn new(size: u32) -> Self {
        Self {
            size,
            grid: RwLock::new(Grid::new(size)),
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn in_bounds(&self, x: i64, y: i64) -> bool {
        let size = i64::from(self.size);
        (0..size).contains(&x) && (0..size).contains(&y)
    }

    /// Out-of-range coordinates read as inactive.
    pub async fn get(&self, x: i64, y: i64) -> CellState {
        self.grid.read().await.get(x, y)
    }

    /// Unconditional write; out-of-range coordinates are ignored.
    pub async fn set(&self, x: i64, y: i64, active: bool, color: PaletteColor) {
        let state = CellState::from_parts(active, color);
        if !self.grid.write().await.set(x, y, state) {
            debug!(x, y, "set ignored; coordinates out of range");
        }
    }

    /// Flips a cell and returns the resulting state (inactive when out of range).
    pub async fn toggle(&self, x: i64, y: i64, color: PaletteColor) -> CellState {
        self.toggle_with(x, y, color, |_| {})
            .await
            .map(|change| change.state)
            .unwrap_or(CellState::Inactive)
    }

    /// Flips a cell and runs `on_commit` before the write lock is released.
    ///
    /// Anything `on_commit` enqueues is therefore ordered exactly like the commits.
    /// It must not block or await.
    pub async fn toggle_with<F>(
        &self,
        x: i64,
        y: i64,
        color: PaletteColor,
        on_commit: F,
    ) -> Option<CellChange>
    where
        F: FnOnce(&CellChange),
    {
        let mut grid = self.grid.write().await;
        let change = grid.toggle(x, y, color)?;
        on_commit(&change);
        Some(change)
    }

    pub async fn snapshot(&self) -> GridSnapshot {
        self.grid.read().await.snapshot()
    }

    pub async fn active_count(&self) -> usize {
        self.grid.read().await.active_count()
    }

    /// Seeds the grid from durable rows. Returns how many rows were applied.
    pub async fn load(&self, cells: &[PersistedCell]) -> usize {
        let mut grid = self.grid.write().await;
        let mut applied = 0;
        let mut recolored = 0;
        for cell in cells {
            let color = match PaletteColor::parse(&cell.color) {
                Some(color) => color,
                None => {
                    if cell.active {
                        recolored += 1;
                    }
                    PaletteColor::DEFAULT
                }
            };
            let state = CellState::from_parts(cell.active, color);
            if grid.set(i64::from(cell.x), i64::from(cell.y), state) {
                applied += 1;
            }
        }
        let skipped = cells.len() - applied;
        if skipped > 0 || recolored > 0 {
            warn!(skipped, recolored, "normalized stored cells during load");
        }
        applied
    }
}
