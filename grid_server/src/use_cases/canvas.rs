// Toggle workflow: validate, commit, broadcast, persist in the background.

use crate::domain::{CellChange, CellStore, Clock, PaletteColor, PersistedCell};
use crate::use_cases::grid_store::GridStore;
use crate::use_cases::hub::HubHandle;
use crate::use_cases::types::{SessionMessage, ToggleRequest};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    Applied(CellChange),
    // Coordinates outside the grid; nothing happened.
    OutOfRange,
}

/// Hands out strictly increasing write versions.
///
/// Versions follow the wall clock in nanoseconds so they keep growing across restarts,
/// and step past the previous value when the clock stalls or goes backwards.
#[derive(Debug, Default)]
pub struct VersionSequence {
    last: AtomicU64,
}

impl VersionSequence {
    /// Every version handed out will be greater than `floor`.
    pub fn starting_after(floor: u64) -> Self {
        Self {
            last: AtomicU64::new(floor),
        }
    }

    pub fn next(&self, now: u64) -> u64 {
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(current.saturating_add(1));
            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => current = actual,
            }
        }
    }
}

// Toggle use case with injected dependencies.
#[derive(Clone)]
pub struct ToggleCellUseCase {
    pub grid: Arc<GridStore>,
    pub hub: HubHandle,
    pub store: Arc<dyn CellStore>,
    pub clock: Arc<dyn Clock>,
    pub versions: Arc<VersionSequence>,
}

impl ToggleCellUseCase {
    pub async fn execute(&self, request: ToggleRequest, placed_by: &str) -> ToggleOutcome {
        if !self.grid.in_bounds(request.x, request.y) {
            return ToggleOutcome::OutOfRange;
        }
        let color = PaletteColor::or_default(request.color.as_deref());

        // Broadcast and version while the write lock is held so both follow commit order.
        let hub = &self.hub;
        let mut version = 0;
        let committed = self
            .grid
            .toggle_with(request.x, request.y, color, |change| {
                version = self.versions.next(self.clock.now_epoch_nanos());
                if let Err(e) = hub.broadcast(SessionMessage::Cell(*change)) {
                    warn!(error = %e, x = change.x, y = change.y, "failed to broadcast cell change");
                }
            })
            .await;
        let Some(change) = committed else {
            return ToggleOutcome::OutOfRange;
        };

        self.persist_async(change, version, placed_by);
        ToggleOutcome::Applied(change)
    }

    // Fire-and-forget upsert; the caller never waits on the durable store.
    // Saves may land out of order; the store keeps the highest version.
    fn persist_async(&self, change: CellChange, version: u64, placed_by: &str) {
        let cell = PersistedCell {
            x: change.x as i32,
            y: change.y as i32,
            active: change.state.is_active(),
            color: change.state.color_hex().to_string(),
            placed_by: Some(placed_by.to_string()),
            updated_at: self.clock.now_epoch_seconds(),
            version,
        };
        let store = self.store.clone();
        tokio::spawn(async move {
            let (x, y) = (cell.x, cell.y);
            match store.save(cell).await {
                Ok(()) => debug!(x, y, "cell persisted"),
                Err(e) => warn!(x, y, error = %e, "failed to persist cell"),
            }
        });
    }
}
