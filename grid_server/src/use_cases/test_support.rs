use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{CellStore, Clock, PersistedCell, StoreError};

// Shared fixed time source for deterministic use-case tests.
pub(crate) struct FixedClock(pub(crate) u64);

impl Clock for FixedClock {
    fn now_epoch_seconds(&self) -> u64 {
        self.0
    }
}

#[derive(Clone, Copy, Default)]
pub(crate) struct FailureFlags {
    pub load: bool,
    pub save: bool,
}

// In-memory store that records every save for later inspection.
#[derive(Clone)]
pub(crate) struct RecordingStore {
    rows: Arc<Mutex<Vec<PersistedCell>>>,
    saved: Arc<Mutex<Vec<PersistedCell>>>,
    failures: FailureFlags,
}

impl RecordingStore {
    pub(crate) fn new() -> Self {
        Self {
            rows: Arc::new(Mutex::new(Vec::new())),
            saved: Arc::new(Mutex::new(Vec::new())),
            failures: FailureFlags::default(),
        }
    }

    pub(crate) fn with_rows(self, rows: Vec<PersistedCell>) -> Self {
        *self.rows.lock().expect("rows mutex poisoned") = rows;
        self
    }

    pub(crate) fn failing_saves(mut self) -> Self {
        self.failures.save = true;
        self
    }

    pub(crate) fn failing_loads(mut self) -> Self {
        self.failures.load = true;
        self
    }

    pub(crate) fn saved(&self) -> Vec<PersistedCell> {
        self.saved.lock().expect("saved mutex poisoned").clone()
    }

    // Saves run on detached tasks, so poll briefly until they land.
    pub(crate) async fn wait_for_saves(&self, count: usize) -> bool {
        for _ in 0..100 {
            if self.saved().len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

#[async_trait]
impl CellStore for RecordingStore {
    async fn load_all(&self) -> Result<Vec<PersistedCell>, StoreError> {
        if self.failures.load {
            return Err(StoreError::Unavailable("load failed".to_string()));
        }
        Ok(self.rows.lock().expect("rows mutex poisoned").clone())
    }

    async fn save(&self, cell: PersistedCell) -> Result<(), StoreError> {
        if self.failures.save {
            return Err(StoreError::Query("save failed".to_string()));
        }
        self.saved.lock().expect("saved mutex poisoned").push(cell);
        Ok(())
    }
}
