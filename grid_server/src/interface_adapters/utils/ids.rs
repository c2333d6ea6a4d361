use std::{
    sync::{
        OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use crate::use_cases::SessionId;

/// Returns a process-unique session id.
///
/// Seeded from the wall clock so ids from a restarted process do not repeat in logs.
pub fn next_session_id() -> SessionId {
    static NEXT: OnceLock<AtomicU64> = OnceLock::new();
    let next = NEXT.get_or_init(|| {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(1);
        AtomicU64::new(seed)
    });
    next.fetch_add(1, Ordering::Relaxed)
}
