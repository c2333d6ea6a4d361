use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

use crate::domain::{CellStore, Clock, PersistedCell, StoreError};

// PostgreSQL-backed cell store, one row per touched cell.
#[derive(Clone)]
pub struct PostgresCellStore {
    pub db: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct CellRow {
    x: i32,
    y: i32,
    active: bool,
    color: String,
    placed_by: Option<String>,
    updated_at: i64,
    version: i64,
}

impl From<CellRow> for PersistedCell {
    fn from(row: CellRow) -> Self {
        Self {
            x: row.x,
            y: row.y,
            active: row.active,
            color: row.color,
            placed_by: row.placed_by,
            updated_at: u64::try_from(row.updated_at).unwrap_or_default(),
            version: u64::try_from(row.version).unwrap_or_default(),
        }
    }
}

fn query_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(e.to_string())
        }
        other => StoreError::Query(other.to_string()),
    }
}

#[async_trait]
impl CellStore for PostgresCellStore {
    async fn load_all(&self) -> Result<Vec<PersistedCell>, StoreError> {
        let rows = sqlx::query_as::<_, CellRow>(
            "SELECT x, y, active, color, placed_by, updated_at, version FROM cells",
        )
        .fetch_all(&self.db)
        .await
        .map_err(query_error)?;

        Ok(rows.into_iter().map(PersistedCell::from).collect())
    }

    async fn save(&self, cell: PersistedCell) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO cells (x, y, active, color, placed_by, updated_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (x, y) DO UPDATE SET
                active = EXCLUDED.active,
                color = EXCLUDED.color,
                placed_by = EXCLUDED.placed_by,
                updated_at = EXCLUDED.updated_at,
                version = EXCLUDED.version
            WHERE cells.version < EXCLUDED.version
            "#,
        )
        .bind(cell.x)
        .bind(cell.y)
        .bind(cell.active)
        .bind(&cell.color)
        .bind(&cell.placed_by)
        .bind(i64::try_from(cell.updated_at).unwrap_or(i64::MAX))
        .bind(i64::try_from(cell.version).unwrap_or(i64::MAX))
        .execute(&self.db)
        .await
        .map_err(query_error)?;

        Ok(())
    }
}

// Process-local store used when no database is configured.
#[derive(Clone, Default)]
pub struct InMemoryCellStore {
    pub cells: Arc<Mutex<HashMap<(i32, i32), PersistedCell>>>,
}

#[async_trait]
impl CellStore for InMemoryCellStore {
    async fn load_all(&self) -> Result<Vec<PersistedCell>, StoreError> {
        let cells = self.cells.lock().await;
        Ok(cells.values().cloned().collect())
    }

    async fn save(&self, cell: PersistedCell) -> Result<(), StoreError> {
        let mut cells = self.cells.lock().await;
        match cells.get(&(cell.x, cell.y)) {
            Some(current) if current.version >= cell.version => {}
            _ => {
                cells.insert((cell.x, cell.y), cell);
            }
        }
        Ok(())
    }
}

// System clock adapter used by the toggle use case.
#[derive(Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    fn now_epoch_nanos(&self) -> u64 {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        u64::try_from(nanos).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(x: i32, y: i32, active: bool, color: &str, version: u64) -> PersistedCell {
        PersistedCell {
            x,
            y,
            active,
            color: color.to_string(),
            placed_by: Some("198.51.100.7".to_string()),
            updated_at: 42,
            version,
        }
    }

    #[tokio::test]
    async fn when_same_cell_is_saved_twice_then_in_memory_store_keeps_latest_row() {
        let store = InMemoryCellStore::default();
        store.save(cell(1, 1, true, "#FF0000", 1)).await.expect("save");
        store.save(cell(1, 1, false, "#FFFFFF", 2)).await.expect("save");
        store.save(cell(2, 1, true, "#0000FF", 3)).await.expect("save");

        let mut rows = store.load_all().await.expect("load");
        rows.sort_by_key(|row| (row.x, row.y));
        assert_eq!(
            rows,
            vec![cell(1, 1, false, "#FFFFFF", 2), cell(2, 1, true, "#0000FF", 3)]
        );
    }

    #[tokio::test]
    async fn when_saves_land_out_of_order_then_older_version_is_ignored() {
        let store = InMemoryCellStore::default();
        store.save(cell(4, 4, false, "#FFFFFF", 20)).await.expect("save");
        store.save(cell(4, 4, true, "#FF0000", 10)).await.expect("save");

        let rows = store.load_all().await.expect("load");
        assert_eq!(rows, vec![cell(4, 4, false, "#FFFFFF", 20)]);
    }

    #[test]
    fn when_db_row_has_negative_timestamp_then_it_maps_to_zero() {
        let persisted = PersistedCell::from(CellRow {
            x: 1,
            y: 2,
            active: true,
            color: "#FF0000".to_string(),
            placed_by: None,
            updated_at: -5,
            version: -1,
        });
        assert_eq!(persisted.updated_at, 0);
        assert_eq!(persisted.version, 0);
    }

    #[test]
    fn system_clock_reports_a_time_after_2020() {
        assert!(SystemClock.now_epoch_seconds() > 1_577_836_800);
        assert!(SystemClock.now_epoch_nanos() > 1_577_836_800 * 1_000_000_000);
    }
}
