use std::{str::FromStr, time::Duration};

use pv_client::{
    db::{readings_queries, HistoryFilter, ReadingStatistics},
    domain::{format_stored_ts, Reading},
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use time::OffsetDateTime;

use crate::{
    config::StoreConfig,
    pipeline::{PipelineError, Sink},
};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS pv_readings (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        captured_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        live_power   REAL NOT NULL,
        energy_today REAL,
        ac_power     REAL,
        dc_power     REAL,
        efficiency   REAL,
        uv_index     REAL,
        total_energy REAL,
        system_temp  REAL,
        co2_avoided  REAL,
        ambient_temp REAL,
        data_source  TEXT NOT NULL
    )
"#;

const CREATE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_pv_readings_captured_at ON pv_readings (captured_at, id)";

/// Append-only SQLite log of readings.
///
/// Each append is a single INSERT, so readers never observe half a row. WAL
/// mode lets one writer and any number of readers share the file across
/// processes. Nothing here updates a row; the only delete is the explicit
/// [`HistoryStore::delete_older_than`].
#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    /// Open (creating if needed) the store file and ensure the schema.
    pub async fn open(cfg: &StoreConfig) -> Result<Self, PipelineError> {
        let options = SqliteConnectOptions::new()
            .filename(&cfg.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(cfg.busy_timeout_ms));

        let pool = SqlitePoolOptions::new()
            .max_connections(cfg.max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| storage_err(format!("cannot open {}", cfg.path.display()), e))?;

        Self::with_pool(pool).await
    }

    /// Private in-memory store, used by tests and dry runs.
    pub async fn open_in_memory() -> Result<Self, PipelineError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| storage_err("invalid in-memory url", e))?;

        // Every connection would get its own database, so keep exactly one alive.
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| storage_err("cannot open in-memory store", e))?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, PipelineError> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Create the table and index if absent. Existing rows are untouched.
    pub async fn ensure_schema(&self) -> Result<(), PipelineError> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err("failed to create pv_readings", e))?;
        sqlx::query(CREATE_INDEX)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err("failed to create pv_readings index", e))?;
        Ok(())
    }

    /// Append one reading. A missing `captured_at` becomes the insert time.
    pub async fn append(&self, reading: &Reading) -> Result<i64, PipelineError> {
        let captured_at = reading
            .captured_at
            .map(format_stored_ts)
            .transpose()
            .map_err(|e| PipelineError::Storage(format!("cannot format captured_at: {e}")))?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO pv_readings (
                captured_at, live_power, energy_today, ac_power, dc_power, efficiency,
                uv_index, total_energy, system_temp, co2_avoided, ambient_temp, data_source
            )
            VALUES (COALESCE(?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now')), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(captured_at)
        .bind(reading.live_power)
        .bind(reading.energy_today)
        .bind(reading.ac_power)
        .bind(reading.dc_power)
        .bind(reading.efficiency)
        .bind(reading.uv_index)
        .bind(reading.total_energy)
        .bind(reading.system_temp)
        .bind(reading.co2_avoided)
        .bind(reading.ambient_temp)
        .bind(reading.source.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            metrics::counter!("pv_history_errors_total").increment(1);
            storage_err("failed to append reading", e)
        })?;

        metrics::counter!("pv_history_appends_total").increment(1);
        Ok(id)
    }

    /// Readings matching `filter`, oldest first.
    pub async fn query(&self, filter: &HistoryFilter) -> Result<Vec<Reading>, PipelineError> {
        let rows = readings_queries::readings_in_range(&self.pool, filter)
            .await
            .map_err(|e| PipelineError::Storage(format!("{e:#}")))?;

        rows.into_iter()
            .map(|row| Reading::try_from(row).map_err(|e| PipelineError::Storage(format!("corrupt row: {e}"))))
            .collect()
    }

    pub async fn statistics(&self, filter: &HistoryFilter) -> Result<ReadingStatistics, PipelineError> {
        readings_queries::statistics(&self.pool, filter)
            .await
            .map_err(|e| PipelineError::Storage(format!("{e:#}")))
    }

    pub async fn count(&self) -> Result<i64, PipelineError> {
        readings_queries::count(&self.pool)
            .await
            .map_err(|e| PipelineError::Storage(format!("{e:#}")))
    }

    /// Retention: remove rows captured strictly before `cutoff`.
    ///
    /// Never called by the write path; operators invoke it explicitly.
    pub async fn delete_older_than(&self, cutoff: OffsetDateTime) -> Result<u64, PipelineError> {
        let cutoff = format_stored_ts(cutoff).map_err(|e| PipelineError::Storage(format!("cannot format cutoff: {e}")))?;
        let res = sqlx::query("DELETE FROM pv_readings WHERE captured_at < ?")
            .bind(&cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_err("failed to prune readings", e))?;

        tracing::info!(cutoff = %cutoff, deleted = res.rows_affected(), "pruned history");
        Ok(res.rows_affected())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn storage_err(context: impl std::fmt::Display, e: sqlx::Error) -> PipelineError {
    tracing::error!(error = %e, "{context}");
    PipelineError::Storage(format!("{context}: {e}"))
}

#[async_trait::async_trait]
impl Sink for HistoryStore {
    async fn append(&self, reading: &Reading) -> Result<i64, PipelineError> {
        HistoryStore::append(self, reading).await
    }
}
