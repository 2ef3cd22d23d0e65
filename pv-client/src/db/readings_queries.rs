use anyhow::{Context, Result};
use sqlx::SqlitePool;
use time::{Duration, OffsetDateTime};

use crate::domain::{format_stored_ts, parse_stored_ts, DataSource, Reading};

/// Name of the append-only readings table.
pub const READINGS_TABLE: &str = "pv_readings";

/// Selection over the readings history.
///
/// `from` and `to` are inclusive. `limit` keeps the newest rows of the range;
/// results are always returned oldest first.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HistoryFilter {
    pub from: Option<OffsetDateTime>,
    pub to: Option<OffsetDateTime>,
    pub limit: Option<u32>,
}

impl HistoryFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(from: OffsetDateTime, to: OffsetDateTime) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            limit: None,
        }
    }

    /// Everything captured during the last `hours` hours.
    pub fn last_hours(hours: u32) -> Self {
        Self {
            from: Some(OffsetDateTime::now_utc() - Duration::hours(i64::from(hours))),
            to: None,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    fn bounds(&self) -> Result<(Option<String>, Option<String>)> {
        let from = self.from.map(format_stored_ts).transpose()?;
        let to = self.to.map(format_stored_ts).transpose()?;
        Ok((from, to))
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReadingRow {
    pub id: i64,
    pub captured_at: String,
    pub live_power: f64,
    pub energy_today: Option<f64>,
    pub ac_power: Option<f64>,
    pub dc_power: Option<f64>,
    pub efficiency: Option<f64>,
    pub uv_index: Option<f64>,
    pub total_energy: Option<f64>,
    pub system_temp: Option<f64>,
    pub co2_avoided: Option<f64>,
    pub ambient_temp: Option<f64>,
    pub data_source: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RowDecodeError {
    #[error("row {id}: invalid captured_at '{value}': {source}")]
    Timestamp {
        id: i64,
        value: String,
        source: time::error::Parse,
    },
    #[error("row {id}: {source}")]
    DataSource {
        id: i64,
        source: crate::domain::UnknownDataSource,
    },
}

impl TryFrom<ReadingRow> for Reading {
    type Error = RowDecodeError;

    fn try_from(row: ReadingRow) -> Result<Self, Self::Error> {
        let captured_at = parse_stored_ts(&row.captured_at).map_err(|source| RowDecodeError::Timestamp {
            id: row.id,
            value: row.captured_at.clone(),
            source,
        })?;
        let source = row
            .data_source
            .parse::<DataSource>()
            .map_err(|source| RowDecodeError::DataSource { id: row.id, source })?;

        Ok(Reading {
            captured_at: Some(captured_at),
            live_power: row.live_power,
            energy_today: row.energy_today,
            ac_power: row.ac_power,
            dc_power: row.dc_power,
            efficiency: row.efficiency,
            uv_index: row.uv_index,
            total_energy: row.total_energy,
            system_temp: row.system_temp,
            co2_avoided: row.co2_avoided,
            ambient_temp: row.ambient_temp,
            source,
            production_curve: Vec::new(),
        })
    }
}

/// Summary of live power and efficiency over a window.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ReadingStatistics {
    pub reading_count: i64,
    pub avg_power: Option<f64>,
    pub max_power: Option<f64>,
    pub min_power: Option<f64>,
    pub avg_efficiency: Option<f64>,
    pub avg_daily_energy: Option<f64>,
}

/// Fetch the readings matching `filter`, ordered by capture time then row id.
pub async fn readings_in_range(pool: &SqlitePool, filter: &HistoryFilter) -> Result<Vec<ReadingRow>> {
    let (from, to) = filter.bounds()?;
    // SQLite treats a negative LIMIT as "no limit".
    let limit = filter.limit.map(i64::from).unwrap_or(-1);

    let rows = sqlx::query_as::<_, ReadingRow>(
        r#"
        SELECT * FROM (
            SELECT
                id,
                captured_at,
                live_power,
                energy_today,
                ac_power,
                dc_power,
                efficiency,
                uv_index,
                total_energy,
                system_temp,
                co2_avoided,
                ambient_temp,
                data_source
            FROM pv_readings
            WHERE (?1 IS NULL OR captured_at >= ?1)
              AND (?2 IS NULL OR captured_at <= ?2)
            ORDER BY captured_at DESC, id DESC
            LIMIT ?3
        )
        ORDER BY captured_at ASC, id ASC
        "#,
    )
    .bind(from)
    .bind(to)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to query pv_readings")?;

    Ok(rows)
}

/// Aggregate statistics for the rows matching `filter` (the limit is ignored).
pub async fn statistics(pool: &SqlitePool, filter: &HistoryFilter) -> Result<ReadingStatistics> {
    let (from, to) = filter.bounds()?;

    let stats = sqlx::query_as::<_, ReadingStatistics>(
        r#"
        SELECT
            COUNT(*)          AS reading_count,
            AVG(live_power)   AS avg_power,
            MAX(live_power)   AS max_power,
            MIN(live_power)   AS min_power,
            AVG(efficiency)   AS avg_efficiency,
            AVG(energy_today) AS avg_daily_energy
        FROM pv_readings
        WHERE (?1 IS NULL OR captured_at >= ?1)
          AND (?2 IS NULL OR captured_at <= ?2)
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_one(pool)
    .await
    .context("failed to aggregate pv_readings")?;

    Ok(stats)
}

pub async fn count(pool: &SqlitePool) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pv_readings")
        .fetch_one(pool)
        .await
        .context("failed to count pv_readings")?;
    Ok(n)
}
