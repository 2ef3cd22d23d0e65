use std::{fmt, str::FromStr};

use time::{format_description::BorrowedFormatItem, macros::format_description, OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// Fixed-width UTC layout used for `captured_at` in the history table.
///
/// Matches SQLite's `strftime('%Y-%m-%dT%H:%M:%fZ', 'now')`, so stored
/// timestamps sort lexically in time order.
pub const STORED_TS_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z");

/// Where a reading came from. Only live data is ever stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DataSource {
    #[default]
    Live,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Live => "live",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown data source '{0}'")]
pub struct UnknownDataSource(pub String);

impl FromStr for DataSource {
    type Err = UnknownDataSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "live" => Ok(DataSource::Live),
            other => Err(UnknownDataSource(other.to_string())),
        }
    }
}

/// One point of the inverter's production curve (point index, kWh).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProductionPoint {
    pub hour: u32,
    pub energy: f64,
}

/// One telemetry snapshot of the PV installation.
///
/// Power values are kW, energy values kWh, efficiency is a percentage.
/// `captured_at` is `None` only for readings that have not been stored yet;
/// the history store assigns the append time in that case.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Reading {
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339::option", default))]
    pub captured_at: Option<OffsetDateTime>,
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
    pub source: DataSource,
    /// Kept for the current in-memory reading only; never persisted.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Vec::is_empty"))]
    pub production_curve: Vec<ProductionPoint>,
}

impl Reading {
    /// A live reading carrying only the mandatory power signal.
    pub fn live(live_power: f64) -> Self {
        Self {
            captured_at: None,
            live_power,
            energy_today: None,
            ac_power: None,
            dc_power: None,
            efficiency: None,
            uv_index: None,
            total_energy: None,
            system_temp: None,
            co2_avoided: None,
            ambient_temp: None,
            source: DataSource::Live,
            production_curve: Vec::new(),
        }
    }

    pub fn with_captured_at(mut self, ts: OffsetDateTime) -> Self {
        self.captured_at = Some(ts);
        self
    }
}

/// Formats a timestamp in the stored layout, normalised to UTC.
///
/// Sub-millisecond precision is dropped.
pub fn format_stored_ts(ts: OffsetDateTime) -> Result<String, time::error::Format> {
    ts.to_offset(UtcOffset::UTC).format(STORED_TS_FORMAT)
}

pub fn parse_stored_ts(s: &str) -> Result<OffsetDateTime, time::error::Parse> {
    Ok(PrimitiveDateTime::parse(s, STORED_TS_FORMAT)?.assume_utc())
}
