//! CSV and JSON renderings of stored readings.
//!
//! Column order is fixed by [`ExportRow`], so identical rows always export to
//! identical bytes. The production curve is never exported because it is
//! never stored.

use std::{fmt, str::FromStr};

use pv_client::domain::{DataSource, Reading};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::pipeline::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Comma-separated values with a header row.
    Tabular,
    /// A JSON array of objects, one per row.
    Structured,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Tabular => "csv",
            ExportFormat::Structured => "json",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Tabular => "text/csv",
            ExportFormat::Structured => "application/json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" | "tabular" => Ok(ExportFormat::Tabular),
            "json" | "structured" => Ok(ExportFormat::Structured),
            other => Err(format!("unknown export format '{other}' (expected csv or json)")),
        }
    }
}

/// One exported row; field order is the column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRow {
    #[serde(with = "time::serde::rfc3339::option")]
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
    pub data_source: String,
}

impl From<&Reading> for ExportRow {
    fn from(r: &Reading) -> Self {
        Self {
            captured_at: r.captured_at,
            live_power: r.live_power,
            energy_today: r.energy_today,
            ac_power: r.ac_power,
            dc_power: r.dc_power,
            efficiency: r.efficiency,
            uv_index: r.uv_index,
            total_energy: r.total_energy,
            system_temp: r.system_temp,
            co2_avoided: r.co2_avoided,
            ambient_temp: r.ambient_temp,
            data_source: r.source.as_str().to_string(),
        }
    }
}

impl TryFrom<ExportRow> for Reading {
    type Error = PipelineError;

    fn try_from(row: ExportRow) -> Result<Self, Self::Error> {
        let source = row
            .data_source
            .parse::<DataSource>()
            .map_err(|e| PipelineError::Export(e.to_string()))?;
        Ok(Reading {
            captured_at: row.captured_at,
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

pub fn export(rows: &[Reading], format: ExportFormat) -> Result<Vec<u8>, PipelineError> {
    let out = match format {
        ExportFormat::Tabular => export_tabular(rows)?,
        ExportFormat::Structured => {
            let rows: Vec<ExportRow> = rows.iter().map(ExportRow::from).collect();
            serde_json::to_vec(&rows).map_err(|e| PipelineError::Export(format!("JSON encoding failed: {e}")))?
        }
    };

    metrics::counter!("pv_export_rows_total", "format" => format.extension()).increment(rows.len() as u64);
    Ok(out)
}

fn export_tabular(rows: &[Reading]) -> Result<Vec<u8>, PipelineError> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());

    // Written by hand so an empty export still carries the header.
    wtr.write_record(COLUMNS)
        .map_err(|e| PipelineError::Export(format!("CSV header failed: {e}")))?;
    for row in rows {
        wtr.serialize(ExportRow::from(row))
            .map_err(|e| PipelineError::Export(format!("CSV encoding failed: {e}")))?;
    }

    wtr.into_inner()
        .map_err(|e| PipelineError::Export(format!("CSV flush failed: {e}")))
}

/// Tabular export header, in column order.
pub const COLUMNS: [&str; 12] = [
    "captured_at",
    "live_power",
    "energy_today",
    "ac_power",
    "dc_power",
    "efficiency",
    "uv_index",
    "total_energy",
    "system_temp",
    "co2_avoided",
    "ambient_temp",
    "data_source",
];

/// Read a tabular export back into readings.
pub fn read_tabular(bytes: &[u8]) -> Result<Vec<Reading>, PipelineError> {
    let mut rdr = csv::Reader::from_reader(bytes);
    rdr.deserialize::<ExportRow>()
        .map(|row| {
            let row = row.map_err(|e| PipelineError::Export(format!("invalid CSV export row: {e}")))?;
            Reading::try_from(row)
        })
        .collect()
}
