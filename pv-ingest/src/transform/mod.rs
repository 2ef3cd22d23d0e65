//! Snapshot parsing: raw payload bytes into a validated [`Reading`].
//!
//! Two payload shapes are understood:
//! - key/value pairs (`live_power=3.2,energy_today=12.5` or `live_power: 3.2`
//!   one per line), separated by commas and/or newlines;
//! - a CSV table with a header row, where the last data row is the current
//!   snapshot and `energy_ptot_<N>_kWh` columns form the production curve.
//!   Without a `live_power` column the highest-index curve point is used.
//!
//! Numbers always use `.` as the decimal separator. Unknown keys are ignored.

use std::collections::BTreeMap;

use pv_client::domain::{DataSource, ProductionPoint, Reading};
use time::{
    format_description::well_known::Rfc3339, macros::datetime, macros::format_description, OffsetDateTime,
    PrimitiveDateTime,
};

use crate::pipeline::PipelineError;

/// Canonical field name → raw value, after alias resolution.
type Fields = BTreeMap<&'static str, String>;

const CURVE_PREFIX: &str = "energy_ptot_";
const CURVE_SUFFIX: &str = "_kwh";

/// Parse a raw snapshot into a validated reading.
pub fn parse_reading(raw: &[u8]) -> Result<Reading, PipelineError> {
    match parse_unvalidated(raw).and_then(validate_reading) {
        Ok(reading) => Ok(reading),
        Err(e) => {
            metrics::counter!("pv_parse_errors_total").increment(1);
            Err(e)
        }
    }
}

fn parse_unvalidated(raw: &[u8]) -> Result<Reading, PipelineError> {
    let text = std::str::from_utf8(raw).map_err(|e| format_err(format!("payload is not UTF-8: {e}")))?;
    let text = text.trim_start_matches('\u{feff}');

    let first_line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| format_err("payload is empty"))?;

    let (fields, curve) = if first_line.contains('=') || first_line.contains(':') {
        (parse_key_value(text)?, Vec::new())
    } else {
        parse_tabular(text)?
    };

    fields_to_reading(&fields, curve)
}

/// Map a raw key or column name to its canonical field, if it is one we know.
fn canonical_field(raw_key: &str) -> Option<&'static str> {
    let key = raw_key.trim().to_ascii_lowercase().replace([' ', '-'], "_");
    let field = match key.as_str() {
        "live_power" | "current_power" => "live_power",
        "energy_today" | "daily_energy" => "energy_today",
        "ac_power" => "ac_power",
        "dc_power" => "dc_power",
        "efficiency" => "efficiency",
        "uv_index" => "uv_index",
        "total_energy" | "lifetime_energy" | "total_energy_kwh" => "total_energy",
        "system_temp" | "temperature" => "system_temp",
        "co2_avoided" => "co2_avoided",
        "ambient_temp" | "ambient_temperature" => "ambient_temp",
        "captured_at" | "timestamp" => "captured_at",
        _ => return None,
    };
    Some(field)
}

/// Curve point index of an `energy_ptot_<N>_kWh` column.
fn curve_index(raw_key: &str) -> Option<u32> {
    let key = raw_key.trim().to_ascii_lowercase();
    key.strip_prefix(CURVE_PREFIX)?.strip_suffix(CURVE_SUFFIX)?.parse().ok()
}

fn parse_key_value(text: &str) -> Result<Fields, PipelineError> {
    let mut fields = Fields::new();

    for token in text.split(['\n', ',']) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        // `=` wins over `:` so timestamps like `captured_at=2024-01-01T10:00:00Z` split correctly.
        let (key, value) = token
            .split_once('=')
            .or_else(|| token.split_once(':'))
            .ok_or_else(|| format_err(format!("malformed pair '{token}'")))?;

        if let Some(field) = canonical_field(key) {
            fields.insert(field, value.trim().to_string());
        }
    }

    Ok(fields)
}

fn parse_tabular(text: &str) -> Result<(Fields, Vec<ProductionPoint>), PipelineError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = rdr
        .headers()
        .map_err(|e| format_err(format!("failed to read CSV header: {e}")))?
        .clone();

    let mut last = None;
    for result in rdr.records() {
        let record = result.map_err(|e| format_err(format!("failed to read CSV record: {e}")))?;
        if record.iter().all(|v| v.is_empty()) {
            continue;
        }
        last = Some(record);
    }
    let record = last.ok_or_else(|| format_err("CSV payload has no data rows"))?;

    let mut fields = Fields::new();
    let mut curve = Vec::new();
    for (name, value) in headers.iter().zip(record.iter()) {
        if let Some(field) = canonical_field(name) {
            fields.insert(field, value.to_string());
        } else if let Some(hour) = curve_index(name) {
            if let Some(energy) = parse_decimal(name, value)? {
                curve.push(ProductionPoint { hour, energy });
            }
        }
    }
    curve.sort_by_key(|p| p.hour);

    Ok((fields, curve))
}

/// Locale-independent number parsing: `.` is the only decimal separator.
///
/// Empty values and `null` are absent. Anything else that is not a finite
/// plain decimal number is rejected.
fn parse_decimal(name: &str, value: &str) -> Result<Option<f64>, PipelineError> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("null") {
        return Ok(None);
    }

    let plain = value
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'));
    if !plain {
        return Err(format_err(format!("'{name}' is not a number: '{value}'")));
    }

    let parsed: f64 = value
        .parse()
        .map_err(|e| format_err(format!("'{name}' is not a number: '{value}' ({e})")))?;
    if !parsed.is_finite() {
        return Err(format_err(format!("'{name}' is not finite: '{value}'")));
    }
    Ok(Some(parsed))
}

fn parse_timestamp(value: &str) -> Result<Option<OffsetDateTime>, PipelineError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    if let Ok(ts) = OffsetDateTime::parse(value, &Rfc3339) {
        return Ok(Some(ts));
    }

    let with_fraction = format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]");
    let without_fraction = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    PrimitiveDateTime::parse(value, with_fraction)
        .or_else(|_| PrimitiveDateTime::parse(value, without_fraction))
        .map(|ts| Some(ts.assume_utc()))
        .map_err(|e| format_err(format!("invalid timestamp '{value}': {e}")))
}

fn fields_to_reading(fields: &Fields, production_curve: Vec<ProductionPoint>) -> Result<Reading, PipelineError> {
    let number = |field: &'static str| -> Result<Option<f64>, PipelineError> {
        match fields.get(field) {
            Some(v) => parse_decimal(field, v),
            None => Ok(None),
        }
    };

    // The inverter's own `pv.csv` has no power column; its newest curve
    // point is the live signal there. An explicit but empty value stays an error.
    let missing = || format_err("missing mandatory field 'live_power'");
    let live_power = match number("live_power")? {
        Some(v) => v,
        None if !fields.contains_key("live_power") => production_curve.last().map(|p| p.energy).ok_or_else(missing)?,
        None => return Err(missing()),
    };
    let captured_at = match fields.get("captured_at") {
        Some(v) => parse_timestamp(v)?,
        None => None,
    };

    Ok(Reading {
        captured_at,
        live_power,
        energy_today: number("energy_today")?,
        ac_power: number("ac_power")?,
        dc_power: number("dc_power")?,
        efficiency: number("efficiency")?,
        uv_index: number("uv_index")?,
        total_energy: number("total_energy")?,
        system_temp: number("system_temp")?,
        co2_avoided: number("co2_avoided")?,
        ambient_temp: number("ambient_temp")?,
        source: DataSource::Live,
        production_curve,
    })
}

/// Pure validation of a parsed `Reading`.
///
/// Rules:
/// - power values must be non-negative;
/// - a source timestamp must fall within [2000-01-01, 2100-01-01].
pub fn validate_reading(reading: Reading) -> Result<Reading, PipelineError> {
    let powers = [
        ("live_power", Some(reading.live_power)),
        ("ac_power", reading.ac_power),
        ("dc_power", reading.dc_power),
    ];
    for (name, value) in powers {
        if let Some(v) = value {
            if v < 0.0 {
                return Err(format_err(format!("{name} must be non-negative, got {v}")));
            }
        }
    }

    if let Some(ts) = reading.captured_at {
        let min_ts = datetime!(2000-01-01 00:00:00 UTC);
        let max_ts = datetime!(2100-01-01 00:00:00 UTC);
        if ts < min_ts || ts > max_ts {
            return Err(format_err("timestamp out of allowed range"));
        }
    }

    Ok(reading)
}

fn format_err(msg: impl Into<String>) -> PipelineError {
    PipelineError::Format(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn parse(s: &str) -> Result<Reading, PipelineError> {
        parse_reading(s.as_bytes())
    }

    #[test]
    fn key_value_payload_sets_only_present_fields() {
        let r = parse("live_power=3.2,energy_today=12.5,ac_power=3.0,dc_power=3.3").unwrap();
        assert_eq!(r.live_power, 3.2);
        assert_eq!(r.energy_today, Some(12.5));
        assert_eq!(r.ac_power, Some(3.0));
        assert_eq!(r.dc_power, Some(3.3));

        assert_eq!(r.captured_at, None);
        assert_eq!(r.efficiency, None);
        assert_eq!(r.uv_index, None);
        assert_eq!(r.total_energy, None);
        assert_eq!(r.system_temp, None);
        assert_eq!(r.co2_avoided, None);
        assert_eq!(r.ambient_temp, None);
        assert!(r.production_curve.is_empty());
        assert_eq!(r.source, DataSource::Live);
    }

    #[test]
    fn live_power_is_taken_verbatim() {
        for raw in ["0", "0.001", "3.2", "12345.678901", "1e-3", "7"] {
            let r = parse(&format!("live_power={raw}")).unwrap();
            assert_eq!(r.live_power, raw.parse::<f64>().unwrap(), "value {raw}");
        }
    }

    #[test]
    fn colon_lines_with_aliases() {
        let r = parse(
            "Current Power: 4.1\n\
             Daily Energy: 20.25\n\
             Temperature: 41.5\n\
             Ambient Temperature: 18\n\
             Timestamp: 2024-05-01 10:15:00\n",
        )
        .unwrap();
        assert_eq!(r.live_power, 4.1);
        assert_eq!(r.energy_today, Some(20.25));
        assert_eq!(r.system_temp, Some(41.5));
        assert_eq!(r.ambient_temp, Some(18.0));
        assert_eq!(r.captured_at, Some(datetime!(2024-05-01 10:15:00 UTC)));
    }

    #[test]
    fn rfc3339_timestamp_in_key_value_payload() {
        let r = parse("captured_at=2024-05-01T10:15:00+02:00,live_power=1.5").unwrap();
        assert_eq!(r.captured_at, Some(datetime!(2024-05-01 08:15:00 UTC)));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let r = parse("inverter_id=7,live_power=2.0,firmware=v1.2").unwrap();
        assert_eq!(r.live_power, 2.0);
    }

    #[test]
    fn missing_live_power_is_a_format_error() {
        for raw in [
            "energy_today=12.5,ac_power=3.0",
            "live_power=,energy_today=1",
            "timestamp,energy_today\n2024-05-01 10:00:00,1.0\n",
        ] {
            assert!(matches!(parse(raw), Err(PipelineError::Format(_))), "payload {raw:?}");
        }
    }

    #[test]
    fn empty_or_binary_payload_is_rejected() {
        assert!(matches!(parse(""), Err(PipelineError::Format(_))));
        assert!(matches!(parse(" \n\t\n"), Err(PipelineError::Format(_))));
        assert!(matches!(parse_reading(&[0xff, 0xfe, 0x00]), Err(PipelineError::Format(_))));
    }

    #[test]
    fn comma_decimal_is_never_misread() {
        // In pair form the stray ",2" is a token without a separator.
        assert!(matches!(parse("live_power=3,2"), Err(PipelineError::Format(_))));
        // In colon form the same happens line by line.
        assert!(matches!(parse("live_power: 3,2"), Err(PipelineError::Format(_))));
        // A quoted CSV cell keeps the comma and is rejected as non-numeric.
        assert!(matches!(parse("live_power\n\"3,2\"\n"), Err(PipelineError::Format(_))));
    }

    #[test]
    fn non_numeric_and_non_finite_values_are_rejected() {
        for raw in ["live_power=abc", "live_power=NaN", "live_power=inf", "live_power=1.0,efficiency=high"] {
            assert!(matches!(parse(raw), Err(PipelineError::Format(_))), "payload {raw:?}");
        }
    }

    #[test]
    fn negative_power_is_rejected() {
        assert!(matches!(parse("live_power=-0.1"), Err(PipelineError::Format(_))));
        assert!(matches!(parse("live_power=1,ac_power=-2"), Err(PipelineError::Format(_))));
    }

    #[test]
    fn out_of_range_timestamp_is_rejected() {
        assert!(matches!(
            parse("timestamp=1970-01-01T00:00:00Z,live_power=1"),
            Err(PipelineError::Format(_))
        ));
    }

    #[test]
    fn malformed_pair_is_rejected() {
        assert!(matches!(parse("live_power=1.0\ngarbage"), Err(PipelineError::Format(_))));
    }

    #[test]
    fn csv_uses_last_row_and_builds_curve() {
        let csv = "\
timestamp,live_power,energy_ptot_2_kWh,energy_ptot_0_kWh,energy_ptot_1_kWh,total_energy_kWh,notes
2024-05-01 09:00:00,1.0,0.2,0.0,0.1,100.0,first
2024-05-01 10:00:00,2.5,0.9,0.1,0.4,101.4,second
";
        let r = parse(csv).unwrap();
        assert_eq!(r.captured_at, Some(datetime!(2024-05-01 10:00:00 UTC)));
        assert_eq!(r.live_power, 2.5);
        assert_eq!(r.total_energy, Some(101.4));
        assert_eq!(
            r.production_curve,
            vec![
                ProductionPoint { hour: 0, energy: 0.1 },
                ProductionPoint { hour: 1, energy: 0.4 },
                ProductionPoint { hour: 2, energy: 0.9 },
            ]
        );
    }

    #[test]
    fn inverter_csv_takes_live_power_from_newest_curve_point() {
        let csv = "\
timestamp,energy_ptot_0_kWh,energy_ptot_1_kWh,energy_ptot_2_kWh,total_energy_kWh
2024-05-01 10:00:00,0.1,0.4,0.9,101.4
";
        let r = parse(csv).unwrap();
        assert_eq!(r.live_power, 0.9);
        assert_eq!(r.total_energy, Some(101.4));
        assert_eq!(r.captured_at, Some(datetime!(2024-05-01 10:00:00 UTC)));
        assert_eq!(r.production_curve.len(), 3);
    }

    #[test]
    fn explicit_live_power_wins_over_curve() {
        let r = parse("live_power,energy_ptot_0_kWh\n2.5,0.9\n").unwrap();
        assert_eq!(r.live_power, 2.5);

        // Present but empty is still missing, curve or not.
        assert!(matches!(
            parse("live_power,energy_ptot_0_kWh\n,0.9\n"),
            Err(PipelineError::Format(_))
        ));
    }

    #[test]
    fn csv_empty_cells_are_null() {
        let r = parse("live_power,efficiency,uv_index\n3.0,,5\n").unwrap();
        assert_eq!(r.efficiency, None);
        assert_eq!(r.uv_index, Some(5.0));
    }

    #[test]
    fn csv_without_rows_is_rejected() {
        assert!(matches!(parse("live_power,energy_today\n"), Err(PipelineError::Format(_))));
    }

    #[test]
    fn csv_ragged_rows_are_rejected() {
        assert!(matches!(parse("live_power,energy_today\n1.0,2.0,3.0\n"), Err(PipelineError::Format(_))));
    }

    #[test]
    fn efficiency_is_not_clamped() {
        let r = parse("live_power=1,efficiency=130").unwrap();
        assert_eq!(r.efficiency, Some(130.0));
    }
}
