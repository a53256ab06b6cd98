//! CSV export and import of per-slot results.
//!
//! The exchanged shape is one row per (slot, policy, sensor): all baseline
//! rows first in slot-major sensor-minor order, then all predictive rows.
//! Numbers are printed with their default decimal representation, so an
//! exported file parsed back and re-exported is byte-identical.

use thiserror::Error;

use crate::driver::{SimulationState, SlotRecord};

/// Exact header line of the CSV form.
pub const CSV_HEADER: &str = "slot,algorithm,sensor_id,H_l,H_o,H_k,alpha,local_energy_J,tx_energy_J,battery_J,arrival_bits,harvest_J";

const FIELD_COUNT: usize = 12;

/// Errors produced while parsing a results CSV.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The first line did not match [`CSV_HEADER`].
    #[error("unexpected CSV header: {found}")]
    Header {
        /// The header line actually present
        found: String,
    },

    /// A data line had the wrong number of fields.
    #[error("line {line}: expected {FIELD_COUNT} fields, found {found}")]
    FieldCount {
        /// 1-based line number
        line: usize,
        /// Number of fields found
        found: usize,
    },

    /// A field failed to parse as its expected type.
    #[error("line {line}: invalid {field}: {value}")]
    Parse {
        /// 1-based line number
        line: usize,
        /// Field name from the header
        field: &'static str,
        /// The unparseable text
        value: String,
    },
}

/// One CSV data row.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvRow {
    /// Slot index
    pub slot: usize,
    /// Policy tag
    pub algorithm: String,
    /// Sensor identifier
    pub sensor_id: String,
    /// Local queue after the slot, bits
    pub h_local: f64,
    /// Offload queue after the slot, bits
    pub h_offload: f64,
    /// Edge queue after the slot, bits
    pub h_edge: f64,
    /// Offload fraction applied
    pub alpha: f64,
    /// Local CPU energy, joules
    pub local_energy_j: f64,
    /// Transmit energy, joules
    pub tx_energy_j: f64,
    /// Battery after the slot, joules
    pub battery_j: f64,
    /// Realized arrival, bits
    pub arrival_bits: f64,
    /// Realized harvest, joules
    pub harvest_j: f64,
}

/// Exports a run's results to the CSV exchange form.
pub fn export_csv(state: &SimulationState) -> String {
    let rows = rows_from_records(
        state
            .baseline_results
            .iter()
            .chain(&state.predictive_results),
    );
    rows_to_csv(&rows)
}

/// Formats rows (plus the header) as CSV text.
pub fn rows_to_csv(rows: &[CsvRow]) -> String {
    let mut out = String::with_capacity(64 * (rows.len() + 1));
    out.push_str(CSV_HEADER);
    out.push('\n');
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{},{},{}\n",
            row.slot,
            row.algorithm,
            row.sensor_id,
            row.h_local,
            row.h_offload,
            row.h_edge,
            row.alpha,
            row.local_energy_j,
            row.tx_energy_j,
            row.battery_j,
            row.arrival_bits,
            row.harvest_j,
        ));
    }
    out
}

/// Parses CSV text previously produced by [`export_csv`].
///
/// # Errors
/// - `ExportError::Header` - First line is not the expected header
/// - `ExportError::FieldCount` - A row has the wrong arity
/// - `ExportError::Parse` - A numeric field is malformed
pub fn import_csv(text: &str) -> Result<Vec<CsvRow>, ExportError> {
    let mut lines = text.lines().enumerate();
    match lines.next() {
        Some((_, header)) if header == CSV_HEADER => {}
        Some((_, header)) => {
            return Err(ExportError::Header {
                found: header.to_string(),
            })
        }
        None => {
            return Err(ExportError::Header {
                found: String::new(),
            })
        }
    }

    let mut rows = Vec::new();
    for (index, line) in lines {
        if line.is_empty() {
            continue;
        }
        let line_no = index + 1;
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != FIELD_COUNT {
            return Err(ExportError::FieldCount {
                line: line_no,
                found: fields.len(),
            });
        }

        let number = |field: &'static str, value: &str| -> Result<f64, ExportError> {
            value.parse().map_err(|_| ExportError::Parse {
                line: line_no,
                field,
                value: value.to_string(),
            })
        };

        rows.push(CsvRow {
            slot: fields[0].parse().map_err(|_| ExportError::Parse {
                line: line_no,
                field: "slot",
                value: fields[0].to_string(),
            })?,
            algorithm: fields[1].to_string(),
            sensor_id: fields[2].to_string(),
            h_local: number("H_l", fields[3])?,
            h_offload: number("H_o", fields[4])?,
            h_edge: number("H_k", fields[5])?,
            alpha: number("alpha", fields[6])?,
            local_energy_j: number("local_energy_J", fields[7])?,
            tx_energy_j: number("tx_energy_J", fields[8])?,
            battery_j: number("battery_J", fields[9])?,
            arrival_bits: number("arrival_bits", fields[10])?,
            harvest_j: number("harvest_J", fields[11])?,
        });
    }
    Ok(rows)
}

fn rows_from_records<'a>(records: impl Iterator<Item = &'a SlotRecord>) -> Vec<CsvRow> {
    let mut rows = Vec::new();
    for record in records {
        for sensor in &record.sensors {
            rows.push(CsvRow {
                slot: record.slot,
                algorithm: record.algorithm.clone(),
                sensor_id: sensor.id.clone(),
                h_local: sensor.h_local,
                h_offload: sensor.h_offload,
                h_edge: sensor.h_edge,
                alpha: sensor.alpha,
                local_energy_j: sensor.local_energy_j,
                tx_energy_j: sensor.tx_energy_j,
                battery_j: sensor.battery_j,
                arrival_bits: sensor.arrival_bits,
                harvest_j: sensor.harvest_j,
            });
        }
    }
    rows
}
