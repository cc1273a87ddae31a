//! Schema mapping from plant telemetry columns to canonical channels
//!
//! Telemetry exports name channels after the instrument (`pressure_bar`,
//! `do_ppm`, ...). The mapper renames them, converts units, and synthesizes
//! `valve_state` / `agitator_rpm` when the export lacks them.

use tracing::{debug, info};

use crate::types::{channels, Frame, StageReport};

/// One external column and its canonical counterpart
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnMapping {
    pub external: &'static str,
    pub canonical: &'static str,
    /// canonical = external * factor
    pub factor: f64,
}

/// Telemetry columns understood by the mapper
pub const COLUMN_MAPPINGS: [ColumnMapping; 4] = [
    ColumnMapping { external: "co2_lpm", canonical: channels::CO2, factor: 1.0 },
    ColumnMapping { external: "do_ppm", canonical: channels::OXYGEN, factor: 1.0 },
    ColumnMapping { external: "temp_c", canonical: channels::TEMPERATURE, factor: 1.0 },
    ColumnMapping { external: "pressure_bar", canonical: channels::PRESSURE, factor: 100.0 },
];

/// Columns that carry the batch / tank key rather than a measurement
pub const GROUP_COLUMNS: [&str; 3] = ["batch_id", "tank_id", "group"];

/// Head pressure above which the blow-off valve is taken as open (kPa)
pub const VALVE_OPEN_PRESSURE_KPA: f64 = 100.0;

/// Agitator speed used when no temperature is available (rpm)
pub const DEFAULT_AGITATOR_RPM: f64 = 1000.0;

const AGITATOR_RPM_PER_DEGREE: f64 = 20.0;
const AGITATOR_MAX_RPM: f64 = 2000.0;

#[derive(Debug, Clone, Default)]
pub struct SchemaMapper;

impl SchemaMapper {
    pub fn new() -> Self {
        Self
    }

    /// Rename and convert external channels, then synthesize missing ones.
    ///
    /// Returns the mapped frame and a report of what changed.
    pub fn to_canonical(&self, data: &Frame) -> (Frame, StageReport) {
        let mut out = data.clone();
        let mut report = StageReport::new("schema_mapper", "to_canonical");

        for m in &COLUMN_MAPPINGS {
            if !data.has_channel(m.external) {
                continue;
            }
            if data.has_channel(m.canonical) {
                debug!(external = m.external, canonical = m.canonical, "Canonical channel already present, external kept as-is");
                continue;
            }
            for row in out.readings_mut() {
                if let Some(v) = row.channels.remove(m.external) {
                    row.channels.insert(m.canonical.to_string(), v.map(|x| x * m.factor));
                }
            }
            report = report.with_count(&format!("renamed:{}", m.external), data.len());
        }

        if !out.has_channel(channels::VALVE_STATE) {
            let has_pressure = out.has_channel(channels::PRESSURE);
            for row in out.readings_mut() {
                let state = if has_pressure {
                    row.value(channels::PRESSURE)
                        .map(|p| if p > VALVE_OPEN_PRESSURE_KPA { 1.0 } else { 0.0 })
                } else {
                    Some(1.0)
                };
                row.set_value(channels::VALVE_STATE, state);
            }
            report = report.with_count("synthesized:valve_state", out.len());
        }

        if !out.has_channel(channels::AGITATOR_RPM) {
            let has_temp = out.has_channel(channels::TEMPERATURE);
            for row in out.readings_mut() {
                let rpm = if has_temp {
                    row.value(channels::TEMPERATURE)
                        .map(|t| (t * AGITATOR_RPM_PER_DEGREE).clamp(0.0, AGITATOR_MAX_RPM))
                } else {
                    Some(DEFAULT_AGITATOR_RPM)
                };
                row.set_value(channels::AGITATOR_RPM, rpm);
            }
            report = report.with_count("synthesized:agitator_rpm", out.len());
        }

        info!(rows = out.len(), changes = report.counts.len(), "Schema mapped to canonical channels");
        (out, report)
    }

    /// Reverse rename for export: canonical channels back to telemetry names
    pub fn to_external(&self, data: &Frame) -> Frame {
        let mut out = data.clone();
        for m in &COLUMN_MAPPINGS {
            if data.has_channel(m.external) {
                continue;
            }
            for row in out.readings_mut() {
                if let Some(v) = row.channels.remove(m.canonical) {
                    row.channels.insert(m.external.to_string(), v.map(|x| x / m.factor));
                }
            }
        }
        out
    }
}
