//! Sensor readings and the ordered frame that every stage consumes and produces

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::PhaseLabel;

/// Canonical channel names used throughout the engine
pub mod channels {
    /// Off-gas CO2 concentration (ppm) - the primary channel
    pub const CO2: &str = "co2_ppm";
    /// Dissolved / head-space oxygen (%)
    pub const OXYGEN: &str = "o2_pct";
    /// Tank head pressure (kPa)
    pub const PRESSURE: &str = "pressure_kpa";
    /// Process temperature (°C)
    pub const TEMPERATURE: &str = "process_temp_c";
    /// Blow-off valve state (0 = closed, 1 = open)
    pub const VALVE_STATE: &str = "valve_state";
    /// Agitator speed (rpm)
    pub const AGITATOR_RPM: &str = "agitator_rpm";
}

/// Profile key used when a reading carries no strain/style metadata
pub const DEFAULT_PROFILE_KEY: (&str, &str) = ("default", "default");

/// One timestamped sensor observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    /// Batch / tank identifier
    #[serde(default)]
    pub group: Option<String>,
    /// Yeast strain metadata
    #[serde(default)]
    pub strain: Option<String>,
    /// Beer style metadata
    #[serde(default)]
    pub style: Option<String>,
    /// Numeric channels; `None` marks a missing sample
    #[serde(default)]
    pub channels: BTreeMap<String, Option<f64>>,
    /// Derived phase label (assigned by the phase aligner)
    #[serde(default)]
    pub phase: Option<PhaseLabel>,
    /// Boolean indicator columns (e.g. `co2_ppm_outlier`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub indicators: BTreeMap<String, bool>,
}

impl Reading {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            group: None,
            strain: None,
            style: None,
            channels: BTreeMap::new(),
            phase: None,
            indicators: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, strain: impl Into<String>, style: impl Into<String>) -> Self {
        self.strain = Some(strain.into());
        self.style = Some(style.into());
        self
    }

    #[must_use]
    pub fn with_channel(mut self, name: &str, value: f64) -> Self {
        self.channels.insert(name.to_string(), Some(value));
        self
    }

    #[must_use]
    pub fn with_missing(mut self, name: &str) -> Self {
        self.channels.insert(name.to_string(), None);
        self
    }

    /// Value of a channel, `None` when absent or missing
    pub fn value(&self, channel: &str) -> Option<f64> {
        self.channels.get(channel).copied().flatten()
    }

    pub fn set_value(&mut self, channel: &str, value: Option<f64>) {
        self.channels.insert(channel.to_string(), value);
    }

    /// (strain, style) when both are present
    pub fn profile_key(&self) -> Option<(&str, &str)> {
        match (&self.strain, &self.style) {
            (Some(strain), Some(style)) => Some((strain.as_str(), style.as_str())),
            _ => None,
        }
    }
}

/// Ordered table of readings
///
/// Stages never mutate a frame in place; each returns a new `Frame`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    readings: Vec<Reading>,
}

impl Frame {
    pub fn new(readings: Vec<Reading>) -> Self {
        Self { readings }
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn readings_mut(&mut self) -> &mut [Reading] {
        &mut self.readings
    }

    pub fn into_readings(self) -> Vec<Reading> {
        self.readings
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Reading> {
        self.readings.iter()
    }

    pub fn push(&mut self, reading: Reading) {
        self.readings.push(reading);
    }

    /// Union of channel names across all readings, sorted
    pub fn channel_names(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self
            .readings
            .iter()
            .flat_map(|r| r.channels.keys())
            .collect();
        names.into_iter().cloned().collect()
    }

    /// True when at least one reading carries the channel (even as missing)
    pub fn has_channel(&self, name: &str) -> bool {
        self.readings.iter().any(|r| r.channels.contains_key(name))
    }

    /// Column view of a channel; absent cells read as `None`
    pub fn column(&self, name: &str) -> Vec<Option<f64>> {
        self.readings.iter().map(|r| r.value(name)).collect()
    }

    /// Overwrite a channel row by row. `values` must match the frame length.
    pub fn set_column(&mut self, name: &str, values: &[Option<f64>]) {
        for (reading, value) in self.readings.iter_mut().zip(values) {
            reading.set_value(name, *value);
        }
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.readings.iter().map(|r| r.timestamp).collect()
    }

    pub fn has_groups(&self) -> bool {
        self.readings.iter().any(|r| r.group.is_some())
    }

    /// Row indices per group key, groups in first-appearance order
    pub fn group_indices(&self) -> Vec<(Option<String>, Vec<usize>)> {
        let mut groups: Vec<(Option<String>, Vec<usize>)> = Vec::new();
        for (idx, reading) in self.readings.iter().enumerate() {
            match groups.iter_mut().find(|(key, _)| *key == reading.group) {
                Some((_, rows)) => rows.push(idx),
                None => groups.push((reading.group.clone(), vec![idx])),
            }
        }
        groups
    }

    /// Rows at the given indices, in the given order
    pub fn select(&self, indices: &[usize]) -> Self {
        indices
            .iter()
            .filter_map(|&i| self.readings.get(i).cloned())
            .collect()
    }

    /// Split into per-group series, each sorted by timestamp
    pub fn series(&self) -> Vec<(Option<String>, Self)> {
        self.group_indices()
            .into_iter()
            .map(|(key, rows)| (key, self.select(&rows).sorted_by_time()))
            .collect()
    }

    /// Stable sort by timestamp
    #[must_use]
    pub fn sorted_by_time(&self) -> Self {
        let mut readings = self.readings.clone();
        readings.sort_by_key(|r| r.timestamp);
        Self { readings }
    }

    /// Keep rows whose mask entry is true
    #[must_use]
    pub fn filter_rows(&self, keep: &[bool]) -> Self {
        self.readings
            .iter()
            .zip(keep)
            .filter(|(_, &k)| k)
            .map(|(r, _)| r.clone())
            .collect()
    }

    pub fn concat(parts: impl IntoIterator<Item = Self>) -> Self {
        parts.into_iter().flat_map(|f| f.readings).collect()
    }
}

impl FromIterator<Reading> for Frame {
    fn from_iter<I: IntoIterator<Item = Reading>>(iter: I) -> Self {
        Self {
            readings: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Frame {
    type Item = Reading;
    type IntoIter = std::vec::IntoIter<Reading>;

    fn into_iter(self) -> Self::IntoIter {
        self.readings.into_iter()
    }
}

impl<'a> IntoIterator for &'a Frame {
    type Item = &'a Reading;
    type IntoIter = std::slice::Iter<'a, Reading>;

    fn into_iter(self) -> Self::IntoIter {
        self.readings.iter()
    }
}
