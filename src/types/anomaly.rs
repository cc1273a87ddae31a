//! Anomaly records emitted by the detection engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity ranking for an anomaly record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rule produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Primary channel flat-lined below its usual level
    StuckFermentation,
    /// Sudden jump on the secondary gas channel
    OxidationRisk,
    /// Channel above its configured maximum
    HighRange,
    /// Channel below its configured minimum
    LowRange,
    /// Whole-series shape disagrees with the golden profile
    AbnormalPattern,
    /// Per-row rate of change outside the usual band (no profile available)
    AbnormalActivity,
}

/// Detector-specific evidence attached to a record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Rolling mean of the first difference
    Rate { value: f64 },
    /// How far a difference sits beyond its threshold
    Deviation { score: f64, threshold: f64 },
    /// Cosine similarity against a reference curve
    Similarity { score: f64 },
    /// Configured range that was breached
    Bounds { min: f64, max: f64 },
}

/// A single detected anomaly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub timestamp: DateTime<Utc>,
    pub group: Option<String>,
    pub kind: AnomalyKind,
    /// Public label, e.g. `stuck_fermentation`, `high_pressure`, `abnormal_co2_pattern`
    pub label: String,
    pub severity: Severity,
    pub channel: String,
    pub value: Option<f64>,
    pub diagnostic: Option<Diagnostic>,
    /// Last timestamp covered, for aggregate whole-series records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
}

impl AnomalyRecord {
    pub fn new(
        timestamp: DateTime<Utc>,
        group: Option<String>,
        kind: AnomalyKind,
        severity: Severity,
        channel: &str,
    ) -> Self {
        Self {
            timestamp,
            group,
            kind,
            label: default_label(kind, channel),
            severity,
            channel: channel.to_string(),
            value: None,
            diagnostic: None,
            ends_at: None,
        }
    }

    #[must_use]
    pub fn with_value(mut self, value: Option<f64>) -> Self {
        self.value = value;
        self
    }

    #[must_use]
    pub fn with_diagnostic(mut self, diagnostic: Diagnostic) -> Self {
        self.diagnostic = Some(diagnostic);
        self
    }

    #[must_use]
    pub fn spanning_until(mut self, end: DateTime<Utc>) -> Self {
        self.ends_at = Some(end);
        self
    }

    /// Key used to deduplicate records across detectors
    pub fn dedup_key(&self) -> (Option<&str>, DateTime<Utc>) {
        (self.group.as_deref(), self.timestamp)
    }
}

/// Strip a trailing unit suffix: `pressure_kpa` -> `pressure`, `co2_ppm` -> `co2`
pub fn channel_stem(channel: &str) -> &str {
    const UNITS: [&str; 6] = ["_kpa", "_ppm", "_pct", "_c", "_rpm", "_state"];
    UNITS
        .iter()
        .find_map(|unit| channel.strip_suffix(unit))
        .unwrap_or(channel)
}

fn default_label(kind: AnomalyKind, channel: &str) -> String {
    let stem = channel_stem(channel);
    match kind {
        AnomalyKind::StuckFermentation => "stuck_fermentation".to_string(),
        AnomalyKind::OxidationRisk => "oxidation_risk".to_string(),
        AnomalyKind::HighRange => format!("high_{stem}"),
        AnomalyKind::LowRange => format!("low_{stem}"),
        AnomalyKind::AbnormalPattern => format!("abnormal_{stem}_pattern"),
        AnomalyKind::AbnormalActivity => format!("abnormal_{stem}_activity"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_labels_follow_channel_stem() {
        let ts = Utc.timestamp_opt(0, 0).unwrap();
        let high = AnomalyRecord::new(ts, None, AnomalyKind::HighRange, Severity::High, "pressure_kpa");
        assert_eq!(high.label, "high_pressure");

        let pattern = AnomalyRecord::new(ts, None, AnomalyKind::AbnormalPattern, Severity::Medium, "co2_ppm");
        assert_eq!(pattern.label, "abnormal_co2_pattern");

        let activity = AnomalyRecord::new(ts, None, AnomalyKind::AbnormalActivity, Severity::Medium, "co2_ppm");
        assert_eq!(activity.label, "abnormal_co2_activity");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }
}
