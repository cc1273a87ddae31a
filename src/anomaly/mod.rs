//! Anomaly engine
//!
//! Runs the four detectors over every group series, merges their output,
//! and keeps a time-ordered timeline of the merged records.
//!
//! ## Merge rules
//!
//! Detectors run in a fixed order: stuck, spike, range, pattern. Records are
//! concatenated in that order and deduplicated on `(group, timestamp)`; the
//! first record seen for a key wins. The timeline is a stable sort of the
//! merged records by timestamp.

pub mod detectors;

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::profiles::{GoldenProfile, GoldenProfileStore};
use crate::types::{AnomalyRecord, Frame, Severity, StageReport, StageStatus, DEFAULT_PROFILE_KEY};

pub use detectors::{Detector, PatternDetector, RangeDetector, SpikeDetector, StuckDetector};

#[derive(Debug, Error)]
pub enum AnomalyError {
    #[error("channel '{0}' not present in data")]
    MissingColumn(String),
}

/// Counts over the merged records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalySummary {
    pub total: usize,
    /// Records before deduplication
    pub raw_total: usize,
    pub by_label: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
}

pub struct AnomalyEngine {
    detectors: Vec<Box<dyn Detector>>,
    raw: Vec<AnomalyRecord>,
    merged: Vec<AnomalyRecord>,
    timeline: Vec<AnomalyRecord>,
    reports: Vec<StageReport>,
}

impl std::fmt::Debug for AnomalyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.detectors.iter().map(|d| d.name()).collect();
        f.debug_struct("AnomalyEngine")
            .field("detectors", &names)
            .field("records", &self.merged.len())
            .finish()
    }
}

impl Default for AnomalyEngine {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl AnomalyEngine {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::with_detectors(vec![
            Box::new(StuckDetector::from_config(config)),
            Box::new(SpikeDetector::from_config(config)),
            Box::new(RangeDetector::from_config(config)),
            Box::new(PatternDetector::from_config(config)),
        ])
    }

    /// Engine with a custom detector list; merge priority follows list order
    pub fn with_detectors(detectors: Vec<Box<dyn Detector>>) -> Self {
        Self {
            detectors,
            raw: Vec::new(),
            merged: Vec::new(),
            timeline: Vec::new(),
            reports: Vec::new(),
        }
    }

    /// Run every detector over every group series and merge the results.
    ///
    /// Previous results are discarded. Returns the merged records in
    /// detector order.
    pub fn detect_all(&mut self, data: &Frame, profiles: Option<&GoldenProfileStore>) -> &[AnomalyRecord] {
        self.raw.clear();
        self.reports.clear();

        let series = data.series();
        for detector in &self.detectors {
            let mut report = StageReport::new(detector.name(), detector.channel());
            if !data.has_channel(detector.channel()) {
                warn!(detector = detector.name(), channel = detector.channel(), "Detector channel absent, skipping");
                self.reports.push(report.with_status(StageStatus::Skipped(format!(
                    "channel '{}' not present",
                    detector.channel()
                ))));
                continue;
            }

            let mut found = 0;
            let mut failure = None;
            for (group, rows) in &series {
                let profile = profile_for(rows, profiles);
                match detector.detect(rows, group.as_deref(), profile) {
                    Ok(records) => {
                        found += records.len();
                        self.raw.extend(records);
                    }
                    Err(e) => {
                        debug!(detector = detector.name(), group = ?group, error = %e, "Detector skipped series");
                        failure.get_or_insert_with(|| e.to_string());
                    }
                }
            }
            report = report.with_count("anomalies", found).with_count("series", series.len());
            if let Some(reason) = failure.filter(|_| found == 0) {
                report = report.with_status(StageStatus::Skipped(reason));
            }
            self.reports.push(report);
        }

        self.merged = merge(&self.raw);
        self.timeline = self.merged.clone();
        self.timeline.sort_by_key(|r| r.timestamp);

        info!(
            raw = self.raw.len(),
            merged = self.merged.len(),
            groups = series.len(),
            "Anomaly detection complete"
        );
        &self.merged
    }

    /// Merged records in detector order
    pub fn records(&self) -> &[AnomalyRecord] {
        &self.merged
    }

    /// Every record before deduplication
    pub fn raw_records(&self) -> &[AnomalyRecord] {
        &self.raw
    }

    /// Merged records ordered by timestamp
    pub fn timeline(&self) -> &[AnomalyRecord] {
        &self.timeline
    }

    /// One report per detector from the last run
    pub fn reports(&self) -> &[StageReport] {
        &self.reports
    }

    pub fn summary(&self) -> AnomalySummary {
        let mut summary = AnomalySummary {
            total: self.merged.len(),
            raw_total: self.raw.len(),
            ..AnomalySummary::default()
        };
        for r in &self.merged {
            *summary.by_label.entry(r.label.clone()).or_insert(0) += 1;
            *summary.by_severity.entry(r.severity).or_insert(0) += 1;
        }
        summary
    }
}

/// Profile for a series: its own (strain, style) if stored, else the default
fn profile_for<'a>(series: &Frame, profiles: Option<&'a GoldenProfileStore>) -> Option<&'a GoldenProfile> {
    let store = profiles?;
    let (strain, style) = series
        .readings()
        .first()
        .and_then(|r| r.profile_key())
        .unwrap_or(DEFAULT_PROFILE_KEY);
    store
        .get(strain, style)
        .or_else(|| store.get(DEFAULT_PROFILE_KEY.0, DEFAULT_PROFILE_KEY.1))
}

/// First record per `(group, timestamp)` wins
fn merge(records: &[AnomalyRecord]) -> Vec<AnomalyRecord> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|r| seen.insert(r.dedup_key()))
        .cloned()
        .collect()
}
