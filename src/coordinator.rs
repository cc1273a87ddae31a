//! Analysis Coordinator - one full pass over a batch of readings
//!
//! ```text
//! STEP 1: Schema mapping (telemetry names -> canonical channels)
//! STEP 2: Validation (reported, never fatal)
//! STEP 3: Preprocessing pipeline (impute, bound, resample, scale, phase)
//! STEP 4: Changepoints per group
//! STEP 5: Anomaly detection + timeline
//! STEP 6: Batch analytics
//! ```
//!
//! Analytics run on the cleaned frame, so they reflect imputed and resampled
//! values in whatever units the scaler leaves behind.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::analytics::BatchAnalytics;
use crate::anomaly::{AnomalyEngine, AnomalySummary};
use crate::changepoint::{ChangepointDetector, PhaseBoundaries};
use crate::config::EngineConfig;
use crate::preprocessing::{Pipeline, SchemaMapper};
use crate::profiles::{GoldenProfileStore, ProfileError};
use crate::types::{AnomalyRecord, Frame, PhaseLabel, StageReport};
use crate::validation::{DataValidator, ValidationResult};

/// Changepoints found in one group's series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupChangepoints {
    pub group: Option<String>,
    #[serde(flatten)]
    pub result: PhaseBoundaries,
}

/// Everything one run produces, ready for JSON output
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub run: String,
    pub generated_at: DateTime<Utc>,
    pub rows_in: usize,
    pub rows_out: usize,
    pub schema: StageReport,
    pub validation: ValidationResult,
    pub stages: Vec<StageReport>,
    pub phase_counts: BTreeMap<PhaseLabel, usize>,
    pub changepoints: Vec<GroupChangepoints>,
    pub anomaly_summary: AnomalySummary,
    pub detectors: Vec<StageReport>,
    /// Merged anomalies ordered by time
    pub timeline: Vec<AnomalyRecord>,
    pub analytics: BatchAnalytics,
}

pub struct AnalysisCoordinator {
    config: EngineConfig,
    profiles: GoldenProfileStore,
    mapper: SchemaMapper,
    validator: DataValidator,
    pipeline: Pipeline,
    changepoints: ChangepointDetector,
    anomalies: AnomalyEngine,
    cleaned: Frame,
    runs: u64,
}

impl AnalysisCoordinator {
    /// Build every stage from config; profiles are loaded or synthesized
    pub fn new(config: &EngineConfig) -> Result<Self, ProfileError> {
        let profiles = GoldenProfileStore::from_config(config)?;
        Ok(Self::with_profiles(config, profiles))
    }

    pub fn with_profiles(config: &EngineConfig, profiles: GoldenProfileStore) -> Self {
        info!(run = %config.run.name, profiles = profiles.len(), "Initializing analysis coordinator");
        Self {
            pipeline: Pipeline::standard(config, Some(&profiles)),
            validator: DataValidator::from_config(config),
            changepoints: ChangepointDetector::from_config(config),
            anomalies: AnomalyEngine::from_config(config),
            mapper: SchemaMapper::new(),
            config: config.clone(),
            profiles,
            cleaned: Frame::default(),
            runs: 0,
        }
    }

    pub fn profiles(&self) -> &GoldenProfileStore {
        &self.profiles
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn validator(&self) -> &DataValidator {
        &self.validator
    }

    /// Cleaned frame from the last run
    pub fn cleaned(&self) -> &Frame {
        &self.cleaned
    }

    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// Map and validate only
    pub fn validate(&mut self, raw: &Frame) -> ValidationResult {
        let (mapped, _) = self.mapper.to_canonical(raw);
        self.validator.validate(&mapped)
    }

    /// Run every step over `raw`, refitting the pipeline on it
    pub fn analyze(&mut self, raw: &Frame) -> AnalysisReport {
        self.runs += 1;

        let (mapped, schema) = self.mapper.to_canonical(raw);

        let validation = self.validator.validate(&mapped);
        if !validation.passed {
            warn!(failed = validation.errors.len(), "Input failed validation, continuing");
        }

        self.cleaned = self.pipeline.fit_transform(&mapped);
        let cleaned = &self.cleaned;

        let mut phase_counts = BTreeMap::new();
        for r in cleaned {
            if let Some(p) = r.phase {
                *phase_counts.entry(p).or_insert(0) += 1;
            }
        }

        let changepoints: Vec<GroupChangepoints> = cleaned
            .series()
            .into_iter()
            .map(|(group, series)| GroupChangepoints {
                result: self.changepoints.detect_phase_boundaries(&series),
                group,
            })
            .collect();

        self.anomalies.detect_all(cleaned, Some(&self.profiles));
        let analytics = BatchAnalytics::compute(cleaned);

        let report = AnalysisReport {
            run: self.config.run.name.clone(),
            generated_at: Utc::now(),
            rows_in: raw.len(),
            rows_out: cleaned.len(),
            schema,
            validation,
            stages: self.pipeline.reports().to_vec(),
            phase_counts,
            changepoints,
            anomaly_summary: self.anomalies.summary(),
            detectors: self.anomalies.reports().to_vec(),
            timeline: self.anomalies.timeline().to_vec(),
            analytics,
        };

        info!(
            run = self.runs,
            rows_in = report.rows_in,
            rows_out = report.rows_out,
            anomalies = report.timeline.len(),
            changepoints = report.changepoints.iter().map(|c| c.result.changepoint_count).sum::<usize>(),
            "Analysis complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::ProfileSynthesis;
    use crate::types::{channels, Reading};
    use chrono::TimeZone;

    fn small_store() -> GoldenProfileStore {
        let synthesis = ProfileSynthesis { duration_hours: 12.0, ..ProfileSynthesis::default() };
        GoldenProfileStore::with_defaults(&synthesis).unwrap()
    }

    #[test]
    fn test_analyze_labels_every_row() {
        let raw: Frame = (0..48)
            .map(|i| {
                Reading::new(Utc.timestamp_opt(i * 300, 0).unwrap())
                    .with_group("T1")
                    .with_channel("co2_lpm", 50.0 + i as f64 * 20.0)
                    .with_channel("pressure_bar", 1.1)
                    .with_channel("do_ppm", 8.0)
                    .with_channel("temp_c", 18.0)
            })
            .collect();

        let mut coordinator = AnalysisCoordinator::with_profiles(&EngineConfig::default(), small_store());
        let report = coordinator.analyze(&raw);

        assert_eq!(report.rows_in, 48);
        assert_eq!(report.rows_out, coordinator.cleaned().len());
        assert_eq!(report.phase_counts.values().sum::<usize>(), report.rows_out);
        assert!(coordinator.cleaned().has_channel(channels::PRESSURE));
        assert_eq!(report.changepoints.len(), 1);
        assert_eq!(report.analytics.batches.len(), 1);
        assert_eq!(coordinator.runs(), 1);
    }
}
