//! Ordered composition of preprocessing stages

use tracing::{info, warn};

use super::{Estimator, MissingValueImputer, OutlierBounder, Resampler, Scaler};
use crate::config::EngineConfig;
use crate::phase::PhaseAligner;
use crate::profiles::GoldenProfileStore;
use crate::types::{Frame, StageReport, StageStatus};

/// Runs stages in order, each fitted on the previous stage's output.
///
/// A stage that fails is reported as `failed`, its input passes through
/// unchanged, and the run continues.
#[derive(Default)]
pub struct Pipeline {
    steps: Vec<Box<dyn Estimator>>,
    /// Stages whose fit failed; skipped at transform
    failed: Vec<bool>,
    reports: Vec<StageReport>,
    fitted: bool,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("steps", &self.step_names())
            .field("fitted", &self.fitted)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Imputer → outlier bounder → resampler → scaler → phase aligner,
    /// with the resampler and scaler included per config
    pub fn standard(config: &EngineConfig, profiles: Option<&GoldenProfileStore>) -> Self {
        let pre = &config.preprocessing;
        let mut pipeline = Self::new()
            .with_step(Box::new(MissingValueImputer::from_config(config)))
            .with_step(Box::new(OutlierBounder::from_config(config)));
        if pre.resample.enabled {
            pipeline = pipeline.with_step(Box::new(Resampler::from_config(config)));
        }
        if pre.scaler.enabled {
            pipeline = pipeline.with_step(Box::new(Scaler::from_config(config)));
        }

        let aligner = PhaseAligner::from_config(config);
        let aligner = match profiles {
            Some(store) => aligner.with_profiles(store.clone()),
            None => aligner,
        };
        pipeline.with_step(Box::new(aligner))
    }

    #[must_use]
    pub fn with_step(mut self, step: Box<dyn Estimator>) -> Self {
        self.push_step(step);
        self
    }

    pub fn push_step(&mut self, step: Box<dyn Estimator>) {
        self.steps.push(step);
        self.failed.push(false);
        self.fitted = false;
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Reports from the most recent fit
    pub fn reports(&self) -> &[StageReport] {
        &self.reports
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    /// Fit every stage on the output of the one before it
    pub fn fit(&mut self, data: &Frame) -> &mut Self {
        self.reports.clear();
        let mut current = data.clone();

        for (step, failed) in self.steps.iter_mut().zip(self.failed.iter_mut()) {
            let outcome = step.fit(&current).and_then(|()| step.transform(&current));
            let (next, status) = match outcome {
                Ok(next) => (next, StageStatus::Ok),
                Err(e) => {
                    warn!(stage = step.name(), error = %e, "Stage failed, passing input through");
                    (current.clone(), StageStatus::Failed(e.to_string()))
                }
            };
            *failed = !status.is_ok();
            self.reports
                .push(with_flow_counts(step.report(), &current, &next).with_status(status));
            current = next;
        }

        self.fitted = true;
        info!(
            stages = self.steps.len(),
            failed = self.failed.iter().filter(|f| **f).count(),
            rows_in = data.len(),
            rows_out = current.len(),
            "Pipeline fitted"
        );
        self
    }

    /// Apply fitted stages in order. Stages that failed at fit are skipped;
    /// a stage that fails here passes its input through.
    pub fn transform(&self, data: &Frame) -> Frame {
        self.transform_with_reports(data).0
    }

    /// `transform`, also returning one report per stage for this run
    pub fn transform_with_reports(&self, data: &Frame) -> (Frame, Vec<StageReport>) {
        let mut reports = Vec::with_capacity(self.steps.len());
        let mut current = data.clone();

        for (step, &failed_at_fit) in self.steps.iter().zip(&self.failed) {
            if !self.fitted || failed_at_fit {
                let reason = if self.fitted { "failed at fit" } else { "pipeline not fitted" };
                reports.push(step.report().with_status(StageStatus::Skipped(reason.to_string())));
                continue;
            }
            match step.transform(&current) {
                Ok(next) => {
                    reports.push(with_flow_counts(step.report(), &current, &next));
                    current = next;
                }
                Err(e) => {
                    warn!(stage = step.name(), error = %e, "Stage transform failed, passing input through");
                    reports.push(step.report().with_status(StageStatus::Failed(e.to_string())));
                }
            }
        }
        (current, reports)
    }

    pub fn fit_transform(&mut self, data: &Frame) -> Frame {
        self.fit(data);
        self.transform(data)
    }
}

fn missing_cells(frame: &Frame) -> usize {
    frame
        .iter()
        .map(|r| r.channels.values().filter(|v| v.is_none()).count())
        .sum()
}

fn with_flow_counts(report: StageReport, input: &Frame, output: &Frame) -> StageReport {
    report
        .with_count("rows_in", input.len())
        .with_count("rows_out", output.len())
        .with_count("missing_in", missing_cells(input))
        .with_count("missing_out", missing_cells(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessing::PreprocessError;
    use crate::types::{channels, Reading};
    use chrono::{TimeZone, Utc};

    struct Broken;

    impl Estimator for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn fit(&mut self, _data: &Frame) -> Result<(), PreprocessError> {
            Err(PreprocessError::InvalidParameter("window must be > 0".to_string()))
        }
        fn transform(&self, _data: &Frame) -> Result<Frame, PreprocessError> {
            Err(PreprocessError::NotFitted("broken".to_string()))
        }
        fn report(&self) -> StageReport {
            StageReport::new("broken", "none")
        }
    }

    fn sample() -> Frame {
        (0..24)
            .map(|i| {
                let r = Reading::new(Utc.timestamp_opt(1_700_000_100 + i * 300, 0).unwrap());
                if i == 5 {
                    r.with_missing(channels::CO2)
                } else {
                    r.with_channel(channels::CO2, 100.0 + i as f64 * 50.0)
                }
            })
            .collect()
    }

    #[test]
    fn test_standard_pipeline_labels_every_row() {
        let config = EngineConfig::default();
        let mut pipeline = Pipeline::standard(&config, None);
        assert_eq!(pipeline.step_names(), vec!["imputer", "outliers", "resampler", "phase_aligner"]);

        let out = pipeline.fit_transform(&sample());
        assert_eq!(out.len(), 24);
        assert!(out.iter().all(|r| r.phase.is_some()));
        assert!(out.column(channels::CO2).iter().all(Option::is_some));
        assert_eq!(pipeline.reports().len(), 4);
        assert!(pipeline.reports().iter().all(|r| r.status.is_ok()));
    }

    #[test]
    fn test_failed_stage_passes_input_through() {
        let mut pipeline = Pipeline::new()
            .with_step(Box::new(Broken))
            .with_step(Box::new(PhaseAligner::default()));
        let out = pipeline.fit_transform(&sample());

        assert!(matches!(pipeline.reports()[0].status, StageStatus::Failed(_)));
        assert!(pipeline.reports()[1].status.is_ok());
        assert_eq!(out.len(), 24);
        assert!(out.iter().all(|r| r.phase.is_some()));
    }

    #[test]
    fn test_reports_reset_on_refit() {
        let mut pipeline = Pipeline::new().with_step(Box::new(MissingValueImputer::default()));
        pipeline.fit(&sample());
        pipeline.fit(&sample());
        assert_eq!(pipeline.reports().len(), 1);
    }

    #[test]
    fn test_fit_then_transform_matches_fit_transform() {
        let config = EngineConfig::default();
        let mut a = Pipeline::standard(&config, None);
        let mut b = Pipeline::standard(&config, None);
        a.fit(&sample());
        assert_eq!(a.transform(&sample()), b.fit_transform(&sample()));
    }

    #[test]
    fn test_unfitted_transform_skips_everything() {
        let pipeline = Pipeline::new().with_step(Box::new(MissingValueImputer::default()));
        let (out, reports) = pipeline.transform_with_reports(&sample());
        assert_eq!(out, sample());
        assert!(matches!(reports[0].status, StageStatus::Skipped(_)));
        assert!(out.iter().all(|r| r.phase.is_none()));
    }
}
