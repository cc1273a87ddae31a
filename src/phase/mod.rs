//! Phase Aligner - labels every reading with a fermentation phase
//!
//! Each row is compared against the peak of its (strain, style) profile:
//! the ratio `value / peak` is bucketed by the ratio breakpoints
//! (default 0.1 / 0.5 / 0.9). Rows whose key has no profile fall back to
//! absolute breakpoints on the primary channel (default 500 / 1000 / 1500 ppm).
//!
//! Profiles come from an explicit [`GoldenProfileStore`] when one is given,
//! otherwise from the reference data seen at fit.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::preprocessing::{Estimator, PreprocessError};
use crate::profiles::GoldenProfileStore;
use crate::stats;
use crate::types::{channels, Frame, PhaseLabel, Reading, StageReport, DEFAULT_PROFILE_KEY};

type ProfileKey = (String, String);

/// Primary-channel summary of one profile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileLevel {
    pub mean: f64,
    pub peak: f64,
}

/// Where the fitted profile levels came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileSource {
    GoldenStore,
    ReferenceMetadata,
    ReferenceDefault,
}

impl ProfileSource {
    fn as_str(self) -> &'static str {
        match self {
            Self::GoldenStore => "golden_store",
            Self::ReferenceMetadata => "reference_metadata",
            Self::ReferenceDefault => "reference_default",
        }
    }
}

#[derive(Debug, Clone)]
struct AlignerFit {
    levels: BTreeMap<ProfileKey, ProfileLevel>,
    source: ProfileSource,
}

#[derive(Debug)]
pub struct PhaseAligner {
    primary_channel: String,
    ratio_breakpoints: [f64; 3],
    absolute_breakpoints: [f64; 3],
    store: Option<GoldenProfileStore>,
    fitted: Option<AlignerFit>,
    /// Rows labelled through the absolute fallback in the last transform
    fallback_rows: AtomicUsize,
}

impl Default for PhaseAligner {
    fn default() -> Self {
        Self {
            primary_channel: channels::CO2.to_string(),
            ratio_breakpoints: [0.1, 0.5, 0.9],
            absolute_breakpoints: [500.0, 1000.0, 1500.0],
            store: None,
            fitted: None,
            fallback_rows: AtomicUsize::new(0),
        }
    }
}

fn default_key() -> ProfileKey {
    (DEFAULT_PROFILE_KEY.0.to_string(), DEFAULT_PROFILE_KEY.1.to_string())
}

fn row_key(row: &Reading) -> ProfileKey {
    row.profile_key()
        .map_or_else(default_key, |(strain, style)| (strain.to_string(), style.to_string()))
}

impl PhaseAligner {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            primary_channel: config.run.primary_channel.clone(),
            ratio_breakpoints: config.phase.ratio_breakpoints,
            absolute_breakpoints: config.phase.absolute_breakpoints,
            ..Self::default()
        }
    }

    /// Use golden profiles instead of deriving levels from reference data
    #[must_use]
    pub fn with_profiles(mut self, store: GoldenProfileStore) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_primary_channel(mut self, channel: &str) -> Self {
        self.primary_channel = channel.to_string();
        self
    }

    pub fn level(&self, strain: &str, style: &str) -> Option<ProfileLevel> {
        self.fitted
            .as_ref()
            .and_then(|f| f.levels.get(&(strain.to_string(), style.to_string())).copied())
    }

    pub fn fallback_rows(&self) -> usize {
        self.fallback_rows.load(Ordering::Relaxed)
    }

    /// Label a single value against a profile level
    pub fn label_with_profile(&self, value: Option<f64>, level: ProfileLevel) -> PhaseLabel {
        let Some(value) = value else {
            return PhaseLabel::Unknown;
        };
        let ratio = if value <= 0.0 {
            value
        } else if level.peak <= 0.0 || !level.peak.is_finite() {
            return PhaseLabel::Unknown;
        } else {
            value / level.peak
        };
        PhaseLabel::from_breakpoints(ratio, &self.ratio_breakpoints)
    }

    /// Label a single value with the absolute breakpoints
    pub fn label_absolute(&self, value: Option<f64>) -> PhaseLabel {
        value.map_or(PhaseLabel::Unknown, |v| {
            PhaseLabel::from_breakpoints(v, &self.absolute_breakpoints)
        })
    }

    fn levels_from_reference(&self, data: &Frame) -> (BTreeMap<ProfileKey, ProfileLevel>, ProfileSource) {
        let has_metadata = data.iter().any(|r| r.profile_key().is_some());
        let mut grouped: BTreeMap<ProfileKey, Vec<f64>> = BTreeMap::new();
        for row in data {
            let key = if has_metadata { row_key(row) } else { default_key() };
            if let Some(v) = row.value(&self.primary_channel) {
                grouped.entry(key).or_default().push(v);
            }
        }

        let levels = grouped
            .into_iter()
            .filter_map(|(key, values)| {
                let mean = stats::mean(&values)?;
                let peak = values.iter().copied().reduce(f64::max)?;
                Some((key, ProfileLevel { mean, peak }))
            })
            .collect();
        let source = if has_metadata {
            ProfileSource::ReferenceMetadata
        } else {
            ProfileSource::ReferenceDefault
        };
        (levels, source)
    }
}

impl Estimator for PhaseAligner {
    fn name(&self) -> &str {
        "phase_aligner"
    }

    fn fit(&mut self, data: &Frame) -> Result<(), PreprocessError> {
        let (levels, source) = match &self.store {
            Some(store) => {
                let levels = store
                    .iter()
                    .filter_map(|p| {
                        let curve = p.co2_curve();
                        Some((
                            (p.strain.clone(), p.style.clone()),
                            ProfileLevel {
                                mean: stats::mean(&curve)?,
                                peak: p.peak_co2()?,
                            },
                        ))
                    })
                    .collect();
                (levels, ProfileSource::GoldenStore)
            }
            None => self.levels_from_reference(data),
        };

        if levels.is_empty() {
            warn!(channel = %self.primary_channel, "No profile levels available, every row will use absolute breakpoints");
        }
        info!(profiles = levels.len(), source = source.as_str(), "Phase aligner fitted");
        self.fitted = Some(AlignerFit { levels, source });
        Ok(())
    }

    fn transform(&self, data: &Frame) -> Result<Frame, PreprocessError> {
        let fit = self
            .fitted
            .as_ref()
            .ok_or_else(|| PreprocessError::NotFitted(self.name().to_string()))?;

        let mut out = data.clone();
        let mut fallback = 0usize;
        for row in out.readings_mut() {
            let value = row.value(&self.primary_channel);
            let label = match fit.levels.get(&row_key(row)) {
                Some(level) => self.label_with_profile(value, *level),
                None => {
                    fallback += 1;
                    self.label_absolute(value)
                }
            };
            row.phase = Some(label);
        }

        if fallback > 0 {
            debug!(rows = fallback, "Rows labelled with absolute breakpoints");
        }
        self.fallback_rows.store(fallback, Ordering::Relaxed);
        Ok(out)
    }

    fn report(&self) -> StageReport {
        let mut report = StageReport::new(self.name(), "peak_ratio")
            .with_param("primary_channel", self.primary_channel.as_str())
            .with_param("ratio_breakpoints", serde_json::json!(self.ratio_breakpoints))
            .with_param("absolute_breakpoints", serde_json::json!(self.absolute_breakpoints))
            .with_count("fallback_rows", self.fallback_rows());
        if let Some(fit) = &self.fitted {
            report = report
                .with_param("profile_source", fit.source.as_str())
                .with_count("profiles", fit.levels.len());
        }
        report
    }
}
