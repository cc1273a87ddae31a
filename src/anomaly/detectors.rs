//! The four anomaly rules
//!
//! Each detector works on one time-ordered series (a single group) and
//! returns records in row order. A detector whose channel is absent from the
//! series returns [`AnomalyError::MissingColumn`].

use chrono::{DateTime, Utc};

use super::AnomalyError;
use crate::analytics;
use crate::config::EngineConfig;
use crate::profiles::GoldenProfile;
use crate::stats;
use crate::types::{channels, AnomalyKind, AnomalyRecord, Diagnostic, Frame, Severity};

/// Shared interface so the engine can run rules in a fixed order
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Channel the rule reads
    fn channel(&self) -> &str;

    fn detect(
        &self,
        series: &Frame,
        group: Option<&str>,
        profile: Option<&GoldenProfile>,
    ) -> Result<Vec<AnomalyRecord>, AnomalyError>;
}

fn require_channel(series: &Frame, channel: &str) -> Result<Vec<Option<f64>>, AnomalyError> {
    if series.has_channel(channel) {
        Ok(series.column(channel))
    } else {
        Err(AnomalyError::MissingColumn(channel.to_string()))
    }
}

fn record(
    ts: DateTime<Utc>,
    group: Option<&str>,
    kind: AnomalyKind,
    severity: Severity,
    channel: &str,
) -> AnomalyRecord {
    AnomalyRecord::new(ts, group.map(str::to_string), kind, severity, channel)
}

// ============================================================================
// Stuck Fermentation
// ============================================================================

/// Primary channel stops rising while it is still in the lower part of its range.
///
/// Fires where the trailing mean of the first difference is below
/// `rate_threshold` and the value is at or below the `level_quantile` of the
/// series. The comparison is inclusive so a perfectly flat signal fires.
#[derive(Debug, Clone)]
pub struct StuckDetector {
    pub channel: String,
    pub window: usize,
    pub rate_threshold: f64,
    pub level_quantile: f64,
}

impl Default for StuckDetector {
    fn default() -> Self {
        Self {
            channel: channels::CO2.to_string(),
            window: 12,
            rate_threshold: 0.01,
            level_quantile: 0.70,
        }
    }
}

impl StuckDetector {
    pub fn from_config(config: &EngineConfig) -> Self {
        let c = &config.anomaly.stuck;
        Self {
            channel: config.run.primary_channel.clone(),
            window: c.window,
            rate_threshold: c.rate_threshold,
            level_quantile: c.level_quantile,
        }
    }
}

impl Detector for StuckDetector {
    fn name(&self) -> &'static str {
        "stuck"
    }

    fn channel(&self) -> &str {
        &self.channel
    }

    fn detect(
        &self,
        series: &Frame,
        group: Option<&str>,
        _profile: Option<&GoldenProfile>,
    ) -> Result<Vec<AnomalyRecord>, AnomalyError> {
        let values = require_channel(series, &self.channel)?;
        let present: Vec<f64> = values.iter().flatten().copied().collect();
        let Some(level) = stats::quantile(&present, self.level_quantile) else {
            return Ok(Vec::new());
        };
        let rates = stats::rolling_mean(&stats::diff_aligned(&values), self.window, 1);

        Ok(series
            .iter()
            .zip(values.iter().zip(&rates))
            .filter_map(|(row, (value, rate))| {
                let (v, r) = (value.as_ref()?, rate.as_ref()?);
                (*r < self.rate_threshold && *v <= level).then(|| {
                    record(row.timestamp, group, AnomalyKind::StuckFermentation, Severity::High, &self.channel)
                        .with_value(Some(*v))
                        .with_diagnostic(Diagnostic::Rate { value: *r })
                })
            })
            .collect())
    }
}

// ============================================================================
// Sudden Spike
// ============================================================================

/// Upward jump on a secondary channel (dissolved oxygen by default).
///
/// Fires where the signed first difference exceeds
/// `mean(|diff|) + k * std(|diff|)` (sample std).
#[derive(Debug, Clone)]
pub struct SpikeDetector {
    pub channel: String,
    pub sigma_multiplier: f64,
}

impl Default for SpikeDetector {
    fn default() -> Self {
        Self {
            channel: channels::OXYGEN.to_string(),
            sigma_multiplier: 0.5,
        }
    }
}

impl SpikeDetector {
    pub fn from_config(config: &EngineConfig) -> Self {
        let c = &config.anomaly.spike;
        Self {
            channel: c.channel.clone(),
            sigma_multiplier: c.sigma_multiplier,
        }
    }
}

impl Detector for SpikeDetector {
    fn name(&self) -> &'static str {
        "spike"
    }

    fn channel(&self) -> &str {
        &self.channel
    }

    fn detect(
        &self,
        series: &Frame,
        group: Option<&str>,
        _profile: Option<&GoldenProfile>,
    ) -> Result<Vec<AnomalyRecord>, AnomalyError> {
        let values = require_channel(series, &self.channel)?;
        let diffs = stats::diff_aligned(&values);
        let magnitudes: Vec<f64> = diffs.iter().flatten().map(|d| d.abs()).collect();
        let (Some(mean), Some(std)) = (stats::mean(&magnitudes), stats::sample_std(&magnitudes)) else {
            return Ok(Vec::new());
        };
        let threshold = mean + self.sigma_multiplier * std;

        Ok(series
            .iter()
            .zip(values.iter().zip(&diffs))
            .filter_map(|(row, (value, diff))| {
                let d = (*diff)?;
                (d > threshold).then(|| {
                    record(row.timestamp, group, AnomalyKind::OxidationRisk, Severity::Medium, &self.channel)
                        .with_value(*value)
                        .with_diagnostic(Diagnostic::Deviation { score: d, threshold })
                })
            })
            .collect())
    }
}

// ============================================================================
// Out of Range
// ============================================================================

/// Channel outside a fixed operating window; above is high severity, below medium
#[derive(Debug, Clone)]
pub struct RangeDetector {
    pub channel: String,
    pub min: f64,
    pub max: f64,
}

impl Default for RangeDetector {
    fn default() -> Self {
        Self {
            channel: channels::PRESSURE.to_string(),
            min: 80.0,
            max: 150.0,
        }
    }
}

impl RangeDetector {
    pub fn from_config(config: &EngineConfig) -> Self {
        let c = &config.anomaly.range;
        Self {
            channel: c.channel.clone(),
            min: c.min,
            max: c.max,
        }
    }
}

impl Detector for RangeDetector {
    fn name(&self) -> &'static str {
        "range"
    }

    fn channel(&self) -> &str {
        &self.channel
    }

    fn detect(
        &self,
        series: &Frame,
        group: Option<&str>,
        _profile: Option<&GoldenProfile>,
    ) -> Result<Vec<AnomalyRecord>, AnomalyError> {
        let values = require_channel(series, &self.channel)?;
        let bounds = Diagnostic::Bounds { min: self.min, max: self.max };

        // highs first, then lows
        let mut high = Vec::new();
        let mut low = Vec::new();
        for (row, value) in series.iter().zip(&values) {
            let Some(v) = *value else { continue };
            if v > self.max {
                high.push(
                    record(row.timestamp, group, AnomalyKind::HighRange, Severity::High, &self.channel)
                        .with_value(Some(v))
                        .with_diagnostic(bounds),
                );
            } else if v < self.min {
                low.push(
                    record(row.timestamp, group, AnomalyKind::LowRange, Severity::Medium, &self.channel)
                        .with_value(Some(v))
                        .with_diagnostic(bounds),
                );
            }
        }
        high.extend(low);
        Ok(high)
    }
}

// ============================================================================
// Pattern Deviation
// ============================================================================

/// Whole-series shape check against a golden curve.
///
/// With a profile: the golden primary curve is resampled to the live length
/// and compared by cosine similarity; below `1 - similarity_threshold` one
/// aggregate record spans the series. Without a profile: rows whose first
/// difference lies outside `mean ± activity_sigma * std` are flagged.
#[derive(Debug, Clone)]
pub struct PatternDetector {
    pub channel: String,
    pub similarity_threshold: f64,
    pub activity_sigma: f64,
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self {
            channel: channels::CO2.to_string(),
            similarity_threshold: 0.3,
            activity_sigma: 3.0,
        }
    }
}

impl PatternDetector {
    pub fn from_config(config: &EngineConfig) -> Self {
        let c = &config.anomaly.pattern;
        Self {
            channel: config.run.primary_channel.clone(),
            similarity_threshold: c.similarity_threshold,
            activity_sigma: c.activity_sigma,
        }
    }

    /// Cosine similarity of the live curve against the resampled golden curve;
    /// `None` when the profile has no curve for this channel
    pub fn similarity(&self, live: &[f64], profile: &GoldenProfile) -> Option<f64> {
        analytics::compare_curves(live, &profile.curve(&self.channel)?)
    }

    fn against_profile(
        &self,
        series: &Frame,
        values: &[Option<f64>],
        group: Option<&str>,
        profile: &GoldenProfile,
    ) -> Vec<AnomalyRecord> {
        let live: Vec<f64> = values.iter().flatten().copied().collect();
        let (Some(first), Some(last)) = (series.readings().first(), series.readings().last()) else {
            return Vec::new();
        };
        let Some(score) = self.similarity(&live, profile) else {
            return Vec::new();
        };
        if score >= 1.0 - self.similarity_threshold {
            return Vec::new();
        }
        vec![
            record(first.timestamp, group, AnomalyKind::AbnormalPattern, Severity::Medium, &self.channel)
                .with_diagnostic(Diagnostic::Similarity { score })
                .spanning_until(last.timestamp),
        ]
    }

    fn against_own_rate(&self, series: &Frame, values: &[Option<f64>], group: Option<&str>) -> Vec<AnomalyRecord> {
        let diffs = stats::diff_aligned(values);
        let present: Vec<f64> = diffs.iter().flatten().copied().collect();
        let (Some(mean), Some(std)) = (stats::mean(&present), stats::sample_std(&present)) else {
            return Vec::new();
        };
        let band = self.activity_sigma * std;

        series
            .iter()
            .zip(values.iter().zip(&diffs))
            .filter_map(|(row, (value, diff))| {
                let d = (*diff)?;
                ((d - mean).abs() > band).then(|| {
                    record(row.timestamp, group, AnomalyKind::AbnormalActivity, Severity::Medium, &self.channel)
                        .with_value(*value)
                        .with_diagnostic(Diagnostic::Deviation { score: (d - mean) / (std + stats::EPSILON), threshold: self.activity_sigma })
                })
            })
            .collect()
    }
}

impl Detector for PatternDetector {
    fn name(&self) -> &'static str {
        "pattern"
    }

    fn channel(&self) -> &str {
        &self.channel
    }

    fn detect(
        &self,
        series: &Frame,
        group: Option<&str>,
        profile: Option<&GoldenProfile>,
    ) -> Result<Vec<AnomalyRecord>, AnomalyError> {
        let values = require_channel(series, &self.channel)?;
        // a profile without this channel's curve counts as no profile
        let reference = profile.filter(|p| !p.is_empty() && p.curve(&self.channel).is_some());
        Ok(match reference {
            Some(p) => self.against_profile(series, &values, group, p),
            None => self.against_own_rate(series, &values, group),
        })
    }
}
