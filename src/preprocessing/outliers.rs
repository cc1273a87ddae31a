//! Outlier bounding with IQR or z-score fences

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::{present, Estimator, PreprocessError};
use crate::config::{EngineConfig, OutlierMethod, OutlierPolicy};
use crate::stats;
use crate::types::{channels, Frame, StageReport};

/// Fitted fences for one channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelBounds {
    pub lower: f64,
    pub upper: f64,
}

impl ChannelBounds {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }

    pub fn clip(&self, value: f64) -> f64 {
        value.clamp(self.lower, self.upper)
    }
}

#[derive(Debug, Clone, Default)]
struct BounderFit {
    bounds: BTreeMap<String, ChannelBounds>,
    /// z-score fences, kept for reporting when method is `both`
    zscore_bounds: BTreeMap<String, ChannelBounds>,
    breaches: BTreeMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct OutlierBounder {
    method: OutlierMethod,
    policy: OutlierPolicy,
    iqr_multiplier: f64,
    z_threshold: f64,
    /// Discrete state channels carry no meaningful spread
    skip_channels: Vec<String>,
    fitted: Option<BounderFit>,
}

impl Default for OutlierBounder {
    fn default() -> Self {
        Self::new(OutlierMethod::Iqr, OutlierPolicy::Clip)
    }
}

impl OutlierBounder {
    pub fn new(method: OutlierMethod, policy: OutlierPolicy) -> Self {
        Self {
            method,
            policy,
            iqr_multiplier: 1.5,
            z_threshold: 3.0,
            skip_channels: vec![channels::VALVE_STATE.to_string()],
            fitted: None,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let c = &config.preprocessing.outliers;
        Self::new(c.method, c.policy)
            .with_iqr_multiplier(c.iqr_multiplier)
            .with_z_threshold(c.z_threshold)
    }

    #[must_use]
    pub fn with_iqr_multiplier(mut self, k: f64) -> Self {
        self.iqr_multiplier = k;
        self
    }

    #[must_use]
    pub fn with_z_threshold(mut self, k: f64) -> Self {
        self.z_threshold = k;
        self
    }

    #[must_use]
    pub fn with_skip_channels(mut self, skip: Vec<String>) -> Self {
        self.skip_channels = skip;
        self
    }

    /// Applied bounds per channel, `None` before fit
    pub fn bounds(&self) -> Option<&BTreeMap<String, ChannelBounds>> {
        self.fitted.as_ref().map(|f| &f.bounds)
    }

    fn iqr_bounds(&self, values: &[f64]) -> Option<ChannelBounds> {
        let q1 = stats::quantile(values, 0.25)?;
        let q3 = stats::quantile(values, 0.75)?;
        let iqr = q3 - q1;
        Some(ChannelBounds {
            lower: q1 - self.iqr_multiplier * iqr,
            upper: q3 + self.iqr_multiplier * iqr,
        })
    }

    fn zscore_bounds(&self, values: &[f64]) -> Option<ChannelBounds> {
        let mean = stats::mean(values)?;
        let std = stats::sample_std(values)?;
        if std <= 0.0 || !std.is_finite() {
            return None;
        }
        Some(ChannelBounds {
            lower: mean - self.z_threshold * std,
            upper: mean + self.z_threshold * std,
        })
    }

    fn breaches_row(&self, bounds: &BTreeMap<String, ChannelBounds>, row: &crate::types::Reading) -> bool {
        bounds
            .iter()
            .any(|(ch, b)| row.value(ch).is_some_and(|v| !b.contains(v)))
    }
}

impl Estimator for OutlierBounder {
    fn name(&self) -> &str {
        "outliers"
    }

    fn fit(&mut self, data: &Frame) -> Result<(), PreprocessError> {
        if !self.iqr_multiplier.is_finite() || !self.z_threshold.is_finite() {
            return Err(PreprocessError::InvalidParameter(
                "outlier multipliers must be finite".to_string(),
            ));
        }

        let mut fit = BounderFit::default();
        for ch in data.channel_names() {
            if self.skip_channels.contains(&ch) {
                continue;
            }
            let values = present(&data.column(&ch));
            let iqr = self.iqr_bounds(&values);
            let z = self.zscore_bounds(&values);

            let applied = match self.method {
                OutlierMethod::Iqr | OutlierMethod::Both => iqr,
                OutlierMethod::Zscore => z,
            };
            if let (OutlierMethod::Both, Some(z)) = (self.method, z) {
                fit.zscore_bounds.insert(ch.clone(), z);
            }
            let Some(bounds) = applied else {
                debug!(channel = %ch, "No outlier bounds for channel");
                continue;
            };

            let breaches = values.iter().filter(|&&v| !bounds.contains(v)).count();
            fit.breaches.insert(ch.clone(), breaches);
            fit.bounds.insert(ch, bounds);
        }

        info!(
            method = self.method.as_str(),
            channels = fit.bounds.len(),
            breaches = fit.breaches.values().sum::<usize>(),
            "Outlier bounds fitted"
        );
        self.fitted = Some(fit);
        Ok(())
    }

    fn transform(&self, data: &Frame) -> Result<Frame, PreprocessError> {
        let fit = self
            .fitted
            .as_ref()
            .ok_or_else(|| PreprocessError::NotFitted(self.name().to_string()))?;

        match self.policy {
            OutlierPolicy::Clip => {
                let mut out = data.clone();
                for row in out.readings_mut() {
                    for (ch, b) in &fit.bounds {
                        if let Some(v) = row.value(ch) {
                            row.set_value(ch, Some(b.clip(v)));
                        }
                    }
                }
                Ok(out)
            }
            OutlierPolicy::Drop => {
                let keep: Vec<bool> = data
                    .iter()
                    .map(|row| !self.breaches_row(&fit.bounds, row))
                    .collect();
                let out = data.filter_rows(&keep);
                debug!(dropped = data.len() - out.len(), "Outlier rows dropped");
                Ok(out)
            }
            OutlierPolicy::Mark => {
                let mut out = data.clone();
                for row in out.readings_mut() {
                    for (ch, b) in &fit.bounds {
                        let flagged = row.value(ch).is_some_and(|v| !b.contains(v));
                        row.indicators.insert(format!("{ch}_outlier"), flagged);
                    }
                }
                Ok(out)
            }
        }
    }

    fn report(&self) -> StageReport {
        let mut report = StageReport::new(self.name(), self.method.as_str())
            .with_param("policy", self.policy.as_str())
            .with_param("iqr_multiplier", self.iqr_multiplier)
            .with_param("z_threshold", self.z_threshold);
        if let Some(fit) = &self.fitted {
            report = report.with_param("bounds", serde_json::json!(fit.bounds));
            if !fit.zscore_bounds.is_empty() {
                report = report.with_param("zscore_bounds", serde_json::json!(fit.zscore_bounds));
            }
            for (ch, &n) in &fit.breaches {
                report = report.with_count(&format!("{ch}_outliers"), n);
            }
        }
        report
    }
}
