//! Channel scaling, globally or per group

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

use super::{present, Estimator, PreprocessError};
use crate::config::{EngineConfig, ScaleMethod};
use crate::stats::{self, EPSILON};
use crate::types::{Frame, StageReport};

/// `(x - center) / (scale + 1e-10)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelScale {
    pub center: f64,
    pub scale: f64,
}

impl ChannelScale {
    pub fn apply(&self, value: f64) -> f64 {
        (value - self.center) / (self.scale + EPSILON)
    }
}

type ScaleTable = BTreeMap<String, ChannelScale>;

#[derive(Debug, Clone, Default)]
struct ScalerFit {
    global: ScaleTable,
    groups: BTreeMap<String, ScaleTable>,
    per_group: bool,
}

#[derive(Debug)]
pub struct Scaler {
    method: ScaleMethod,
    per_group: bool,
    fitted: Option<ScalerFit>,
    /// Rows left unscaled by the last per-group transform
    unscaled_rows: AtomicUsize,
}

impl Default for Scaler {
    fn default() -> Self {
        Self::new(ScaleMethod::Standard, false)
    }
}

impl Scaler {
    pub fn new(method: ScaleMethod, per_group: bool) -> Self {
        Self {
            method,
            per_group,
            fitted: None,
            unscaled_rows: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let c = &config.preprocessing.scaler;
        Self::new(c.method, c.per_group)
    }

    fn fit_table(&self, data: &Frame) -> ScaleTable {
        data.channel_names()
            .into_iter()
            .filter_map(|ch| {
                let values = present(&data.column(&ch));
                let scale = match self.method {
                    ScaleMethod::Standard => ChannelScale {
                        center: stats::mean(&values)?,
                        scale: stats::population_std(&values)?,
                    },
                    ScaleMethod::Minmax => {
                        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                        if !min.is_finite() {
                            return None;
                        }
                        ChannelScale { center: min, scale: max - min }
                    }
                    ScaleMethod::Robust => {
                        let q1 = stats::quantile(&values, 0.25)?;
                        let q3 = stats::quantile(&values, 0.75)?;
                        ChannelScale {
                            center: stats::median(&values)?,
                            scale: q3 - q1,
                        }
                    }
                };
                Some((ch, scale))
            })
            .collect()
    }

    /// Rows left unscaled by the most recent transform
    pub fn unscaled_rows(&self) -> usize {
        self.unscaled_rows.load(Ordering::Relaxed)
    }
}

fn scale_row(row: &mut crate::types::Reading, table: &ScaleTable) {
    for (ch, s) in table {
        if let Some(v) = row.value(ch) {
            row.set_value(ch, Some(s.apply(v)));
        }
    }
}

impl Estimator for Scaler {
    fn name(&self) -> &str {
        "scaler"
    }

    fn fit(&mut self, data: &Frame) -> Result<(), PreprocessError> {
        let mut fit = ScalerFit::default();
        if self.per_group && data.has_groups() {
            for (key, rows) in data.group_indices() {
                if let Some(key) = key {
                    let table = self.fit_table(&data.select(&rows));
                    fit.groups.insert(key, table);
                }
            }
            fit.per_group = true;
        } else {
            if self.per_group {
                warn!("Per-group scaling requested but no group keys present, fitting globally");
            }
            fit.global = self.fit_table(data);
        }
        info!(
            method = self.method.as_str(),
            per_group = fit.per_group,
            groups = fit.groups.len(),
            "Scaler fitted"
        );
        self.fitted = Some(fit);
        Ok(())
    }

    fn transform(&self, data: &Frame) -> Result<Frame, PreprocessError> {
        let fit = self
            .fitted
            .as_ref()
            .ok_or_else(|| PreprocessError::NotFitted(self.name().to_string()))?;

        let mut out = data.clone();
        let mut unscaled = 0usize;
        for row in out.readings_mut() {
            if !fit.per_group {
                scale_row(row, &fit.global);
                continue;
            }
            match row.group.as_ref().and_then(|g| fit.groups.get(g)) {
                Some(table) => scale_row(row, table),
                None => unscaled += 1,
            }
        }

        if unscaled > 0 {
            warn!(rows = unscaled, "Rows with unseen or missing group left unscaled");
        }
        self.unscaled_rows.store(unscaled, Ordering::Relaxed);
        Ok(out)
    }

    fn report(&self) -> StageReport {
        let mut report = StageReport::new(self.name(), self.method.as_str())
            .with_param("per_group", self.per_group)
            .with_count("unscaled_rows", self.unscaled_rows());
        if let Some(fit) = &self.fitted {
            report = report
                .with_param("fitted_per_group", fit.per_group)
                .with_count("groups", fit.groups.len());
            if !fit.per_group {
                report = report.with_param("scales", serde_json::json!(fit.global));
            }
        }
        report
    }
}
