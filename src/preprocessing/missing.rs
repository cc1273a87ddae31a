//! Missing-value imputation
//!
//! Per channel, per group (rows in timestamp order):
//! 1. linear interpolation across interior gaps, capped at `limit` samples per run,
//!    with trailing gaps held at the last valid value up to the same cap
//! 2. forward-fill capped at `limit`
//! 3. unbounded backward-fill, for every method, so leading gaps take the first valid value
//! 4. catch-all unbounded forward-fill; whatever is left is logged as residual

use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::{Estimator, PreprocessError};
use crate::config::{EngineConfig, ImputeMethod};
use crate::types::{Frame, StageReport};

#[derive(Debug, Clone, Default)]
struct ImputerFit {
    rows: usize,
    missing: BTreeMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct MissingValueImputer {
    method: ImputeMethod,
    limit: usize,
    fitted: Option<ImputerFit>,
}

impl Default for MissingValueImputer {
    fn default() -> Self {
        Self::new(ImputeMethod::Both, 3)
    }
}

impl MissingValueImputer {
    pub fn new(method: ImputeMethod, limit: usize) -> Self {
        Self {
            method,
            limit: limit.max(1),
            fitted: None,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let c = &config.preprocessing.imputer;
        Self::new(c.method, c.limit)
    }

    /// Missing counts per channel seen at fit
    pub fn missing_counts(&self) -> Option<&BTreeMap<String, usize>> {
        self.fitted.as_ref().map(|f| &f.missing)
    }

    /// Fill one ordered series according to the configured method
    pub fn fill_series(&self, values: &[Option<f64>]) -> Vec<Option<f64>> {
        let mut out = values.to_vec();
        if matches!(self.method, ImputeMethod::Interpolate | ImputeMethod::Both) {
            interpolate_limited(&mut out, self.limit);
        }
        if matches!(self.method, ImputeMethod::ForwardFill | ImputeMethod::Both) {
            forward_fill(&mut out, Some(self.limit));
        }
        backward_fill(&mut out);
        forward_fill(&mut out, None);
        out
    }
}

impl Estimator for MissingValueImputer {
    fn name(&self) -> &str {
        "imputer"
    }

    fn fit(&mut self, data: &Frame) -> Result<(), PreprocessError> {
        let missing: BTreeMap<String, usize> = data
            .channel_names()
            .into_iter()
            .map(|ch| {
                let n = data.column(&ch).iter().filter(|v| v.is_none()).count();
                (ch, n)
            })
            .collect();
        debug!(rows = data.len(), channels = missing.len(), "Imputer fitted");
        self.fitted = Some(ImputerFit {
            rows: data.len(),
            missing,
        });
        Ok(())
    }

    fn transform(&self, data: &Frame) -> Result<Frame, PreprocessError> {
        if self.fitted.is_none() {
            return Err(PreprocessError::NotFitted(self.name().to_string()));
        }

        let mut out = data.clone();
        let channels = data.channel_names();
        for (_, rows) in data.group_indices() {
            let mut ordered = rows;
            ordered.sort_by_key(|&i| data.readings()[i].timestamp);

            for ch in &channels {
                let series: Vec<Option<f64>> =
                    ordered.iter().map(|&i| data.readings()[i].value(ch)).collect();
                let filled = self.fill_series(&series);
                for (&row, value) in ordered.iter().zip(filled) {
                    out.readings_mut()[row].set_value(ch, value);
                }
            }
        }

        for ch in &channels {
            let residual = out.column(ch).iter().filter(|v| v.is_none()).count();
            if residual > 0 {
                warn!(channel = %ch, residual, "Channel still has missing values after imputation");
            }
        }
        Ok(out)
    }

    fn report(&self) -> StageReport {
        let mut report = StageReport::new(self.name(), self.method.as_str())
            .with_param("limit", self.limit);
        if let Some(fit) = &self.fitted {
            let pct: serde_json::Map<String, serde_json::Value> = fit
                .missing
                .iter()
                .map(|(ch, &n)| {
                    let p = if fit.rows == 0 { 0.0 } else { n as f64 * 100.0 / fit.rows as f64 };
                    (ch.clone(), serde_json::json!(p))
                })
                .collect();
            report = report.with_param("missing_pct", serde_json::Value::Object(pct));
            for (ch, &n) in &fit.missing {
                report = report.with_count(&format!("{ch}_missing"), n);
            }
        }
        report
    }
}

/// Linear interpolation over interior gaps, filling at most `limit` samples
/// of each run; trailing runs hold the last valid value for `limit` samples.
/// Leading runs are left alone.
fn interpolate_limited(values: &mut [Option<f64>], limit: usize) {
    let Some(first_valid) = values.iter().position(Option::is_some) else {
        return;
    };

    let mut prev_idx = first_valid;
    let mut i = first_valid + 1;
    while i < values.len() {
        if values[i].is_some() {
            prev_idx = i;
            i += 1;
            continue;
        }
        let run_start = i;
        while i < values.len() && values[i].is_none() {
            i += 1;
        }
        let (Some(left), next) = (values[prev_idx], values.get(i).copied().flatten()) else {
            continue;
        };
        let fill_end = (run_start + limit).min(i);
        for j in run_start..fill_end {
            values[j] = Some(match next {
                Some(right) => {
                    let frac = (j - prev_idx) as f64 / (i - prev_idx) as f64;
                    left + (right - left) * frac
                }
                None => left,
            });
        }
    }
}

/// Forward-fill; `limit` caps how many consecutive gaps one value may cover
fn forward_fill(values: &mut [Option<f64>], limit: Option<usize>) {
    let mut last: Option<f64> = None;
    let mut streak = 0usize;
    for v in values.iter_mut() {
        match v {
            Some(x) => {
                last = Some(*x);
                streak = 0;
            }
            None => {
                streak += 1;
                if limit.map_or(true, |l| streak <= l) {
                    *v = last;
                }
            }
        }
    }
}

fn backward_fill(values: &mut [Option<f64>]) {
    let mut next: Option<f64> = None;
    for v in values.iter_mut().rev() {
        match v {
            Some(x) => next = Some(*x),
            None => *v = next,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{channels, Reading};
    use chrono::{TimeZone, Utc};

    fn frame_of(values: &[Option<f64>]) -> Frame {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let r = Reading::new(Utc.timestamp_opt(i as i64 * 300, 0).unwrap());
                match v {
                    Some(x) => r.with_channel(channels::CO2, *x),
                    None => r.with_missing(channels::CO2),
                }
            })
            .collect()
    }

    #[test]
    fn test_noop_on_complete_data() {
        let data = frame_of(&[Some(1.0), Some(2.0), Some(3.0)]);
        let mut imputer = MissingValueImputer::default();
        let out = imputer.fit_transform(&data).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_interior_gap_interpolated() {
        let imputer = MissingValueImputer::new(ImputeMethod::Interpolate, 3);
        let out = imputer.fill_series(&[Some(0.0), None, None, Some(3.0)]);
        assert_eq!(out, vec![Some(0.0), Some(1.0), Some(2.0), Some(3.0)]);
    }

    #[test]
    fn test_interpolation_respects_limit() {
        let mut values = vec![Some(0.0), None, None, None, None, Some(5.0)];
        interpolate_limited(&mut values, 2);
        assert_eq!(values[1], Some(1.0));
        assert_eq!(values[2], Some(2.0));
        assert_eq!(values[3], None);
        assert_eq!(values[4], None);
    }

    #[test]
    fn test_leading_gap_backfilled_with_both() {
        let imputer = MissingValueImputer::default();
        let out = imputer.fill_series(&[None, None, Some(4.0), Some(5.0)]);
        assert_eq!(out, vec![Some(4.0), Some(4.0), Some(4.0), Some(5.0)]);
    }

    #[test]
    fn test_leading_gap_backfilled_with_interpolate() {
        let imputer = MissingValueImputer::new(ImputeMethod::Interpolate, 3);
        let out = imputer.fill_series(&[None, Some(2.0), Some(3.0)]);
        assert_eq!(out, vec![Some(2.0), Some(2.0), Some(3.0)]);
    }

    #[test]
    fn test_no_residual_gaps_for_any_method() {
        let series = [None, None, Some(1.0), None, None, None, None, None, Some(8.0), None, None, None, None, None];
        for method in [ImputeMethod::Interpolate, ImputeMethod::ForwardFill, ImputeMethod::Both] {
            let out = MissingValueImputer::new(method, 2).fill_series(&series);
            assert!(out.iter().all(Option::is_some), "{method:?} left gaps: {out:?}");
            assert_eq!(out[0], Some(1.0), "{method:?}");
        }
    }

    #[test]
    fn test_no_residual_gaps_after_transform() {
        let data = frame_of(&[None, Some(10.0), None, None, None, None, Some(20.0), None]);
        for method in [ImputeMethod::Interpolate, ImputeMethod::ForwardFill, ImputeMethod::Both] {
            let mut imputer = MissingValueImputer::new(method, 1);
            let out = imputer.fit_transform(&data).unwrap();
            assert!(out.column(channels::CO2).iter().all(Option::is_some), "{method:?}");
        }
    }

    #[test]
    fn test_trailing_gap_held_at_last_value() {
        let imputer = MissingValueImputer::new(ImputeMethod::Interpolate, 3);
        let out = imputer.fill_series(&[Some(1.0), Some(2.0), None, None]);
        assert_eq!(out, vec![Some(1.0), Some(2.0), Some(2.0), Some(2.0)]);
    }

    #[test]
    fn test_all_missing_channel_stays_missing() {
        let imputer = MissingValueImputer::default();
        let out = imputer.fill_series(&[None, None, None]);
        assert!(out.iter().all(Option::is_none));
    }

    #[test]
    fn test_groups_do_not_bleed() {
        let t = |m: i64| Utc.timestamp_opt(m * 60, 0).unwrap();
        let data: Frame = vec![
            Reading::new(t(0)).with_group("A").with_channel(channels::CO2, 10.0),
            Reading::new(t(0)).with_group("B").with_missing(channels::CO2),
            Reading::new(t(1)).with_group("B").with_channel(channels::CO2, 99.0),
        ]
        .into_iter()
        .collect();

        let mut imputer = MissingValueImputer::default();
        let out = imputer.fit_transform(&data).unwrap();
        assert_eq!(out.readings()[1].value(channels::CO2), Some(99.0));
    }

    #[test]
    fn test_transform_before_fit_errors() {
        let imputer = MissingValueImputer::default();
        let err = imputer.transform(&frame_of(&[Some(1.0)])).unwrap_err();
        assert!(matches!(err, PreprocessError::NotFitted(_)));
    }

    #[test]
    fn test_fit_records_missing_counts() {
        let data = frame_of(&[Some(1.0), None, None, Some(4.0)]);
        let mut imputer = MissingValueImputer::default();
        imputer.fit(&data).unwrap();
        assert_eq!(imputer.report().count("co2_ppm_missing"), 2);
    }
}
