//! Fixed-step resampling onto an epoch-aligned grid

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use super::{present, Estimator, PreprocessError};
use crate::config::{Aggregation, EngineConfig};
use crate::stats;
use crate::types::{Frame, Reading, StageReport};

#[derive(Debug, Clone, Default)]
struct ResampleFit {
    /// Most common spacing between consecutive samples of a series (seconds)
    modal_interval_secs: Option<i64>,
    source_rows: usize,
    buckets: usize,
}

#[derive(Debug, Clone)]
pub struct Resampler {
    interval_minutes: u32,
    aggregation: Aggregation,
    per_group: bool,
    fitted: Option<ResampleFit>,
}

impl Default for Resampler {
    fn default() -> Self {
        Self::new(5, Aggregation::Mean, true)
    }
}

impl Resampler {
    pub fn new(interval_minutes: u32, aggregation: Aggregation, per_group: bool) -> Self {
        Self {
            interval_minutes,
            aggregation,
            per_group,
            fitted: None,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let c = &config.preprocessing.resample;
        Self::new(c.interval_minutes, c.aggregation, c.per_group)
    }

    fn step_secs(&self) -> i64 {
        i64::from(self.interval_minutes) * 60
    }

    pub fn modal_interval_secs(&self) -> Option<i64> {
        self.fitted.as_ref().and_then(|f| f.modal_interval_secs)
    }

    fn bucket_start(&self, ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let step = self.step_secs();
        let floored = ts.timestamp().div_euclid(step) * step;
        DateTime::from_timestamp(floored, 0)
    }

    fn partitions(&self, data: &Frame) -> Vec<Frame> {
        if self.per_group {
            data.series().into_iter().map(|(_, s)| s).collect()
        } else {
            vec![data.sorted_by_time()]
        }
    }

    /// Resample one time-ordered series
    fn resample_series(&self, series: &Frame) -> Frame {
        let mut buckets: BTreeMap<DateTime<Utc>, Vec<&Reading>> = BTreeMap::new();
        for r in series {
            if let Some(start) = self.bucket_start(r.timestamp) {
                buckets.entry(start).or_default().push(r);
            }
        }

        let channels = series.channel_names();
        let mut out: Frame = buckets
            .into_iter()
            .filter_map(|(start, members)| {
                let first = members.first()?;
                let mut row = Reading::new(start);
                row.group.clone_from(&first.group);
                row.strain.clone_from(&first.strain);
                row.style.clone_from(&first.style);

                for ch in &channels {
                    let values: Vec<Option<f64>> = members.iter().map(|m| m.value(ch)).collect();
                    let values = present(&values);
                    let agg = match self.aggregation {
                        Aggregation::Median => stats::median(&values),
                        Aggregation::Mean | Aggregation::Interpolate => stats::mean(&values),
                    };
                    row.set_value(ch, agg);
                }

                for m in &members {
                    for (name, &flag) in &m.indicators {
                        let slot = row.indicators.entry(name.clone()).or_insert(false);
                        *slot |= flag;
                    }
                }
                Some(row)
            })
            .collect();

        if self.aggregation == Aggregation::Interpolate {
            let times: Vec<i64> = out.iter().map(|r| r.timestamp.timestamp()).collect();
            for ch in &channels {
                let filled = interpolate_by_time(&times, &out.column(ch));
                out.set_column(ch, &filled);
            }
        }
        out
    }
}

/// Linear interpolation of interior gaps weighted by timestamp distance
fn interpolate_by_time(times: &[i64], values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = values.to_vec();
    let mut prev: Option<usize> = None;
    for i in 0..values.len() {
        if values[i].is_none() {
            continue;
        }
        if let Some(p) = prev {
            if i > p + 1 {
                if let (Some(left), Some(right)) = (values[p], values[i]) {
                    let span = (times[i] - times[p]) as f64;
                    for (j, slot) in out.iter_mut().enumerate().take(i).skip(p + 1) {
                        let frac = if span > 0.0 { (times[j] - times[p]) as f64 / span } else { 0.0 };
                        *slot = Some(left + (right - left) * frac);
                    }
                }
            }
        }
        prev = Some(i);
    }
    out
}

impl Estimator for Resampler {
    fn name(&self) -> &str {
        "resampler"
    }

    fn fit(&mut self, data: &Frame) -> Result<(), PreprocessError> {
        if self.interval_minutes == 0 {
            return Err(PreprocessError::InvalidParameter(
                "resample interval must be > 0".to_string(),
            ));
        }

        let mut spacing: HashMap<i64, usize> = HashMap::new();
        let mut buckets = 0usize;
        for series in self.partitions(data) {
            let times = series.timestamps();
            for w in times.windows(2) {
                let dt = (w[1] - w[0]).num_seconds();
                if dt > 0 {
                    *spacing.entry(dt).or_default() += 1;
                }
            }
            let mut starts: Vec<_> = times.iter().filter_map(|t| self.bucket_start(*t)).collect();
            starts.dedup();
            buckets += starts.len();
        }
        let modal_interval_secs = spacing
            .into_iter()
            .max_by_key(|&(dt, count)| (count, std::cmp::Reverse(dt)))
            .map(|(dt, _)| dt);

        info!(
            source_rows = data.len(),
            buckets,
            modal_interval_secs = ?modal_interval_secs,
            step_minutes = self.interval_minutes,
            "Resampler fitted"
        );
        self.fitted = Some(ResampleFit {
            modal_interval_secs,
            source_rows: data.len(),
            buckets,
        });
        Ok(())
    }

    fn transform(&self, data: &Frame) -> Result<Frame, PreprocessError> {
        if self.fitted.is_none() {
            return Err(PreprocessError::NotFitted(self.name().to_string()));
        }
        if self.interval_minutes == 0 {
            return Err(PreprocessError::InvalidParameter(
                "resample interval must be > 0".to_string(),
            ));
        }
        let out = Frame::concat(self.partitions(data).iter().map(|s| self.resample_series(s)));
        debug!(rows_in = data.len(), rows_out = out.len(), "Resampled");
        Ok(out)
    }

    fn report(&self) -> StageReport {
        let mut report = StageReport::new(self.name(), self.aggregation.as_str())
            .with_param("interval_minutes", self.interval_minutes)
            .with_param("per_group", self.per_group);
        if let Some(fit) = &self.fitted {
            report = report
                .with_param("modal_interval_secs", serde_json::json!(fit.modal_interval_secs))
                .with_count("source_rows", fit.source_rows)
                .with_count("buckets", fit.buckets);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::channels;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_on_grid_series_unchanged() {
        let data: Frame = (0..6)
            .map(|i| {
                Reading::new(at(1_700_000_100 + i * 300))
                    .with_group("T1")
                    .with_channel(channels::CO2, i as f64 * 3.5)
            })
            .collect();
        let mut resampler = Resampler::default();
        let out = resampler.fit_transform(&data).unwrap();
        assert_eq!(out.len(), data.len());
        assert_eq!(out.column(channels::CO2), data.column(channels::CO2));
        assert_eq!(out.timestamps(), data.timestamps());
        assert_eq!(resampler.modal_interval_secs(), Some(300));
    }

    #[test]
    fn test_bucket_mean_and_metadata_from_first() {
        let data: Frame = vec![
            Reading::new(at(0)).with_group("A").with_metadata("ale", "ipa").with_channel(channels::CO2, 10.0),
            Reading::new(at(60)).with_group("A").with_metadata("lager", "pilsner").with_channel(channels::CO2, 20.0),
            Reading::new(at(310)).with_group("A").with_channel(channels::CO2, 40.0),
        ]
        .into_iter()
        .collect();
        let mut resampler = Resampler::default();
        let out = resampler.fit_transform(&data).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out.readings()[0].value(channels::CO2), Some(15.0));
        assert_eq!(out.readings()[0].strain.as_deref(), Some("ale"));
        assert_eq!(out.readings()[1].timestamp, at(300));
    }

    #[test]
    fn test_empty_buckets_produce_no_rows() {
        let data: Frame = vec![
            Reading::new(at(0)).with_channel(channels::CO2, 1.0),
            Reading::new(at(3000)).with_channel(channels::CO2, 2.0),
        ]
        .into_iter()
        .collect();
        let mut resampler = Resampler::default();
        assert_eq!(resampler.fit_transform(&data).unwrap().len(), 2);
    }

    #[test]
    fn test_interpolate_fills_bucket_gap_by_time() {
        let data: Frame = vec![
            Reading::new(at(0)).with_channel(channels::CO2, 0.0),
            Reading::new(at(300)).with_missing(channels::CO2),
            Reading::new(at(600)).with_channel(channels::CO2, 10.0),
        ]
        .into_iter()
        .collect();
        let mut resampler = Resampler::new(5, Aggregation::Interpolate, false);
        let out = resampler.fit_transform(&data).unwrap();
        assert_eq!(out.readings()[1].value(channels::CO2), Some(5.0));
    }

    #[test]
    fn test_indicators_or_merged() {
        let mut a = Reading::new(at(0)).with_channel(channels::CO2, 1.0);
        a.indicators.insert("co2_ppm_outlier".to_string(), false);
        let mut b = Reading::new(at(30)).with_channel(channels::CO2, 2.0);
        b.indicators.insert("co2_ppm_outlier".to_string(), true);
        let data: Frame = vec![a, b].into_iter().collect();

        let mut resampler = Resampler::default();
        let out = resampler.fit_transform(&data).unwrap();
        assert_eq!(out.readings()[0].indicators.get("co2_ppm_outlier"), Some(&true));
    }
}
