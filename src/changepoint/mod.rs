//! Changepoint detection on a single channel
//!
//! Three statistics, chosen at construction:
//! - `cusum`: cumulative deviation from the mean exceeds `threshold * std`
//! - `window`: adjacent half-windows differ in mean by more than `threshold * std`
//! - `derivative`: a single step exceeds `threshold * std(diff)`
//!
//! All spreads are population standard deviations and every comparison is
//! strict, so a constant series yields no changepoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ChangepointMethod, EngineConfig};
use crate::stats;
use crate::types::{channels, Frame};

/// A detected boundary mapped back to the frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseBoundary {
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseBoundaries {
    pub boundaries: Vec<PhaseBoundary>,
    pub changepoint_count: usize,
}

#[derive(Debug, Clone)]
pub struct ChangepointDetector {
    method: ChangepointMethod,
    threshold: f64,
    max_window: usize,
    channel: String,
    last: Vec<usize>,
}

impl Default for ChangepointDetector {
    fn default() -> Self {
        Self::new(ChangepointMethod::Cusum)
    }
}

impl ChangepointDetector {
    pub fn new(method: ChangepointMethod) -> Self {
        Self {
            method,
            threshold: 3.0,
            max_window: 50,
            channel: channels::CO2.to_string(),
            last: Vec::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let c = &config.changepoint;
        Self {
            method: c.method,
            threshold: c.threshold,
            max_window: c.max_window,
            channel: config.run.primary_channel.clone(),
            last: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_channel(mut self, channel: &str) -> Self {
        self.channel = channel.to_string();
        self
    }

    pub fn method(&self) -> ChangepointMethod {
        self.method
    }

    /// Changepoints from the most recent `detect`
    pub fn changepoints(&self) -> &[usize] {
        &self.last
    }

    /// Row indices where the configured channel changes structurally.
    ///
    /// A missing channel gives an empty list.
    pub fn detect(&mut self, data: &Frame) -> Vec<usize> {
        self.last = if data.has_channel(&self.channel) {
            let series = carry_forward(&data.column(&self.channel));
            self.detect_series(&series)
        } else {
            debug!(channel = %self.channel, "Changepoint channel absent");
            Vec::new()
        };
        self.last.clone()
    }

    /// Run the configured statistic on a gap-free series
    pub fn detect_series(&self, series: &[f64]) -> Vec<usize> {
        match self.method {
            ChangepointMethod::Cusum => self.cusum(series),
            ChangepointMethod::Window => self.window(series),
            ChangepointMethod::Derivative => self.derivative(series),
        }
    }

    /// `detect`, with each index mapped to its timestamp and value
    pub fn detect_phase_boundaries(&mut self, data: &Frame) -> PhaseBoundaries {
        let indices = self.detect(data);
        let boundaries = indices
            .iter()
            .filter_map(|&i| {
                let row = data.readings().get(i)?;
                Some(PhaseBoundary {
                    index: i,
                    timestamp: row.timestamp,
                    value: row.value(&self.channel),
                })
            })
            .collect();
        PhaseBoundaries {
            boundaries,
            changepoint_count: indices.len(),
        }
    }

    fn cusum(&self, series: &[f64]) -> Vec<usize> {
        let (Some(mean), Some(std)) = (stats::mean(series), stats::population_std(series)) else {
            return Vec::new();
        };
        let limit = self.threshold * std;
        let mut cumsum = 0.0;
        let mut out = Vec::new();
        for (i, x) in series.iter().enumerate() {
            cumsum += x - mean;
            if i >= 1 && cumsum.abs() > limit {
                out.push(i);
            }
        }
        out
    }

    fn window(&self, series: &[f64]) -> Vec<usize> {
        let n = series.len();
        let w = self.max_window.min(n / 10);
        if w == 0 {
            return Vec::new();
        }
        let Some(std) = stats::population_std(series) else {
            return Vec::new();
        };
        let limit = self.threshold * std;
        (w..n - w)
            .filter(|&i| {
                let before = stats::mean(&series[i - w..i]).unwrap_or(0.0);
                let after = stats::mean(&series[i..i + w]).unwrap_or(0.0);
                (after - before).abs() > limit
            })
            .collect()
    }

    fn derivative(&self, series: &[f64]) -> Vec<usize> {
        let diff = stats::diff(series);
        let Some(std) = stats::population_std(&diff) else {
            return Vec::new();
        };
        let limit = self.threshold * std;
        diff.iter()
            .enumerate()
            .filter(|(_, d)| d.abs() > limit)
            .map(|(i, _)| i + 1)
            .collect()
    }
}

/// Forward-fill gaps; leading gaps take the first observed value so indices
/// stay aligned with the frame. An all-missing column gives an empty series.
fn carry_forward(values: &[Option<f64>]) -> Vec<f64> {
    let Some(first) = values.iter().flatten().next().copied() else {
        return Vec::new();
    };
    stats::forward_filled(values)
        .into_iter()
        .map(|v| v.unwrap_or(first))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Reading;
    use chrono::TimeZone;

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

    fn step_series() -> Vec<f64> {
        (0..200).map(|i| if i < 100 { 10.0 } else { 50.0 }).collect()
    }

    #[test]
    fn test_constant_series_has_no_changepoints() {
        let series = vec![42.0; 100];
        for method in [ChangepointMethod::Cusum, ChangepointMethod::Window, ChangepointMethod::Derivative] {
            let detector = ChangepointDetector::new(method);
            assert!(detector.detect_series(&series).is_empty(), "{method:?} flagged a constant series");
        }
    }

    #[test]
    fn test_derivative_flags_step() {
        let detector = ChangepointDetector::new(ChangepointMethod::Derivative);
        assert_eq!(detector.detect_series(&step_series()), vec![100]);
    }

    #[test]
    fn test_window_brackets_step() {
        let detector = ChangepointDetector::new(ChangepointMethod::Window).with_threshold(1.0);
        let found = detector.detect_series(&step_series());
        assert!(!found.is_empty());
        assert!(found.contains(&100));
        assert!(found.iter().all(|&i| (80..=120).contains(&i)));
    }

    #[test]
    fn test_window_needs_ten_samples() {
        let detector = ChangepointDetector::new(ChangepointMethod::Window);
        assert!(detector.detect_series(&[1.0, 100.0, 1.0, 100.0]).is_empty());
    }

    #[test]
    fn test_cusum_flags_around_shift() {
        let detector = ChangepointDetector::new(ChangepointMethod::Cusum).with_threshold(1.0);
        let found = detector.detect_series(&step_series());
        assert!(!found.is_empty());
        assert!(found.iter().all(|&i| i >= 1));
    }

    #[test]
    fn test_missing_channel_returns_empty() {
        let mut detector = ChangepointDetector::default().with_channel("no_such_channel");
        assert!(detector.detect(&frame_of(&[Some(1.0), Some(2.0)])).is_empty());
        assert!(detector.changepoints().is_empty());
    }

    #[test]
    fn test_boundaries_carry_timestamp_and_value() {
        let mut values: Vec<Option<f64>> = step_series().into_iter().map(Some).collect();
        values[50] = None;
        let data = frame_of(&values);
        let mut detector = ChangepointDetector::new(ChangepointMethod::Derivative);
        let result = detector.detect_phase_boundaries(&data);

        assert_eq!(result.changepoint_count, 1);
        assert_eq!(result.boundaries[0].index, 100);
        assert_eq!(result.boundaries[0].timestamp, data.readings()[100].timestamp);
        assert_eq!(result.boundaries[0].value, Some(50.0));
        assert_eq!(detector.changepoints(), &[100]);
    }
}
