//! Batch Analytics
//!
//! Per-batch summary metrics, attenuation slopes, rolling statistics, golden
//! curve comparison and cross-batch distances. Per-group work runs on the
//! rayon pool; results are sorted by group key so output order does not
//! depend on scheduling.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use tracing::debug;

use crate::profiles::GoldenProfile;
use crate::stats;
use crate::types::{channels, Frame};

/// Channels used for cross-batch feature vectors, when present
pub const FEATURE_CHANNELS: [&str; 4] = [
    channels::CO2,
    channels::OXYGEN,
    channels::TEMPERATURE,
    channels::PRESSURE,
];

/// Default rolling window (one hour at 5-minute sampling)
pub const ROLLING_WINDOW: usize = 12;

/// Minimum paired samples for a correlation
const MIN_CORRELATION_SAMPLES: usize = 30;

// ============================================================================
// Batch Metrics
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMetrics {
    pub group: Option<String>,
    pub peak_co2_ppm: Option<f64>,
    pub time_to_peak_minutes: Option<f64>,
    /// Minutes until dissolved oxygen first falls to half its initial value
    pub do_half_life_minutes: Option<f64>,
    pub pressure_growth_kpa: Option<f64>,
    pub duration_hours: f64,
    pub num_samples: usize,
}

fn minutes_between(start: chrono::DateTime<chrono::Utc>, end: chrono::DateTime<chrono::Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 60_000.0
}

fn metrics_for(group: Option<String>, series: &Frame) -> BatchMetrics {
    let rows = series.readings();
    let start = rows.first().map(|r| r.timestamp);
    let end = rows.last().map(|r| r.timestamp);

    // first occurrence of the maximum
    let peak = rows
        .iter()
        .filter_map(|r| Some((r.timestamp, r.value(channels::CO2)?)))
        .fold(None, |best: Option<(chrono::DateTime<chrono::Utc>, f64)>, (t, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((t, v)),
        });

    let do_half_life = rows.first().and_then(|first| {
        let initial = first.value(channels::OXYGEN).filter(|v| *v > 0.0)?;
        let half = initial / 2.0;
        let hit = rows
            .iter()
            .find(|r| r.value(channels::OXYGEN).is_some_and(|v| v <= half))?;
        Some(minutes_between(first.timestamp, hit.timestamp))
    });

    let pressure_growth = match (rows.first(), rows.last()) {
        (Some(a), Some(b)) => match (a.value(channels::PRESSURE), b.value(channels::PRESSURE)) {
            (Some(p0), Some(p1)) => Some(p1 - p0),
            _ => None,
        },
        _ => None,
    };

    BatchMetrics {
        group,
        peak_co2_ppm: peak.map(|(_, v)| v),
        time_to_peak_minutes: peak.zip(start).map(|((t, _), s)| minutes_between(s, t)),
        do_half_life_minutes: do_half_life,
        pressure_growth_kpa: pressure_growth,
        duration_hours: start.zip(end).map_or(0.0, |(s, e)| minutes_between(s, e) / 60.0),
        num_samples: rows.len(),
    }
}

/// One [`BatchMetrics`] per group, sorted by group key
pub fn batch_metrics(data: &Frame) -> Vec<BatchMetrics> {
    let mut out: Vec<BatchMetrics> = data
        .series()
        .into_par_iter()
        .map(|(group, series)| metrics_for(group, &series))
        .collect();
    out.sort_by(|a, b| a.group.cmp(&b.group));
    debug!(batches = out.len(), "Batch metrics computed");
    out
}

// ============================================================================
// Attenuation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttenuationSlope {
    pub group: Option<String>,
    /// CO2 change per sample; `None` for fewer than two points or a flat series
    pub slope: Option<f64>,
    pub initial_co2: Option<f64>,
    pub final_co2: Option<f64>,
}

/// Ordinary least squares slope of `y` on `x`
pub fn least_squares_slope(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let mx = stats::mean(x)?;
    let my = stats::mean(y)?;
    let sxx: f64 = x.iter().map(|a| (a - mx).powi(2)).sum();
    if sxx == 0.0 || stats::population_std(y)? == 0.0 {
        return None;
    }
    let sxy: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();
    Some(sxy / sxx)
}

/// CO2 trend per group over the sample index; gaps keep their index
pub fn attenuation_slopes(data: &Frame) -> Vec<AttenuationSlope> {
    let mut out: Vec<AttenuationSlope> = data
        .series()
        .into_par_iter()
        .map(|(group, series)| {
            let (x, y): (Vec<f64>, Vec<f64>) = series
                .column(channels::CO2)
                .into_iter()
                .enumerate()
                .filter_map(|(i, v)| Some((i as f64, v?)))
                .unzip();
            AttenuationSlope {
                group,
                slope: least_squares_slope(&x, &y),
                initial_co2: y.first().copied(),
                final_co2: y.last().copied(),
            }
        })
        .collect();
    out.sort_by(|a, b| a.group.cmp(&b.group));
    out
}

// ============================================================================
// Rolling Statistics
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingStats {
    pub channel: String,
    pub mean: Vec<Option<f64>>,
    pub std: Vec<Option<f64>>,
    /// std / mean
    pub cv: Vec<Option<f64>>,
}

/// Trailing rolling mean, std and coefficient of variation for each channel
/// present in `series` (one time-ordered group)
pub fn rolling_statistics(series: &Frame, channel_names: &[&str], window: usize) -> Vec<RollingStats> {
    channel_names
        .iter()
        .filter(|ch| series.has_channel(ch))
        .map(|ch| {
            let values = series.column(ch);
            let mean = stats::rolling_mean(&values, window, 1);
            let std = stats::rolling_std(&values, window, 1);
            let cv = mean
                .iter()
                .zip(&std)
                .map(|(m, s)| Some(s.as_ref()? / (m.as_ref()? + stats::EPSILON)))
                .collect();
            RollingStats {
                channel: (*ch).to_string(),
                mean,
                std,
                cv,
            }
        })
        .collect()
}

// ============================================================================
// Golden Comparison
// ============================================================================

/// Cosine similarity of `live` against `golden` resampled to the live length
pub fn compare_curves(live: &[f64], golden: &[f64]) -> Option<f64> {
    if golden.is_empty() {
        return None;
    }
    let resampled = if golden.len() == live.len() {
        golden.to_vec()
    } else {
        stats::interpolate_linear(golden, live.len())
    };
    stats::cosine_similarity(live, &resampled)
}

/// Similarity of one series' channel to the same channel of a golden profile
pub fn compare_to_golden(series: &Frame, profile: &GoldenProfile, channel: &str) -> Option<f64> {
    if !series.has_channel(channel) {
        return None;
    }
    let live: Vec<f64> = series.column(channel).into_iter().flatten().collect();
    compare_curves(&live, &profile.curve(channel)?)
}

// ============================================================================
// Cross-batch Distances
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistanceMatrix {
    pub groups: Vec<Option<String>>,
    pub features: Vec<String>,
    pub distances: Vec<Vec<f64>>,
}

impl DistanceMatrix {
    pub fn get(&self, a: usize, b: usize) -> Option<f64> {
        self.distances.get(a)?.get(b).copied()
    }
}

/// Pairwise Euclidean distances between row vectors
pub fn euclidean_distance_matrix(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    rows.par_iter()
        .map(|a| {
            rows.iter()
                .map(|b| a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt())
                .collect()
        })
        .collect()
}

/// Distances between groups over their mean feature vectors.
///
/// Features are the [`FEATURE_CHANNELS`] present in the frame; a feature
/// missing entirely in some group is dropped for all groups.
pub fn group_distances(data: &Frame) -> DistanceMatrix {
    let mut series = data.series();
    series.sort_by(|a, b| a.0.cmp(&b.0));

    let candidates: Vec<&str> = FEATURE_CHANNELS
        .iter()
        .copied()
        .filter(|ch| data.has_channel(ch))
        .collect();
    let means: Vec<Vec<Option<f64>>> = series
        .par_iter()
        .map(|(_, s)| {
            candidates
                .iter()
                .map(|ch| stats::mean(&s.column(ch).into_iter().flatten().collect::<Vec<_>>()))
                .collect()
        })
        .collect();

    let keep: Vec<usize> = (0..candidates.len())
        .filter(|&j| means.iter().all(|row| row[j].is_some()))
        .collect();
    let rows: Vec<Vec<f64>> = means
        .iter()
        .map(|row| keep.iter().filter_map(|&j| row[j]).collect())
        .collect();

    DistanceMatrix {
        groups: series.into_iter().map(|(g, _)| g).collect(),
        features: keep.iter().map(|&j| candidates[j].to_string()).collect(),
        distances: euclidean_distance_matrix(&rows),
    }
}

// ============================================================================
// Channel Correlations
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelCorrelation {
    pub x: String,
    pub y: String,
    pub r: f64,
    pub p_value: f64,
    pub samples: usize,
}

/// Pearson r; zero when either side has no spread
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len() as f64;
    let sum_x: f64 = x.iter().sum();
    let sum_y: f64 = y.iter().sum();
    let sum_xy: f64 = x.iter().zip(y).map(|(a, b)| a * b).sum();
    let sum_x2: f64 = x.iter().map(|a| a * a).sum();
    let sum_y2: f64 = y.iter().map(|a| a * a).sum();

    let numerator = n * sum_xy - sum_x * sum_y;
    let denominator = ((n * sum_x2 - sum_x.powi(2)) * (n * sum_y2 - sum_y.powi(2))).sqrt();
    if denominator == 0.0 || !denominator.is_finite() {
        0.0
    } else {
        numerator / denominator
    }
}

/// Two-tailed p-value for `r` over `n` samples (Student's t, n - 2 dof)
pub fn p_value_for_r(r: f64, n: usize) -> f64 {
    if n < 3 {
        return 1.0;
    }
    if r.abs() >= 0.9999 {
        return 0.0;
    }
    let df = (n - 2) as f64;
    let t = r * df.sqrt() / (1.0 - r * r).sqrt();
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => 2.0 * (1.0 - dist.cdf(t.abs())),
        Err(_) => 1.0,
    }
}

/// Pairwise correlations between the feature channels, over rows where both
/// sides are present. Pairs with fewer than 30 such rows are omitted.
pub fn channel_correlations(data: &Frame) -> Vec<ChannelCorrelation> {
    let present: Vec<&str> = FEATURE_CHANNELS
        .iter()
        .copied()
        .filter(|ch| data.has_channel(ch))
        .collect();
    let mut out = Vec::new();
    for (i, x_name) in present.iter().enumerate() {
        for y_name in &present[i + 1..] {
            let (x, y): (Vec<f64>, Vec<f64>) = data
                .iter()
                .filter_map(|r| Some((r.value(x_name)?, r.value(y_name)?)))
                .unzip();
            if x.len() < MIN_CORRELATION_SAMPLES {
                continue;
            }
            let r = pearson(&x, &y);
            out.push(ChannelCorrelation {
                x: (*x_name).to_string(),
                y: (*y_name).to_string(),
                r,
                p_value: p_value_for_r(r, x.len()),
                samples: x.len(),
            });
        }
    }
    out
}

// ============================================================================
// Summary
// ============================================================================

/// Everything the CLI reports about a batch set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchAnalytics {
    pub batches: Vec<BatchMetrics>,
    pub attenuation: Vec<AttenuationSlope>,
    pub distances: DistanceMatrix,
    pub correlations: Vec<ChannelCorrelation>,
}

impl BatchAnalytics {
    pub fn compute(data: &Frame) -> Self {
        Self {
            batches: batch_metrics(data),
            attenuation: attenuation_slopes(data),
            distances: group_distances(data),
            correlations: channel_correlations(data),
        }
    }
}
