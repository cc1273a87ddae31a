//! Numeric helpers shared by the fitters, detectors and analytics
//!
//! Moments go through `statrs::statistics::Statistics`; order statistics use
//! linear interpolation between closest ranks so quantiles agree with the
//! usual dataframe convention (`q = 0.25` on `[1, 2, 3, 4]` is `1.75`).

use statrs::statistics::Statistics;

/// Added to denominators that can collapse to zero
pub const EPSILON: f64 = 1e-10;

// ============================================================================
// Moments
// ============================================================================

/// Arithmetic mean, `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().mean())
}

/// Sample standard deviation (n - 1), `None` below two values
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    Some(values.iter().std_dev())
}

/// Population standard deviation (n), `None` for an empty slice
pub fn population_std(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().population_std_dev())
}

// ============================================================================
// Order statistics
// ============================================================================

/// Linear-interpolated quantile, `q` in [0, 1]
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

pub fn median(values: &[f64]) -> Option<f64> {
    quantile(values, 0.5)
}

// ============================================================================
// Series transforms
// ============================================================================

/// First difference, length n - 1
pub fn diff(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| w[1] - w[0]).collect()
}

/// First difference aligned to the input: slot 0 is `None`, and any slot
/// touching a missing value is `None`
pub fn diff_aligned(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(values.len());
    if values.is_empty() {
        return out;
    }
    out.push(None);
    for w in values.windows(2) {
        out.push(match (w[0], w[1]) {
            (Some(a), Some(b)) => Some(b - a),
            _ => None,
        });
    }
    out
}

/// Trailing rolling mean over `window` slots, emitting a value once at least
/// `min_periods` non-missing observations are inside the window
pub fn rolling_mean(values: &[Option<f64>], window: usize, min_periods: usize) -> Vec<Option<f64>> {
    let window = window.max(1);
    let min_periods = min_periods.max(1);
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let present: Vec<f64> = values[start..=i].iter().flatten().copied().collect();
            if present.len() >= min_periods {
                mean(&present)
            } else {
                None
            }
        })
        .collect()
}

/// Trailing rolling sample std, same window rules as [`rolling_mean`]
pub fn rolling_std(values: &[Option<f64>], window: usize, min_periods: usize) -> Vec<Option<f64>> {
    let window = window.max(1);
    let min_periods = min_periods.max(2);
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let present: Vec<f64> = values[start..=i].iter().flatten().copied().collect();
            if present.len() >= min_periods {
                sample_std(&present)
            } else {
                None
            }
        })
        .collect()
}

/// Carry the last seen value forward over gaps; leading gaps stay empty
pub fn forward_filled(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut last = None;
    values
        .iter()
        .map(|v| {
            if v.is_some() {
                last = *v;
            }
            last
        })
        .collect()
}

/// Resample a curve to `target_len` evenly spaced points by linear interpolation
pub fn interpolate_linear(curve: &[f64], target_len: usize) -> Vec<f64> {
    match (curve.len(), target_len) {
        (_, 0) | (0, _) => Vec::new(),
        (1, n) => vec![curve[0]; n],
        (_, 1) => vec![curve[0]],
        (len, n) => {
            let step = (len - 1) as f64 / (n - 1) as f64;
            (0..n)
                .map(|i| {
                    let pos = i as f64 * step;
                    let lo = (pos.floor() as usize).min(len - 1);
                    let hi = (lo + 1).min(len - 1);
                    let frac = pos - lo as f64;
                    curve[lo] + (curve[hi] - curve[lo]) * frac
                })
                .collect()
        }
    }
}

/// Cosine similarity with an epsilon-guarded denominator; `None` on length mismatch
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|y| y * y).sum::<f64>().sqrt();
    Some(dot / (norm_a * norm_b + EPSILON))
}
