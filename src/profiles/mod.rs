//! Golden Profiles - reference fermentation curves per (strain, style)
//!
//! A golden profile is an idealised batch sampled on a fixed grid: CO2 rises
//! through lag and exponential growth, plateaus, then tails off. Dissolved
//! oxygen decays, temperature ramps then holds, and head pressure tracks CO2.
//!
//! ## Persistence
//!
//! Profiles are saved as one JSON object mapping `"{strain}_{style}"` to the
//! ordered sample records. On load the key is split at the first `_`, so a
//! strain name must not itself contain an underscore.

use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::types::{channels, PhaseLabel, DEFAULT_PROFILE_KEY};

// ============================================================================
// Curve Constants
// ============================================================================

/// Phase boundaries as fractions of the profile length
const LAG_END_FRACTION: f64 = 0.1;
const EXPONENTIAL_END_FRACTION: f64 = 0.4;
const STATIONARY_END_FRACTION: f64 = 0.7;

const OXYGEN_START_PCT: f64 = 20.0;
const OXYGEN_END_PCT: f64 = 0.5;
const OXYGEN_MAX_PCT: f64 = 21.0;

const TEMP_START_C: f64 = 18.0;
const TEMP_PEAK_C: f64 = 22.0;

const PRESSURE_START_KPA: f64 = 100.0;
const PRESSURE_PEAK_KPA: f64 = 150.0;

/// (strain, style) pairs produced by `generate_default_profiles`
pub const DEFAULT_COMBINATIONS: [(&str, &str); 3] = [
    DEFAULT_PROFILE_KEY,
    ("ale", "ipa"),
    ("lager", "pilsner"),
];

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Invalid profile parameter: {0}")]
    InvalidParameter(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

// ============================================================================
// Profile Types
// ============================================================================

/// One point of a golden curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSample {
    pub time_minutes: f64,
    pub co2_ppm: f64,
    pub o2_pct: f64,
    pub process_temp_c: f64,
    pub pressure_kpa: f64,
    pub phase: PhaseLabel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenProfile {
    pub strain: String,
    pub style: String,
    pub samples: Vec<ProfileSample>,
}

impl GoldenProfile {
    pub fn new(strain: &str, style: &str, samples: Vec<ProfileSample>) -> Self {
        Self {
            strain: strain.to_string(),
            style: style.to_string(),
            samples,
        }
    }

    pub fn key(&self) -> (&str, &str) {
        (&self.strain, &self.style)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Highest CO2 value on the curve, `None` for an empty profile
    pub fn peak_co2(&self) -> Option<f64> {
        self.samples.iter().map(|s| s.co2_ppm).reduce(f64::max)
    }

    pub fn co2_curve(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.co2_ppm).collect()
    }

    /// Curve for a canonical channel; `None` if profiles do not carry it
    pub fn curve(&self, channel: &str) -> Option<Vec<f64>> {
        let pick: fn(&ProfileSample) -> f64 = match channel {
            channels::CO2 => |s| s.co2_ppm,
            channels::OXYGEN => |s| s.o2_pct,
            channels::TEMPERATURE => |s| s.process_temp_c,
            channels::PRESSURE => |s| s.pressure_kpa,
            _ => return None,
        };
        Some(self.samples.iter().map(pick).collect())
    }
}

/// Shape parameters for a synthesized profile
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileSynthesis {
    pub duration_hours: f64,
    pub interval_minutes: u32,
    pub peak_co2_ppm: f64,
    pub oxygen_noise_std: f64,
    pub seed: u64,
}

impl Default for ProfileSynthesis {
    fn default() -> Self {
        Self {
            duration_hours: 168.0,
            interval_minutes: 5,
            peak_co2_ppm: 2000.0,
            oxygen_noise_std: 0.5,
            seed: 42,
        }
    }
}

impl ProfileSynthesis {
    pub fn from_config(config: &EngineConfig) -> Self {
        let p = &config.profiles;
        Self {
            duration_hours: p.duration_hours,
            interval_minutes: p.interval_minutes,
            peak_co2_ppm: p.peak_co2_ppm,
            oxygen_noise_std: p.oxygen_noise_std,
            seed: p.seed,
        }
    }
}

/// `n` evenly spaced values from `start` to `end` inclusive
fn linspace(start: f64, end: f64, n: usize) -> impl Iterator<Item = f64> {
    let step = if n > 1 { (end - start) / (n - 1) as f64 } else { 0.0 };
    (0..n).map(move |i| start + step * i as f64)
}

/// Synthesize a golden profile.
///
/// Lag covers the first 10 % of samples (0 to 5 % of peak), exponential runs
/// to 40 % (5 % to 80 %), stationary to 70 % (`0.8 + 0.2 sin` over [0, π]),
/// decline the rest (90 % down to 30 %).
pub fn create_profile(
    strain: &str,
    style: &str,
    synthesis: &ProfileSynthesis,
) -> Result<GoldenProfile, ProfileError> {
    let ProfileSynthesis {
        duration_hours,
        interval_minutes,
        peak_co2_ppm: peak,
        oxygen_noise_std,
        seed,
    } = *synthesis;

    if interval_minutes == 0 {
        return Err(ProfileError::InvalidParameter("interval_minutes must be > 0".to_string()));
    }
    if !duration_hours.is_finite() || duration_hours <= 0.0 {
        return Err(ProfileError::InvalidParameter(format!(
            "duration_hours must be positive (got {duration_hours})"
        )));
    }
    if !peak.is_finite() || peak <= 0.0 {
        return Err(ProfileError::InvalidParameter(format!("peak_co2_ppm must be positive (got {peak})")));
    }
    let noise = Normal::new(0.0, oxygen_noise_std)
        .map_err(|e| ProfileError::InvalidParameter(format!("oxygen_noise_std: {e}")))?;

    let total_minutes = duration_hours * 60.0;
    let step = f64::from(interval_minutes);
    let n = (total_minutes / step).ceil() as usize;

    let lag_end = (n as f64 * LAG_END_FRACTION) as usize;
    let exp_end = (n as f64 * EXPONENTIAL_END_FRACTION) as usize;
    let stat_end = (n as f64 * STATIONARY_END_FRACTION) as usize;

    let stationary_len = stat_end - exp_end;
    let co2: Vec<f64> = linspace(0.0, peak * 0.05, lag_end)
        .chain(linspace(peak * 0.05, peak * 0.8, exp_end - lag_end))
        .chain(
            linspace(0.0, std::f64::consts::PI, stationary_len).map(|x| peak * (0.8 + 0.2 * x.sin())),
        )
        .chain(linspace(peak * 0.9, peak * 0.3, n - stat_end))
        .collect();

    let temperature: Vec<f64> = linspace(TEMP_START_C, TEMP_PEAK_C, exp_end)
        .chain(std::iter::repeat(TEMP_PEAK_C).take(n - exp_end))
        .collect();

    let mut rng = StdRng::seed_from_u64(seed);
    let samples = linspace(OXYGEN_START_PCT, OXYGEN_END_PCT, n)
        .enumerate()
        .map(|(i, o2)| {
            let phase = match i {
                i if i < lag_end => PhaseLabel::Lag,
                i if i < exp_end => PhaseLabel::Exponential,
                i if i < stat_end => PhaseLabel::Stationary,
                _ => PhaseLabel::Decline,
            };
            ProfileSample {
                time_minutes: i as f64 * step,
                co2_ppm: co2[i],
                o2_pct: (o2 + noise.sample(&mut rng)).clamp(0.0, OXYGEN_MAX_PCT),
                process_temp_c: temperature[i],
                pressure_kpa: PRESSURE_START_KPA + (co2[i] / peak) * (PRESSURE_PEAK_KPA - PRESSURE_START_KPA),
                phase,
            }
        })
        .collect();

    Ok(GoldenProfile::new(strain, style, samples))
}

// ============================================================================
// Profile Store
// ============================================================================

/// Golden profiles keyed by (strain, style); read-only once built
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GoldenProfileStore {
    profiles: BTreeMap<(String, String), GoldenProfile>,
}

impl GoldenProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the default combinations
    pub fn with_defaults(synthesis: &ProfileSynthesis) -> Result<Self, ProfileError> {
        let mut store = Self::new();
        store.generate_default_profiles(synthesis)?;
        Ok(store)
    }

    /// Load from `config.profiles.path` when set, otherwise synthesize defaults
    pub fn from_config(config: &EngineConfig) -> Result<Self, ProfileError> {
        match &config.profiles.path {
            Some(path) => Self::load(path),
            None => Self::with_defaults(&ProfileSynthesis::from_config(config)),
        }
    }

    /// Insert or replace the profile for its (strain, style)
    pub fn add(&mut self, profile: GoldenProfile) {
        self.profiles
            .insert((profile.strain.clone(), profile.style.clone()), profile);
    }

    pub fn get(&self, strain: &str, style: &str) -> Option<&GoldenProfile> {
        self.profiles.get(&(strain.to_string(), style.to_string()))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GoldenProfile> {
        self.profiles.values()
    }

    pub fn generate_default_profiles(&mut self, synthesis: &ProfileSynthesis) -> Result<(), ProfileError> {
        for (strain, style) in DEFAULT_COMBINATIONS {
            self.add(create_profile(strain, style, synthesis)?);
        }
        info!(profiles = self.profiles.len(), "Default golden profiles generated");
        Ok(())
    }

    /// Write all profiles as JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ProfileError> {
        let records: BTreeMap<String, &Vec<ProfileSample>> = self
            .profiles
            .values()
            .map(|p| (format!("{}_{}", p.strain, p.style), &p.samples))
            .collect();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&records)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), profiles = records.len(), "Golden profiles saved");
        Ok(())
    }

    /// Read profiles written by [`save`](Self::save)
    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        let json = std::fs::read_to_string(path)?;
        let records: BTreeMap<String, Vec<ProfileSample>> = serde_json::from_str(&json)?;

        let mut store = Self::new();
        for (key, samples) in records {
            let Some((strain, style)) = key.split_once('_') else {
                warn!(key = %key, "Profile key has no strain/style separator, skipping");
                continue;
            };
            store.add(GoldenProfile::new(strain, style, samples));
        }
        info!(path = %path.display(), profiles = store.len(), "Golden profiles loaded");
        Ok(store)
    }
}
