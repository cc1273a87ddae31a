//! Engine Configuration - every tunable of the analysis run as TOML values
//!
//! Each section implements `Default` with the values the engine uses when no
//! config file is present, so an empty file and a missing file behave the same.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::types::channels;

/// Env var naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "FERMENTWATCH_CONFIG";

/// Config file looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "fermentwatch.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for an analysis run.
///
/// Load with `EngineConfig::load()` which searches:
/// 1. `$FERMENTWATCH_CONFIG` env var
/// 2. `./fermentwatch.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Run identification and the primary channel
    #[serde(default)]
    pub run: RunConfig,

    /// Imputer, outlier bounder, resampler and scaler
    #[serde(default)]
    pub preprocessing: PreprocessingConfig,

    /// Golden profile synthesis
    #[serde(default)]
    pub profiles: ProfileConfig,

    /// Phase aligner breakpoints
    #[serde(default)]
    pub phase: PhaseConfig,

    /// Changepoint detector
    #[serde(default)]
    pub changepoint: ChangepointConfig,

    /// Anomaly detector thresholds
    #[serde(default)]
    pub anomaly: AnomalyConfig,
}

impl EngineConfig {
    /// Load configuration using the standard search order:
    /// 1. `$FERMENTWATCH_CONFIG` environment variable
    /// 2. `./fermentwatch.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), run = %config.run.name, "Loaded engine config from {CONFIG_ENV_VAR}");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {CONFIG_ENV_VAR}, falling back");
                    }
                }
            } else {
                warn!(path = %path, "{CONFIG_ENV_VAR} points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(run = %config.run.name, "Loaded engine config from ./{LOCAL_CONFIG_FILE}");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{LOCAL_CONFIG_FILE}, using defaults");
                }
            }
        }

        info!("No {LOCAL_CONFIG_FILE} found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    ///
    /// Unknown keys are reported as warnings first; they never fail the load.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Write the config as TOML.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(parent.to_path_buf(), e))?;
        }
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Engine config saved");
        Ok(())
    }

    /// Validate all tunables for internal consistency.
    ///
    /// Rules:
    /// - Window sizes, limits and intervals must be > 0
    /// - Every threshold must be finite
    /// - Ranges need min < max, breakpoints must be strictly increasing
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();
        let pre = &self.preprocessing;

        if self.run.primary_channel.trim().is_empty() {
            errors.push("run.primary_channel must not be empty".to_string());
        }

        if pre.imputer.limit == 0 {
            errors.push("preprocessing.imputer.limit must be > 0".to_string());
        }
        Self::check_positive(pre.outliers.iqr_multiplier, "preprocessing.outliers.iqr_multiplier", &mut errors);
        Self::check_positive(pre.outliers.z_threshold, "preprocessing.outliers.z_threshold", &mut errors);
        if pre.resample.interval_minutes == 0 {
            errors.push("preprocessing.resample.interval_minutes must be > 0".to_string());
        }

        let p = &self.profiles;
        if p.interval_minutes == 0 {
            errors.push("profiles.interval_minutes must be > 0".to_string());
        }
        Self::check_positive(p.duration_hours, "profiles.duration_hours", &mut errors);
        Self::check_positive(p.peak_co2_ppm, "profiles.peak_co2_ppm", &mut errors);
        if !p.oxygen_noise_std.is_finite() || p.oxygen_noise_std < 0.0 {
            errors.push(format!(
                "profiles.oxygen_noise_std must be finite and >= 0 (got {})",
                p.oxygen_noise_std
            ));
        }

        Self::check_increasing(&self.phase.ratio_breakpoints, "phase.ratio_breakpoints", &mut errors);
        Self::check_increasing(&self.phase.absolute_breakpoints, "phase.absolute_breakpoints", &mut errors);

        Self::check_positive(self.changepoint.threshold, "changepoint.threshold", &mut errors);
        if self.changepoint.max_window == 0 {
            errors.push("changepoint.max_window must be > 0".to_string());
        }

        let a = &self.anomaly;
        if a.stuck.window == 0 {
            errors.push("anomaly.stuck.window must be > 0".to_string());
        }
        Self::check_positive(a.stuck.rate_threshold, "anomaly.stuck.rate_threshold", &mut errors);
        if !(0.0..=1.0).contains(&a.stuck.level_quantile) {
            errors.push(format!(
                "anomaly.stuck.level_quantile ({}) must be within [0, 1]",
                a.stuck.level_quantile
            ));
        }
        Self::check_positive(a.spike.sigma_multiplier, "anomaly.spike.sigma_multiplier", &mut errors);
        Self::check_range(a.range.min, a.range.max, "anomaly.range", &mut errors);
        if !(0.0..1.0).contains(&a.pattern.similarity_threshold) {
            errors.push(format!(
                "anomaly.pattern.similarity_threshold ({}) must be within [0, 1)",
                a.pattern.similarity_threshold
            ));
        }
        Self::check_positive(a.pattern.activity_sigma, "anomaly.pattern.activity_sigma", &mut errors);

        let (range_errors, range_warnings) = super::validation::validate_operating_ranges(self);
        errors.extend(range_errors);
        for w in &range_warnings {
            warn!("{}", w);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_positive(value: f64, name: &str, errors: &mut Vec<String>) {
        // NaN comparisons silently pass, so test finiteness first
        if !value.is_finite() {
            errors.push(format!("{name}: value must be finite (got {value})"));
        } else if value <= 0.0 {
            errors.push(format!("{name} must be > 0 (got {value})"));
        }
    }

    fn check_range(min: f64, max: f64, name: &str, errors: &mut Vec<String>) {
        if !min.is_finite() || !max.is_finite() {
            errors.push(format!("{name}: values must be finite (got min={min}, max={max})"));
            return;
        }
        if min >= max {
            errors.push(format!("{name}: min ({min:.3}) must be < max ({max:.3})"));
        }
    }

    fn check_increasing(values: &[f64; 3], name: &str, errors: &mut Vec<String>) {
        if values.iter().any(|v| !v.is_finite()) {
            errors.push(format!("{name}: values must be finite (got {values:?})"));
            return;
        }
        if !values.windows(2).all(|w| w[0] < w[1]) {
            errors.push(format!("{name}: values must be strictly increasing (got {values:?})"));
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Run
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Free-form run name, echoed in logs and output
    #[serde(default = "default_run_name")]
    pub name: String,

    /// Channel the phase aligner, stuck and pattern detectors work on
    #[serde(default = "default_primary_channel")]
    pub primary_channel: String,
}

fn default_run_name() -> String {
    "fermentation-run".to_string()
}
fn default_primary_channel() -> String {
    channels::CO2.to_string()
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            name: default_run_name(),
            primary_channel: default_primary_channel(),
        }
    }
}

// ============================================================================
// Preprocessing
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    #[serde(default)]
    pub imputer: ImputerConfig,
    #[serde(default)]
    pub outliers: OutlierConfig,
    #[serde(default)]
    pub resample: ResampleConfig,
    #[serde(default)]
    pub scaler: ScalerConfig,
}

/// How gaps are filled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImputeMethod {
    Interpolate,
    ForwardFill,
    #[default]
    Both,
}

impl ImputeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interpolate => "interpolate",
            Self::ForwardFill => "forward_fill",
            Self::Both => "both",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImputerConfig {
    #[serde(default)]
    pub method: ImputeMethod,
    /// Longest run of consecutive missing samples filled by interpolation / forward-fill
    #[serde(default = "default_impute_limit")]
    pub limit: usize,
}

fn default_impute_limit() -> usize { 3 }

impl Default for ImputerConfig {
    fn default() -> Self {
        Self {
            method: ImputeMethod::default(),
            limit: default_impute_limit(),
        }
    }
}

/// How outlier bounds are computed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMethod {
    #[default]
    Iqr,
    Zscore,
    /// Compute both, apply IQR
    Both,
}

impl OutlierMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Iqr => "iqr",
            Self::Zscore => "zscore",
            Self::Both => "both",
        }
    }
}

/// What happens to a value outside its bounds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierPolicy {
    #[default]
    Clip,
    Drop,
    Mark,
}

impl OutlierPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clip => "clip",
            Self::Drop => "drop",
            Self::Mark => "mark",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierConfig {
    #[serde(default)]
    pub method: OutlierMethod,
    #[serde(default)]
    pub policy: OutlierPolicy,
    #[serde(default = "default_iqr_multiplier")]
    pub iqr_multiplier: f64,
    #[serde(default = "default_z_threshold")]
    pub z_threshold: f64,
}

fn default_iqr_multiplier() -> f64 { 1.5 }
fn default_z_threshold() -> f64 { 3.0 }

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            method: OutlierMethod::default(),
            policy: OutlierPolicy::default(),
            iqr_multiplier: default_iqr_multiplier(),
            z_threshold: default_z_threshold(),
        }
    }
}

/// Bucket aggregation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    Mean,
    Median,
    /// Mean, then linear interpolation of channels missing within a bucket
    Interpolate,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Median => "median",
            Self::Interpolate => "interpolate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResampleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_resample_interval")]
    pub interval_minutes: u32,
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(default = "default_true")]
    pub per_group: bool,
}

fn default_true() -> bool { true }
fn default_resample_interval() -> u32 { 5 }

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: default_resample_interval(),
            aggregation: Aggregation::default(),
            per_group: true,
        }
    }
}

/// Scaling transform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMethod {
    #[default]
    Standard,
    Minmax,
    Robust,
}

impl ScaleMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Minmax => "minmax",
            Self::Robust => "robust",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScalerConfig {
    /// Off by default: the phase aligner compares raw CO2 against profile peaks
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub method: ScaleMethod,
    #[serde(default)]
    pub per_group: bool,
}

// ============================================================================
// Golden Profiles
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default = "default_duration_hours")]
    pub duration_hours: f64,
    #[serde(default = "default_profile_interval")]
    pub interval_minutes: u32,
    #[serde(default = "default_peak_co2")]
    pub peak_co2_ppm: f64,
    /// Gaussian noise σ on the dissolved oxygen curve
    #[serde(default = "default_oxygen_noise")]
    pub oxygen_noise_std: f64,
    #[serde(default = "default_profile_seed")]
    pub seed: u64,
    /// Load golden profiles from this JSON file instead of synthesizing defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_duration_hours() -> f64 { 168.0 }
fn default_profile_interval() -> u32 { 5 }
fn default_peak_co2() -> f64 { 2000.0 }
fn default_oxygen_noise() -> f64 { 0.5 }
fn default_profile_seed() -> u64 { 42 }

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            duration_hours: default_duration_hours(),
            interval_minutes: default_profile_interval(),
            peak_co2_ppm: default_peak_co2(),
            oxygen_noise_std: default_oxygen_noise(),
            seed: default_profile_seed(),
            path: None,
        }
    }
}

// ============================================================================
// Phase Alignment
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseConfig {
    /// Fractions of the profile peak separating lag / exponential / stationary / decline
    #[serde(default = "default_ratio_breakpoints")]
    pub ratio_breakpoints: [f64; 3],
    /// Absolute primary-channel breakpoints used when no profile matches
    #[serde(default = "default_absolute_breakpoints")]
    pub absolute_breakpoints: [f64; 3],
}

fn default_ratio_breakpoints() -> [f64; 3] { [0.1, 0.5, 0.9] }
fn default_absolute_breakpoints() -> [f64; 3] { [500.0, 1000.0, 1500.0] }

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            ratio_breakpoints: default_ratio_breakpoints(),
            absolute_breakpoints: default_absolute_breakpoints(),
        }
    }
}

// ============================================================================
// Changepoint Detection
// ============================================================================

/// Changepoint statistic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangepointMethod {
    #[default]
    Cusum,
    Window,
    Derivative,
}

impl ChangepointMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cusum => "cusum",
            Self::Window => "window",
            Self::Derivative => "derivative",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangepointConfig {
    #[serde(default)]
    pub method: ChangepointMethod,
    /// Multiple of the population std a statistic must exceed
    #[serde(default = "default_changepoint_threshold")]
    pub threshold: f64,
    /// Upper bound on the half-window of the window method
    #[serde(default = "default_max_window")]
    pub max_window: usize,
}

fn default_changepoint_threshold() -> f64 { 3.0 }
fn default_max_window() -> usize { 50 }

impl Default for ChangepointConfig {
    fn default() -> Self {
        Self {
            method: ChangepointMethod::default(),
            threshold: default_changepoint_threshold(),
            max_window: default_max_window(),
        }
    }
}

// ============================================================================
// Anomaly Detection
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyConfig {
    #[serde(default)]
    pub stuck: StuckConfig,
    #[serde(default)]
    pub spike: SpikeConfig,
    #[serde(default)]
    pub range: RangeConfig,
    #[serde(default)]
    pub pattern: PatternConfig,
}

/// Stuck fermentation: primary channel stops climbing while still low
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StuckConfig {
    /// Rolling window (samples) over the first difference
    #[serde(default = "default_stuck_window")]
    pub window: usize,
    /// Rolling mean rate below which the signal counts as flat
    #[serde(default = "default_stuck_rate")]
    pub rate_threshold: f64,
    /// Value must sit at or below this quantile of the series
    #[serde(default = "default_stuck_quantile")]
    pub level_quantile: f64,
}

fn default_stuck_window() -> usize { 12 }
fn default_stuck_rate() -> f64 { 0.01 }
fn default_stuck_quantile() -> f64 { 0.70 }

impl Default for StuckConfig {
    fn default() -> Self {
        Self {
            window: default_stuck_window(),
            rate_threshold: default_stuck_rate(),
            level_quantile: default_stuck_quantile(),
        }
    }
}

/// Sudden spike on a secondary channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeConfig {
    #[serde(default = "default_spike_channel")]
    pub channel: String,
    /// k in mean(|diff|) + k * std(|diff|)
    #[serde(default = "default_spike_sigma")]
    pub sigma_multiplier: f64,
}

fn default_spike_channel() -> String {
    channels::OXYGEN.to_string()
}
fn default_spike_sigma() -> f64 { 0.5 }

impl Default for SpikeConfig {
    fn default() -> Self {
        Self {
            channel: default_spike_channel(),
            sigma_multiplier: default_spike_sigma(),
        }
    }
}

/// Fixed operating range on one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeConfig {
    #[serde(default = "default_range_channel")]
    pub channel: String,
    #[serde(default = "default_range_min")]
    pub min: f64,
    #[serde(default = "default_range_max")]
    pub max: f64,
}

fn default_range_channel() -> String {
    channels::PRESSURE.to_string()
}
fn default_range_min() -> f64 { 80.0 }
fn default_range_max() -> f64 { 150.0 }

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            channel: default_range_channel(),
            min: default_range_min(),
            max: default_range_max(),
        }
    }
}

/// Deviation from the golden curve, or from the series' own rate band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternConfig {
    /// Flag when cosine similarity drops below `1 - similarity_threshold`
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Band half-width (in σ) for the rate test used without a profile
    #[serde(default = "default_activity_sigma")]
    pub activity_sigma: f64,
}

fn default_similarity_threshold() -> f64 { 0.3 }
fn default_activity_sigma() -> f64 { 3.0 }

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            activity_sigma: default_activity_sigma(),
        }
    }
}
