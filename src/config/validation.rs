//! Config validation: unknown-key detection with Levenshtein suggestions
//! and operating range checks.
//!
//! Two-pass parse: the raw TOML is first walked as a `toml::Value` tree and
//! every key compared against the known field names, emitting warnings with
//! "did you mean?" suggestions. Serde deserialization runs afterwards.
//! Warnings never break a config.

use std::collections::HashSet;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Every valid dotted key path of `EngineConfig`.
///
/// Kept by hand in step with engine_config.rs; new fields go here too.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [run]
        "run",
        "run.name",
        "run.primary_channel",
        // [preprocessing]
        "preprocessing",
        "preprocessing.imputer",
        "preprocessing.imputer.method",
        "preprocessing.imputer.limit",
        "preprocessing.outliers",
        "preprocessing.outliers.method",
        "preprocessing.outliers.policy",
        "preprocessing.outliers.iqr_multiplier",
        "preprocessing.outliers.z_threshold",
        "preprocessing.resample",
        "preprocessing.resample.enabled",
        "preprocessing.resample.interval_minutes",
        "preprocessing.resample.aggregation",
        "preprocessing.resample.per_group",
        "preprocessing.scaler",
        "preprocessing.scaler.enabled",
        "preprocessing.scaler.method",
        "preprocessing.scaler.per_group",
        // [profiles]
        "profiles",
        "profiles.duration_hours",
        "profiles.interval_minutes",
        "profiles.peak_co2_ppm",
        "profiles.oxygen_noise_std",
        "profiles.seed",
        "profiles.path",
        // [phase]
        "phase",
        "phase.ratio_breakpoints",
        "phase.absolute_breakpoints",
        // [changepoint]
        "changepoint",
        "changepoint.method",
        "changepoint.threshold",
        "changepoint.max_window",
        // [anomaly]
        "anomaly",
        "anomaly.stuck",
        "anomaly.stuck.window",
        "anomaly.stuck.rate_threshold",
        "anomaly.stuck.level_quantile",
        "anomaly.spike",
        "anomaly.spike.channel",
        "anomaly.spike.sigma_multiplier",
        "anomaly.range",
        "anomaly.range.channel",
        "anomaly.range.min",
        "anomaly.range.max",
        "anomaly.pattern",
        "anomaly.pattern.similarity_threshold",
        "anomaly.pattern.activity_sigma",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// A table `{ a = { b = 1, c = 2 } }` yields `["a", "a.b", "a.c"]`.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Closest known key within edit distance 3, ties broken alphabetically
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|&k| (levenshtein(unknown, k), k))
        .filter(|(dist, _)| *dist <= 3)
        .min()
        .map(|(_, k)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Warnings for every key in `raw_toml` that `EngineConfig` does not define.
///
/// Unparseable input yields no warnings; serde reports the syntax error.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        return Vec::new();
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Operating Range Validation
// ============================================================================

/// Range checks on a parsed `EngineConfig`.
///
/// Returns (errors, warnings): errors are impossible values, warnings are
/// suspicious but usable.
pub fn validate_operating_ranges(
    config: &super::EngineConfig,
) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let range = &config.anomaly.range;
    if range.channel == crate::types::channels::PRESSURE && range.min < 0.0 {
        errors.push(format!(
            "anomaly.range.min = {:.1} kPa cannot be negative for pressure",
            range.min
        ));
    }

    if config.anomaly.spike.channel == config.run.primary_channel {
        warnings.push(ValidationWarning {
            field: "anomaly.spike.channel".to_string(),
            message: format!(
                "anomaly.spike.channel = '{}' is the primary channel; spikes will track CO2 growth",
                config.anomaly.spike.channel
            ),
            suggestion: None,
        });
    }

    let peak = config.profiles.peak_co2_ppm;
    if !(100.0..=100_000.0).contains(&peak) {
        warnings.push(ValidationWarning {
            field: "profiles.peak_co2_ppm".to_string(),
            message: format!("profiles.peak_co2_ppm = {peak:.0} is outside typical range (100-100000 ppm)"),
            suggestion: None,
        });
    }

    let interval = config.preprocessing.resample.interval_minutes;
    if interval > 24 * 60 {
        warnings.push(ValidationWarning {
            field: "preprocessing.resample.interval_minutes".to_string(),
            message: format!("preprocessing.resample.interval_minutes = {interval} exceeds one day"),
            suggestion: None,
        });
    }

    if config.profiles.duration_hours > 24.0 * 60.0 {
        warnings.push(ValidationWarning {
            field: "profiles.duration_hours".to_string(),
            message: format!(
                "profiles.duration_hours = {:.0} is longer than any realistic fermentation",
                config.profiles.duration_hours
            ),
            suggestion: None,
        });
    }

    (errors, warnings)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn test_levenshtein_one_edit() {
        assert_eq!(levenshtein("treshold", "threshold"), 1);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn test_walk_toml_keys_nested() {
        let toml: toml::Value = r#"
            [anomaly]
            [anomaly.stuck]
            window = 12
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert!(keys.contains(&"anomaly".to_string()));
        assert!(keys.contains(&"anomaly.stuck".to_string()));
        assert!(keys.contains(&"anomaly.stuck.window".to_string()));
    }

    #[test]
    fn test_typo_key_produces_warning_with_suggestion() {
        let toml_str = r#"
[changepoint]
treshold = 2.5
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "changepoint.treshold");
        assert_eq!(warnings[0].suggestion.as_deref(), Some("changepoint.threshold"));
    }

    #[test]
    fn test_valid_keys_produce_zero_warnings() {
        let toml_str = r#"
[run]
name = "tank-3"

[preprocessing.imputer]
limit = 5

[anomaly.spike]
channel = "o2_pct"
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert!(warnings.is_empty(), "Expected 0 warnings, got: {:?}", warnings);
    }

    #[test]
    fn test_garbage_key_has_no_suggestion() {
        let known = known_config_keys();
        assert!(suggest_correction("completely_unrelated_garbage_key_xyz", &known).is_none());
    }

    #[test]
    fn test_operating_ranges_defaults_clean() {
        let (errors, warnings) = validate_operating_ranges(&EngineConfig::default());
        assert!(errors.is_empty(), "Defaults should produce no errors: {:?}", errors);
        assert!(warnings.is_empty(), "Defaults should produce no warnings: {:?}", warnings);
    }

    #[test]
    fn test_negative_pressure_floor_is_error() {
        let mut config = EngineConfig::default();
        config.anomaly.range.min = -5.0;
        let (errors, _) = validate_operating_ranges(&config);
        assert!(errors.iter().any(|e| e.contains("anomaly.range.min")));
    }

    #[test]
    fn test_spike_on_primary_channel_warns() {
        let mut config = EngineConfig::default();
        config.anomaly.spike.channel = "co2_ppm".to_string();
        let (errors, warnings) = validate_operating_ranges(&config);
        assert!(errors.is_empty());
        assert!(warnings.iter().any(|w| w.field == "anomaly.spike.channel"));
    }
}
