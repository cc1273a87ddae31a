//! Config Validation Tests
//!
//! Typo detection (unknown keys with suggestions) and range validation,
//! exercised through the public config API.

use fermentwatch::config::validation::{
    known_config_keys, suggest_correction, validate_operating_ranges, validate_unknown_keys,
};
use fermentwatch::config::{
    self, ChangepointMethod, ConfigError, EngineConfig, ImputeMethod, OutlierPolicy,
};

// ============================================================================
// Typo Detection
// ============================================================================

#[test]
fn typo_in_stuck_threshold_warns_with_suggestion() {
    let toml_str = r#"
[anomaly.stuck]
rate_treshold = 0.02
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1, "Expected exactly 1 warning");
    assert!(warnings[0].field.contains("rate_treshold"));
    assert_eq!(
        warnings[0].suggestion.as_deref(),
        Some("anomaly.stuck.rate_threshold")
    );
}

#[test]
fn typo_in_run_section_warns() {
    let toml_str = r#"
[run]
naem = "tank-7"
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].suggestion.as_deref(), Some("run.name"));
}

#[test]
fn valid_config_produces_zero_warnings() {
    let toml_str = r#"
[run]
name = "cellar-a"
primary_channel = "co2_ppm"

[preprocessing.imputer]
method = "forward_fill"
limit = 2

[preprocessing.outliers]
policy = "mark"

[changepoint]
method = "window"
threshold = 2.5

[anomaly.range]
channel = "pressure_kpa"
min = 90.0
max = 140.0
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
}

#[test]
fn unrelated_key_gets_no_suggestion() {
    let warnings = validate_unknown_keys("completely_unrelated_section = 1\n");
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].suggestion.is_none());
}

#[test]
fn every_default_key_is_known() {
    let known = known_config_keys();
    let toml_str = EngineConfig::default().to_toml().unwrap();
    for w in validate_unknown_keys(&toml_str) {
        panic!("default config emitted unknown key {}", w.field);
    }
    assert!(known.contains("anomaly.pattern.similarity_threshold"));
}

#[test]
fn suggestion_prefers_closest_key() {
    let known = known_config_keys();
    assert_eq!(
        suggest_correction("changepoint.treshold", &known).as_deref(),
        Some("changepoint.threshold")
    );
}

// ============================================================================
// Parsing and Range Validation
// ============================================================================

#[test]
fn partial_config_fills_defaults() {
    let config = EngineConfig::from_toml_str(
        r#"
[preprocessing.imputer]
method = "interpolate"

[changepoint]
method = "derivative"
"#,
    )
    .unwrap();
    assert_eq!(config.preprocessing.imputer.method, ImputeMethod::Interpolate);
    assert_eq!(config.preprocessing.imputer.limit, 3);
    assert_eq!(config.preprocessing.outliers.policy, OutlierPolicy::Clip);
    assert_eq!(config.changepoint.method, ChangepointMethod::Derivative);
    assert_eq!(config.anomaly.stuck.window, 12);
}

#[test]
fn inverted_range_is_rejected() {
    let err = EngineConfig::from_toml_str(
        r#"
[anomaly.range]
min = 150.0
max = 80.0
"#,
    )
    .unwrap_err();
    match err {
        ConfigError::Validation(errors) => {
            assert!(errors.iter().any(|e| e.contains("anomaly.range")), "{errors:?}");
        }
        other => panic!("expected validation error, got {other}"),
    }
}

#[test]
fn non_increasing_breakpoints_are_rejected() {
    let result = EngineConfig::from_toml_str(
        r#"
[phase]
ratio_breakpoints = [0.1, 0.9, 0.5]
"#,
    );
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn negative_pressure_min_is_an_error() {
    let mut config = EngineConfig::default();
    config.anomaly.range.min = -5.0;
    let (errors, _) = validate_operating_ranges(&config);
    assert_eq!(errors.len(), 1);
}

#[test]
fn spike_on_primary_channel_warns() {
    let mut config = EngineConfig::default();
    config.anomaly.spike.channel = "co2_ppm".to_string();
    let (errors, warnings) = validate_operating_ranges(&config);
    assert!(errors.is_empty());
    assert!(warnings.iter().any(|w| w.field == "anomaly.spike.channel"));
}

#[test]
fn save_and_reload_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("fermentwatch.toml");

    let mut config = EngineConfig::default();
    config.run.name = "cellar-b".to_string();
    config.anomaly.spike.sigma_multiplier = 0.75;
    config.save_to_file(&path).unwrap();

    let loaded = EngineConfig::load_from_file(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn malformed_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[run\nname = ").unwrap();

    let err = EngineConfig::load_from_file(&path).unwrap_err();
    assert!(err.to_string().contains("broken.toml"));
}

// ============================================================================
// Global Config
// ============================================================================

// Only test in this binary that touches the process-wide config
#[test]
fn global_config_is_set_once() {
    assert!(!config::is_initialized());

    let mut first = EngineConfig::default();
    first.run.name = "cellar-global".to_string();
    config::init(first);
    assert!(config::is_initialized());

    config::init(EngineConfig::default());
    assert_eq!(config::get().run.name, "cellar-global");
}
