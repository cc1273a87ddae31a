//! Pipeline Regression Tests
//!
//! Runs simulated multi-tank batches through ingestion, schema mapping and
//! the standard preprocessing pipeline, and asserts on data integrity:
//! gaps filled, bounds respected, grid kept, every row labelled.

use chrono::{Duration, TimeZone, Utc};
use fermentwatch::config::{EngineConfig, ScaleMethod};
use fermentwatch::ingest;
use fermentwatch::preprocessing::{Pipeline, SchemaMapper};
use fermentwatch::profiles::{create_profile, GoldenProfileStore, ProfileSynthesis};
use fermentwatch::types::{channels, Frame, PhaseLabel, Reading, StageStatus};
use fermentwatch::AnalysisCoordinator;

fn synthesis() -> ProfileSynthesis {
    ProfileSynthesis {
        duration_hours: 24.0,
        ..ProfileSynthesis::default()
    }
}

/// Two tanks following the golden curve on a 5-minute grid
fn two_tanks() -> Frame {
    let profile = create_profile("ale", "ipa", &synthesis()).unwrap();
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
    let mut rows = Vec::new();
    for (tank, scale) in [("T1", 1.0), ("T2", 0.8)] {
        for s in &profile.samples {
            rows.push(
                Reading::new(start + Duration::minutes(s.time_minutes as i64))
                    .with_group(tank)
                    .with_metadata("ale", "ipa")
                    .with_channel(channels::CO2, s.co2_ppm * scale)
                    .with_channel(channels::OXYGEN, s.o2_pct)
                    .with_channel(channels::TEMPERATURE, s.process_temp_c)
                    .with_channel(channels::PRESSURE, s.pressure_kpa),
            );
        }
    }
    rows.into_iter().collect()
}

fn store() -> GoldenProfileStore {
    GoldenProfileStore::with_defaults(&synthesis()).unwrap()
}

#[test]
fn gap_free_grid_passes_through_unchanged_in_shape() {
    let data = two_tanks();
    let config = EngineConfig::default();
    let store = store();
    let mut pipeline = Pipeline::standard(&config, Some(&store));
    let out = pipeline.fit_transform(&data);

    assert_eq!(out.len(), data.len(), "on-grid data keeps its row count");
    assert!(pipeline.reports().iter().all(|r| r.status.is_ok()));
    assert_eq!(
        pipeline.step_names(),
        vec!["imputer", "outliers", "resampler", "phase_aligner"]
    );
}

#[test]
fn gaps_are_filled_and_every_row_labelled() {
    let mut readings = two_tanks().into_readings();
    for i in (10..readings.len()).step_by(37) {
        readings[i].set_value(channels::CO2, None);
    }
    let data: Frame = readings.into_iter().collect();

    let store = store();
    let mut pipeline = Pipeline::standard(&EngineConfig::default(), Some(&store));
    let out = pipeline.fit_transform(&data);

    assert!(out.column(channels::CO2).iter().all(Option::is_some));
    assert!(out.iter().all(|r| r.phase.is_some()));
    let labels: std::collections::BTreeSet<PhaseLabel> = out.iter().filter_map(|r| r.phase).collect();
    assert!(labels.contains(&PhaseLabel::Lag));
    assert!(labels.contains(&PhaseLabel::Stationary) || labels.contains(&PhaseLabel::Decline));
}

#[test]
fn clipped_values_stay_within_bounds() {
    let mut readings = two_tanks().into_readings();
    readings[50].set_value(channels::PRESSURE, Some(10_000.0));
    readings[60].set_value(channels::PRESSURE, Some(-500.0));
    let data: Frame = readings.into_iter().collect();

    let mut pipeline = Pipeline::standard(&EngineConfig::default(), None);
    let out = pipeline.fit_transform(&data);
    let pressure: Vec<f64> = out.column(channels::PRESSURE).into_iter().flatten().collect();
    let max = pressure.iter().copied().fold(f64::MIN, f64::max);
    let min = pressure.iter().copied().fold(f64::MAX, f64::min);
    assert!(max < 10_000.0);
    assert!(min > -500.0);

    let outliers = pipeline.reports().iter().find(|r| r.stage == "outliers").unwrap();
    assert!(outliers.count("pressure_kpa_outliers") >= 2);
}

#[test]
fn scaler_runs_when_enabled() {
    let mut config = EngineConfig::default();
    config.preprocessing.scaler.enabled = true;
    config.preprocessing.scaler.method = ScaleMethod::Standard;

    let mut pipeline = Pipeline::standard(&config, None);
    let out = pipeline.fit_transform(&two_tanks());
    let co2: Vec<f64> = out.column(channels::CO2).into_iter().flatten().collect();
    let mean = co2.iter().sum::<f64>() / co2.len() as f64;
    assert!(mean.abs() < 1e-6, "standardized mean was {mean}");
    assert!(pipeline.step_names().contains(&"scaler"));
}

#[test]
fn missing_primary_channel_skips_without_failing() {
    let data: Frame = (0..20)
        .map(|i| {
            Reading::new(Utc.timestamp_opt(i * 300, 0).unwrap())
                .with_channel(channels::PRESSURE, 100.0 + i as f64)
        })
        .collect();
    let mut coordinator = AnalysisCoordinator::with_profiles(&EngineConfig::default(), store());
    let report = coordinator.analyze(&data);

    assert_eq!(report.rows_out, 20);
    let stuck = report.detectors.iter().find(|r| r.stage == "stuck").unwrap();
    assert!(matches!(stuck.status, StageStatus::Skipped(_)));
    assert!(report.changepoints.iter().all(|c| c.result.changepoint_count == 0));
}

#[test]
fn telemetry_csv_runs_end_to_end() {
    let canonical = two_tanks();
    let external = SchemaMapper::new().to_external(&canonical);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tanks.csv");
    ingest::write_csv_file(&external, &path).unwrap();

    let (raw, summary) = ingest::read_csv(&path).unwrap();
    assert_eq!(summary.groups, 2);
    assert!(raw.has_channel("pressure_bar"));

    let mut coordinator = AnalysisCoordinator::with_profiles(&EngineConfig::default(), store());
    let report = coordinator.analyze(&raw);

    assert!(report.validation.passed, "{:?}", report.validation.errors);
    assert_eq!(report.schema.count("renamed:pressure_bar"), raw.len());
    assert_eq!(report.rows_out, raw.len());
    assert_eq!(report.analytics.batches.len(), 2);
    assert_eq!(report.phase_counts.values().sum::<usize>(), report.rows_out);

    let json = serde_json::to_value(&report).unwrap();
    assert!(json["timeline"].is_array());
    assert!(json["anomaly_summary"]["by_severity"].is_object());
}
