//! Anomaly Scenarios
//!
//! Fault patterns a cellar actually sees, run through the full detector set:
//! a stalled ferment, head-pressure excursions, oxygen ingress and a batch
//! whose CO2 curve has the wrong shape.

use chrono::{DateTime, Duration, TimeZone, Utc};
use fermentwatch::anomaly::{AnomalyEngine, PatternDetector, SpikeDetector};
use fermentwatch::config::EngineConfig;
use fermentwatch::profiles::{create_profile, GoldenProfileStore, ProfileSynthesis};
use fermentwatch::types::{channels, AnomalyKind, Frame, Reading, Severity};

fn t(i: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(5 * i as i64)
}

fn single(channel: &str, values: &[f64]) -> Frame {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| Reading::new(t(i)).with_channel(channel, *v))
        .collect()
}

fn synthesis() -> ProfileSynthesis {
    ProfileSynthesis {
        duration_hours: 24.0,
        ..ProfileSynthesis::default()
    }
}

#[test]
fn flat_co2_is_a_stuck_fermentation() {
    let mut engine = AnomalyEngine::default();
    let records = engine.detect_all(&single(channels::CO2, &[50.0; 20]), None);

    assert_eq!(records.len(), 19);
    assert!(records.iter().all(|r| r.kind == AnomalyKind::StuckFermentation));
    assert!(records.iter().all(|r| r.severity == Severity::High));
    // no rate is known for the first row
    assert_eq!(records[0].timestamp, t(1));
}

#[test]
fn stuck_row_with_pressure_excursion_is_reported_once() {
    let data: Frame = (0..20)
        .map(|i| {
            let pressure = if i == 5 { 185.0 } else { 110.0 };
            Reading::new(t(i))
                .with_group("T01")
                .with_channel(channels::CO2, 50.0)
                .with_channel(channels::PRESSURE, pressure)
        })
        .collect();

    let mut engine = AnomalyEngine::default();
    engine.detect_all(&data, None);
    let summary = engine.summary();

    assert_eq!(summary.raw_total, 20);
    assert_eq!(summary.total, 19);
    let row5: Vec<_> = engine.records().iter().filter(|r| r.timestamp == t(5)).collect();
    assert_eq!(row5.len(), 1);
    assert_eq!(row5[0].label, "stuck_fermentation");
    assert!(engine.raw_records().iter().any(|r| r.label == "high_pressure"));
}

#[test]
fn pressure_excursions_land_on_the_timeline_in_order() {
    let mut pressure = vec![110.0; 30];
    pressure[20] = 60.0;
    for p in &mut pressure[10..13] {
        *p = 185.0;
    }
    let data = single(channels::PRESSURE, &pressure);

    let mut engine = AnomalyEngine::default();
    let merged: Vec<String> = engine.detect_all(&data, None).iter().map(|r| r.label.clone()).collect();
    // highs are emitted before lows
    assert_eq!(merged, vec!["high_pressure", "high_pressure", "high_pressure", "low_pressure"]);

    let timeline = engine.timeline();
    assert_eq!(timeline.len(), 4);
    assert!(timeline.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(timeline[3].severity, Severity::Medium);
    assert_eq!(timeline[3].value, Some(60.0));
}

#[test]
fn oxygen_ingress_flags_only_the_rise() {
    let mut o2 = vec![20.0; 30];
    o2[15] = 26.0;
    let mut engine = AnomalyEngine::with_detectors(vec![Box::new(SpikeDetector::default())]);
    let records = engine.detect_all(&single(channels::OXYGEN, &o2), None);

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].timestamp, t(15));
    assert_eq!(records[0].label, "oxidation_risk");
}

#[test]
fn doubling_co2_trips_spike_rule_when_pointed_at_co2() {
    let mut config = EngineConfig::default();
    config.anomaly.spike.channel = channels::CO2.to_string();
    let values: Vec<f64> = (0..10).map(|i| 100.0 * 2f64.powi(i)).collect();

    let mut engine = AnomalyEngine::from_config(&config);
    engine.detect_all(&single(channels::CO2, &values), None);
    let spikes: Vec<f64> = engine
        .records()
        .iter()
        .filter(|r| r.kind == AnomalyKind::OxidationRisk)
        .filter_map(|r| r.value)
        .collect();

    assert_eq!(spikes, vec![25600.0, 51200.0]);
    assert_eq!(engine.summary().by_label.get("stuck_fermentation"), None);
}

#[test]
fn misshapen_batch_deviates_from_its_golden_profile() {
    let profile = create_profile("ale", "ipa", &synthesis()).unwrap();
    let golden = profile.co2_curve();
    let n = golden.len();

    let mut rows = Vec::new();
    for (i, v) in golden.iter().enumerate() {
        rows.push(
            Reading::new(t(i))
                .with_group("T01")
                .with_metadata("ale", "ipa")
                .with_channel(channels::CO2, *v),
        );
        // T02 peaks immediately and then idles
        let bad = if i < n / 10 { 2000.0 } else { 1.0 };
        rows.push(
            Reading::new(t(i))
                .with_group("T02")
                .with_metadata("ale", "ipa")
                .with_channel(channels::CO2, bad),
        );
    }
    let data: Frame = rows.into_iter().collect();
    let store = GoldenProfileStore::with_defaults(&synthesis()).unwrap();

    let mut engine = AnomalyEngine::with_detectors(vec![Box::new(PatternDetector::default())]);
    let records = engine.detect_all(&data, Some(&store));

    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.group.as_deref(), Some("T02"));
    assert_eq!(record.label, "abnormal_co2_pattern");
    assert_eq!(record.timestamp, t(0));
    assert_eq!(record.ends_at, Some(t(n - 1)));
}

#[test]
fn unknown_recipe_falls_back_to_default_profile() {
    let store = GoldenProfileStore::with_defaults(&synthesis()).unwrap();
    let golden = store.get("default", "default").unwrap().co2_curve();
    let data: Frame = golden
        .iter()
        .enumerate()
        .map(|(i, v)| {
            Reading::new(t(i))
                .with_metadata("kveik", "farmhouse")
                .with_channel(channels::CO2, *v)
        })
        .collect();

    let mut engine = AnomalyEngine::with_detectors(vec![Box::new(PatternDetector::default())]);
    // the per-row rate rule would flag the phase seams in this curve
    assert!(engine.detect_all(&data, Some(&store)).is_empty());
}
