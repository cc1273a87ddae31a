//! Data Validator
//!
//! Declarative checks run against a raw frame before preprocessing. A failed
//! rule is reported, never fatal: the caller decides whether to continue.
//!
//! Rules:
//! - `schema`: column present, optionally with no missing values
//! - `range`: present values within `[min, max]`
//! - `duplicate_timestamps`: no repeated timestamp (per group if asked)
//! - `missing_fraction`: no channel missing more than `threshold` of rows
//! - `outliers`: at most 5 % of rows outside IQR or z-score bounds

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{EngineConfig, OutlierMethod};
use crate::stats;
use crate::types::Frame;

/// Fraction of rows that may be outliers before the rule fails
pub const MAX_OUTLIER_FRACTION: f64 = 0.05;

const IQR_MULTIPLIER: f64 = 1.5;
const Z_LIMIT: f64 = 3.0;

/// Name under which the timestamp column is addressed by schema rules
pub const TIMESTAMP_COLUMN: &str = "timestamp";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rule {
    Schema {
        column: String,
        #[serde(default)]
        nullable: bool,
    },
    Range {
        column: String,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    DuplicateTimestamps {
        #[serde(default)]
        per_group: bool,
    },
    MissingFraction {
        threshold: f64,
    },
    Outliers {
        column: String,
        #[serde(default)]
        method: OutlierMethod,
    },
}

impl Rule {
    pub fn name(&self) -> String {
        match self {
            Self::Schema { column, .. } => format!("schema_{column}"),
            Self::Range { column, .. } => format!("range_{column}"),
            Self::DuplicateTimestamps { .. } => "duplicate_timestamps".to_string(),
            Self::MissingFraction { .. } => "missing_detection".to_string(),
            Self::Outliers { column, .. } => format!("outlier_{column}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule: String,
    pub passed: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleFailure {
    pub rule: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub errors: Vec<RuleFailure>,
    pub rule_results: Vec<RuleResult>,
}

/// Evaluate one rule against a frame
pub fn evaluate(rule: &Rule, data: &Frame) -> RuleResult {
    let outcome = match rule {
        Rule::Schema { column, nullable } => check_schema(data, column, *nullable),
        Rule::Range { column, min, max } => check_range(data, column, *min, *max),
        Rule::DuplicateTimestamps { per_group } => check_duplicates(data, *per_group),
        Rule::MissingFraction { threshold } => check_missing(data, *threshold),
        Rule::Outliers { column, method } => check_outliers(data, column, *method),
    };
    RuleResult {
        rule: rule.name(),
        passed: outcome.is_ok(),
        message: outcome.err(),
    }
}

type Check = Result<(), String>;

fn check_schema(data: &Frame, column: &str, nullable: bool) -> Check {
    if column == TIMESTAMP_COLUMN {
        return Ok(());
    }
    if !data.has_channel(column) {
        return Err(format!("Column {column} missing"));
    }
    let nulls = data.column(column).iter().filter(|v| v.is_none()).count();
    if !nullable && nulls > 0 {
        return Err(format!("Column {column} has {nulls} null values"));
    }
    Ok(())
}

fn check_range(data: &Frame, column: &str, min: Option<f64>, max: Option<f64>) -> Check {
    if !data.has_channel(column) {
        return Err(format!("Column {column} missing"));
    }
    let values: Vec<f64> = data.column(column).into_iter().flatten().collect();
    let mut violations = Vec::new();
    if let Some(lo) = min {
        let below = values.iter().filter(|&&v| v < lo).count();
        if below > 0 {
            violations.push(format!("{below} values below minimum {lo}"));
        }
    }
    if let Some(hi) = max {
        let above = values.iter().filter(|&&v| v > hi).count();
        if above > 0 {
            violations.push(format!("{above} values above maximum {hi}"));
        }
    }
    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations.join("; "))
    }
}

fn check_duplicates(data: &Frame, per_group: bool) -> Check {
    let mut seen: HashMap<(Option<&str>, i64), usize> = HashMap::new();
    for r in data.iter() {
        let group = if per_group { r.group.as_deref() } else { None };
        *seen.entry((group, r.timestamp.timestamp_millis())).or_insert(0) += 1;
    }
    let duplicated = seen.values().filter(|&&n| n > 1).count();
    if duplicated > 0 {
        Err(format!("{duplicated} duplicate timestamps found"))
    } else {
        Ok(())
    }
}

fn check_missing(data: &Frame, threshold: f64) -> Check {
    if data.is_empty() {
        return Ok(());
    }
    let rows = data.len() as f64;
    let high: Vec<String> = data
        .channel_names()
        .into_iter()
        .filter(|ch| {
            let missing = data.column(ch).iter().filter(|v| v.is_none()).count();
            missing as f64 / rows > threshold
        })
        .collect();
    if high.is_empty() {
        Ok(())
    } else {
        Err(format!("Columns with >{}% missing: {}", threshold * 100.0, high.join(", ")))
    }
}

fn check_outliers(data: &Frame, column: &str, method: OutlierMethod) -> Check {
    if !data.has_channel(column) || data.is_empty() {
        return Ok(());
    }
    let values: Vec<f64> = data.column(column).into_iter().flatten().collect();

    let iqr_bounds = || -> Option<(f64, f64)> {
        let q1 = stats::quantile(&values, 0.25)?;
        let q3 = stats::quantile(&values, 0.75)?;
        let iqr = q3 - q1;
        Some((q1 - IQR_MULTIPLIER * iqr, q3 + IQR_MULTIPLIER * iqr))
    };
    let z_bounds = || -> Option<(f64, f64)> {
        let mean = stats::mean(&values)?;
        let std = stats::sample_std(&values).filter(|s| *s > 0.0)?;
        Some((mean - Z_LIMIT * std, mean + Z_LIMIT * std))
    };
    let bounds = match method {
        OutlierMethod::Iqr | OutlierMethod::Both => iqr_bounds(),
        OutlierMethod::Zscore => z_bounds(),
    };
    let outliers = bounds.map_or(0, |(lo, hi)| values.iter().filter(|&&v| v < lo || v > hi).count());
    let rows = data.len() as f64;
    if outliers as f64 > rows * MAX_OUTLIER_FRACTION {
        Err(format!(
            "{outliers} outliers detected in {column} ({:.1}%)",
            outliers as f64 / rows * 100.0
        ))
    } else {
        Ok(())
    }
}

/// Ordered rule set plus the results of every run
#[derive(Debug, Clone, Default)]
pub struct DataValidator {
    rules: Vec<Rule>,
    history: Vec<ValidationResult>,
}

impl DataValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules the CLI applies to raw input
    pub fn from_config(config: &EngineConfig) -> Self {
        let primary = config.run.primary_channel.clone();
        Self::new()
            .with_rule(Rule::Schema { column: primary.clone(), nullable: true })
            .with_rule(Rule::DuplicateTimestamps { per_group: true })
            .with_rule(Rule::MissingFraction { threshold: 0.1 })
            .with_rule(Rule::Outliers { column: primary, method: config.preprocessing.outliers.method })
    }

    #[must_use]
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Run every rule in order and retain the result
    pub fn validate(&mut self, data: &Frame) -> ValidationResult {
        let rule_results: Vec<RuleResult> = self.rules.iter().map(|r| evaluate(r, data)).collect();
        let errors: Vec<RuleFailure> = rule_results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| RuleFailure {
                rule: r.rule.clone(),
                message: r.message.clone().unwrap_or_else(|| format!("{} failed", r.rule)),
            })
            .collect();

        for e in &errors {
            warn!(rule = %e.rule, message = %e.message, "Validation rule failed");
        }
        info!(rules = rule_results.len(), failed = errors.len(), rows = data.len(), "Validation complete");

        let result = ValidationResult {
            passed: errors.is_empty(),
            errors,
            rule_results,
        };
        self.history.push(result.clone());
        result
    }

    pub fn history(&self) -> &[ValidationResult] {
        &self.history
    }

    /// Failure counts per rule name across all runs
    pub fn failure_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for e in self.history.iter().flat_map(|r| &r.errors) {
            *counts.entry(e.rule.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Plain-text report of every run
    pub fn report(&self) -> String {
        if self.history.is_empty() {
            return "No validation results available.".to_string();
        }
        let mut out = String::from("=== DATA VALIDATION REPORT ===\n\n");
        for (i, run) in self.history.iter().enumerate() {
            let _ = writeln!(out, "Validation Run {}:", i + 1);
            let _ = writeln!(out, "Status: {}", if run.passed { "PASSED" } else { "FAILED" });
            let _ = writeln!(out, "Errors: {}", run.errors.len());
            if !run.errors.is_empty() {
                out.push_str("\nErrors:\n");
                for e in &run.errors {
                    let _ = writeln!(out, "  - {}: {}", e.rule, e.message);
                }
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{channels, Reading};
    use chrono::{TimeZone, Utc};

    fn frame(values: &[Option<f64>]) -> Frame {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let r = Reading::new(Utc.timestamp_opt(i as i64 * 60, 0).unwrap()).with_group("T1");
                match v {
                    Some(x) => r.with_channel(channels::CO2, *x),
                    None => r.with_missing(channels::CO2),
                }
            })
            .collect()
    }

    #[test]
    fn test_schema_rule() {
        let data = frame(&[Some(1.0), None]);
        let strict = Rule::Schema { column: channels::CO2.into(), nullable: false };
        let relaxed = Rule::Schema { column: channels::CO2.into(), nullable: true };
        let absent = Rule::Schema { column: "gravity".into(), nullable: true };

        assert_eq!(evaluate(&strict, &data).message.as_deref(), Some("Column co2_ppm has 1 null values"));
        assert!(evaluate(&relaxed, &data).passed);
        assert!(!evaluate(&absent, &data).passed);
        assert!(evaluate(&Rule::Schema { column: "timestamp".into(), nullable: false }, &data).passed);
    }

    #[test]
    fn test_range_rule_reports_both_sides() {
        let data = frame(&[Some(-1.0), Some(5.0), Some(50.0), None]);
        let rule = Rule::Range { column: channels::CO2.into(), min: Some(0.0), max: Some(10.0) };
        let result = evaluate(&rule, &data);
        assert!(!result.passed);
        assert_eq!(
            result.message.as_deref(),
            Some("1 values below minimum 0; 1 values above maximum 10")
        );
    }

    #[test]
    fn test_duplicates_respect_groups() {
        let t = Utc.timestamp_opt(0, 0).unwrap();
        let data: Frame = vec![
            Reading::new(t).with_group("T1").with_channel(channels::CO2, 1.0),
            Reading::new(t).with_group("T2").with_channel(channels::CO2, 1.0),
        ]
        .into_iter()
        .collect();
        assert!(evaluate(&Rule::DuplicateTimestamps { per_group: true }, &data).passed);
        assert!(!evaluate(&Rule::DuplicateTimestamps { per_group: false }, &data).passed);
    }

    #[test]
    fn test_missing_fraction() {
        let data = frame(&[Some(1.0), None, Some(2.0), Some(3.0)]);
        assert!(!evaluate(&Rule::MissingFraction { threshold: 0.1 }, &data).passed);
        assert!(evaluate(&Rule::MissingFraction { threshold: 0.25 }, &data).passed);
    }

    #[test]
    fn test_outlier_rule_tolerates_five_percent() {
        let mut values: Vec<Option<f64>> = (0..100).map(|i| Some(10.0 + (i % 5) as f64)).collect();
        values[0] = Some(1000.0);
        let rule = Rule::Outliers { column: channels::CO2.into(), method: OutlierMethod::Iqr };
        assert!(evaluate(&rule, &frame(&values)).passed);

        for v in values.iter_mut().take(10) {
            *v = Some(1000.0);
        }
        let result = evaluate(&rule, &frame(&values));
        assert!(!result.passed);
        assert!(result.message.unwrap().starts_with("10 outliers detected in co2_ppm"));
    }

    #[test]
    fn test_outlier_rule_skips_absent_column() {
        let rule = Rule::Outliers { column: "gravity".into(), method: OutlierMethod::Zscore };
        assert!(evaluate(&rule, &frame(&[Some(1.0)])).passed);
    }

    #[test]
    fn test_validator_keeps_history() {
        let mut validator = DataValidator::new()
            .with_rule(Rule::Schema { column: channels::CO2.into(), nullable: false })
            .with_rule(Rule::MissingFraction { threshold: 0.5 });

        let first = validator.validate(&frame(&[Some(1.0), Some(2.0)]));
        assert!(first.passed);
        let second = validator.validate(&frame(&[Some(1.0), None]));
        assert!(!second.passed);
        assert_eq!(second.errors.len(), 1);
        assert_eq!(second.errors[0].rule, "schema_co2_ppm");
        assert_eq!(second.rule_results.len(), 2);

        assert_eq!(validator.history().len(), 2);
        assert_eq!(validator.failure_counts().get("schema_co2_ppm"), Some(&1));
        let report = validator.report();
        assert!(report.contains("Validation Run 2:"));
        assert!(report.contains("Status: FAILED"));
    }

    #[test]
    fn test_rules_parse_from_toml() {
        #[derive(Deserialize)]
        struct Doc {
            rules: Vec<Rule>,
        }
        let doc: Doc = toml::from_str(
            r#"
            [[rules]]
            kind = "range"
            column = "pressure_kpa"
            min = 0.0

            [[rules]]
            kind = "outliers"
            column = "co2_ppm"
            method = "zscore"
            "#,
        )
        .unwrap();
        assert_eq!(doc.rules[0].name(), "range_pressure_kpa");
        assert_eq!(doc.rules[1], Rule::Outliers { column: "co2_ppm".into(), method: OutlierMethod::Zscore });
    }
}
