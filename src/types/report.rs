//! Per-stage processing reports

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Outcome of a pipeline stage or detector run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum StageStatus {
    Ok,
    Skipped(String),
    Failed(String),
}

impl StageStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Skipped(reason) => write!(f, "skipped({reason})"),
            Self::Failed(msg) => write!(f, "failed({msg})"),
        }
    }
}

/// What a stage did: its parameters, what it touched, and how it ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    pub method: String,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub counts: BTreeMap<String, usize>,
    pub status: StageStatus,
}

impl StageReport {
    pub fn new(stage: &str, method: &str) -> Self {
        Self {
            stage: stage.to_string(),
            method: method.to_string(),
            parameters: BTreeMap::new(),
            counts: BTreeMap::new(),
            status: StageStatus::Ok,
        }
    }

    #[must_use]
    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn with_count(mut self, key: &str, count: usize) -> Self {
        self.counts.insert(key.to_string(), count);
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: StageStatus) -> Self {
        self.status = status;
        self
    }

    pub fn count(&self, key: &str) -> usize {
        self.counts.get(key).copied().unwrap_or(0)
    }
}
