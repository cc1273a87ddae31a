//! fermentwatch: Fermentation Tank Time-Series Engine
//!
//! Cleans multi-tank sensor streams, labels fermentation phases against
//! golden reference curves, finds changepoints, and flags anomalies.
//!
//! ## Architecture
//!
//! - **Preprocessing**: composable fit/transform estimators (imputer,
//!   outlier bounder, resampler, scaler) chained by a [`Pipeline`]
//! - **Profiles**: golden curves per (strain, style)
//! - **Phase**: profile-relative phase labelling with absolute fallback
//! - **Changepoint**: CUSUM / window / derivative detectors
//! - **Anomaly**: four rule detectors merged into a deduplicated timeline
//! - **Analytics**: per-batch metrics and cross-batch comparison

pub mod analytics;
pub mod anomaly;
pub mod changepoint;
pub mod config;
pub mod coordinator;
pub mod ingest;
pub mod phase;
pub mod preprocessing;
pub mod profiles;
pub mod stats;
pub mod types;
pub mod validation;

// Re-export configuration
pub use config::{ConfigError, EngineConfig};

// Re-export commonly used types
pub use types::{
    channels, AnomalyKind, AnomalyRecord, Diagnostic, Frame, PhaseLabel, Reading, Severity,
    StageReport, StageStatus,
};

// Re-export stages
pub use anomaly::{AnomalyEngine, AnomalySummary};
pub use changepoint::ChangepointDetector;
pub use coordinator::{AnalysisCoordinator, AnalysisReport};
pub use phase::PhaseAligner;
pub use preprocessing::{Estimator, Pipeline, PreprocessError, SchemaMapper};
pub use profiles::{GoldenProfile, GoldenProfileStore, ProfileError};
pub use validation::DataValidator;
