//! Engine Configuration Module
//!
//! Run-wide tunables loaded from TOML, replacing hardcoded thresholds in the
//! preprocessing stages, the phase aligner and the detectors.
//!
//! ## Loading Order
//!
//! 1. `FERMENTWATCH_CONFIG` environment variable (path to TOML file)
//! 2. `fermentwatch.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! ```ignore
//! // In main():
//! config::init(EngineConfig::load());
//!
//! // Anywhere in the codebase:
//! let limit = config::get().preprocessing.imputer.limit;
//! ```

mod engine_config;
pub mod validation;

pub use engine_config::*;

use std::sync::OnceLock;

/// Global engine configuration, initialized once at startup.
static ENGINE_CONFIG: OnceLock<EngineConfig> = OnceLock::new();

/// Initialize the global engine configuration.
///
/// A second call is ignored with a warning.
pub fn init(config: EngineConfig) {
    if ENGINE_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// Global engine configuration.
///
/// Falls back to (and pins) the built-in defaults when `init()` was never
/// called, so library users and tests need no setup.
pub fn get() -> &'static EngineConfig {
    ENGINE_CONFIG.get_or_init(EngineConfig::default)
}

/// Check whether the config has been initialized.
pub fn is_initialized() -> bool {
    ENGINE_CONFIG.get().is_some()
}
