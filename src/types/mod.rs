//! Shared data structures for fermentation time-series analysis
//!
//! - `Reading` / `Frame`: timestamped multi-channel observations and the ordered table
//! - `PhaseLabel`: fermentation phase assigned by the phase aligner
//! - `AnomalyRecord`: detector output with severity
//! - `StageReport`: what each preprocessing stage or detector did

mod reading;
mod phase;
mod anomaly;
mod report;

pub use reading::*;
pub use phase::*;
pub use anomaly::*;
pub use report::*;
