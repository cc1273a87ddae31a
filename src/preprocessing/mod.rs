//! Preprocessing - turns raw, irregular, gappy readings into an analyzable signal
//!
//! Every stage implements [`Estimator`]: `fit` learns parameters from a
//! reference frame, `transform` applies them without touching the input.
//!
//! ## Stages
//!
//! - `missing`: gap interpolation and bounded forward/backward fill
//! - `outliers`: IQR / z-score bounds with clip, drop or mark policies
//! - `resampler`: fixed-step, epoch-aligned bucketing
//! - `scaler`: standard / minmax / robust scaling, global or per group
//! - `schema`: external column names and units to canonical channels
//! - `pipeline`: ordered composition with per-stage reports

mod missing;
mod outliers;
mod pipeline;
mod resampler;
mod scaler;
pub mod schema;

pub use missing::MissingValueImputer;
pub use outliers::{ChannelBounds, OutlierBounder};
pub use pipeline::Pipeline;
pub use resampler::Resampler;
pub use scaler::{ChannelScale, Scaler};
pub use schema::SchemaMapper;

use crate::types::{Frame, StageReport};

/// Errors raised by preprocessing stages
#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("{0} used before fit()")]
    NotFitted(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Shared contract for fit/transform stages
pub trait Estimator: Send + Sync {
    /// Stage name used in reports and logs
    fn name(&self) -> &str;

    /// Learn parameters from a reference frame, replacing any previous fit
    fn fit(&mut self, data: &Frame) -> Result<(), PreprocessError>;

    /// Apply the fitted parameters; never mutates `data`
    fn transform(&self, data: &Frame) -> Result<Frame, PreprocessError>;

    /// What the stage learned and did
    fn report(&self) -> StageReport;

    fn fit_transform(&mut self, data: &Frame) -> Result<Frame, PreprocessError> {
        self.fit(data)?;
        self.transform(data)
    }
}

/// Non-missing values of a column
pub(crate) fn present(values: &[Option<f64>]) -> Vec<f64> {
    values.iter().flatten().copied().collect()
}
