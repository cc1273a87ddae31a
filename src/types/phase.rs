//! Fermentation phase labels

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical fermentation phase attached to a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseLabel {
    /// Yeast acclimatising, little gas production
    Lag,
    /// Rapid growth, CO2 output climbing
    Exponential,
    /// Peak activity plateau
    Stationary,
    /// Activity tapering off
    Decline,
    /// Phase could not be determined
    Unknown,
}

impl PhaseLabel {
    pub const ALL: [Self; 5] = [
        Self::Lag,
        Self::Exponential,
        Self::Stationary,
        Self::Decline,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lag => "lag",
            Self::Exponential => "exponential",
            Self::Stationary => "stationary",
            Self::Decline => "decline",
            Self::Unknown => "unknown",
        }
    }

    /// Map a value onto the four ordered phases using three ascending breakpoints.
    ///
    /// `value < b[0]` is lag, `< b[1]` exponential, `< b[2]` stationary, else decline.
    pub fn from_breakpoints(value: f64, breakpoints: &[f64; 3]) -> Self {
        match value {
            v if v < breakpoints[0] => Self::Lag,
            v if v < breakpoints[1] => Self::Exponential,
            v if v < breakpoints[2] => Self::Stationary,
            _ => Self::Decline,
        }
    }
}

impl fmt::Display for PhaseLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lag" => Ok(Self::Lag),
            "exponential" => Ok(Self::Exponential),
            "stationary" => Ok(Self::Stationary),
            "decline" => Ok(Self::Decline),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown phase label '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakpoint_mapping() {
        let b = [0.1, 0.5, 0.9];
        assert_eq!(PhaseLabel::from_breakpoints(0.05, &b), PhaseLabel::Lag);
        assert_eq!(PhaseLabel::from_breakpoints(0.1, &b), PhaseLabel::Exponential);
        assert_eq!(PhaseLabel::from_breakpoints(0.7, &b), PhaseLabel::Stationary);
        assert_eq!(PhaseLabel::from_breakpoints(0.9, &b), PhaseLabel::Decline);
        assert_eq!(PhaseLabel::from_breakpoints(f64::NAN, &b), PhaseLabel::Decline);
    }

    #[test]
    fn test_round_trip_str() {
        for label in PhaseLabel::ALL {
            assert_eq!(label.as_str().parse::<PhaseLabel>(), Ok(label));
        }
        assert!("fermenting".parse::<PhaseLabel>().is_err());
    }
}
