use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a single feature percentile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PercentileCategory {
    Normal,
    Watch,
    Alert,
    InsufficientData,
}

impl PercentileCategory {
    pub const ALL: [PercentileCategory; 4] = [
        PercentileCategory::Normal,
        PercentileCategory::Watch,
        PercentileCategory::Alert,
        PercentileCategory::InsufficientData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PercentileCategory::Normal => "NORMAL",
            PercentileCategory::Watch => "WATCH",
            PercentileCategory::Alert => "ALERT",
            PercentileCategory::InsufficientData => "INSUFFICIENT_DATA",
        }
    }

    /// Whether this category should be surfaced as an alert reason
    pub fn is_flagged(&self) -> bool {
        matches!(self, PercentileCategory::Watch | PercentileCategory::Alert)
    }
}

impl fmt::Display for PercentileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a percentile could not be computed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InsufficientReason {
    /// The session has no usable value for the feature
    MissingValue,
    /// The session has no usable stratum key
    Unstratified,
    /// Too few other sessions in the stratum have a value
    PopulationTooSmall { population: usize, required: usize },
}

impl fmt::Display for InsufficientReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsufficientReason::MissingValue => f.write_str("missing value"),
            InsufficientReason::Unstratified => f.write_str("no stratum"),
            InsufficientReason::PopulationTooSmall {
                population,
                required,
            } => write!(f, "population {} < {}", population, required),
        }
    }
}

/// Percentile cut points separating NORMAL, WATCH and ALERT
///
/// Both tails are inclusive: with the defaults a percentile of exactly 5 or
/// 95 is ALERT, exactly 15 or 85 is WATCH.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryCutPoints {
    pub alert_low: f64,
    pub watch_low: f64,
    pub watch_high: f64,
    pub alert_high: f64,
}

impl Default for CategoryCutPoints {
    fn default() -> Self {
        Self {
            alert_low: 5.0,
            watch_low: 15.0,
            watch_high: 85.0,
            alert_high: 95.0,
        }
    }
}

impl CategoryCutPoints {
    pub fn categorize(&self, percentile: f64) -> PercentileCategory {
        if !percentile.is_finite() {
            PercentileCategory::InsufficientData
        } else if percentile <= self.alert_low || percentile >= self.alert_high {
            PercentileCategory::Alert
        } else if percentile <= self.watch_low || percentile >= self.watch_high {
            PercentileCategory::Watch
        } else {
            PercentileCategory::Normal
        }
    }

    /// Cut points must lie in [0, 100] and be ordered low to high
    pub fn validate(&self) -> Result<(), ConfigError> {
        let points = [self.alert_low, self.watch_low, self.watch_high, self.alert_high];
        if points.iter().any(|p| !(0.0..=100.0).contains(p)) {
            return Err(ConfigError::InvalidCutPoints(format!(
                "cut points must be in [0, 100], got {:?}",
                points
            )));
        }
        if !points.windows(2).all(|w| w[0] <= w[1]) {
            return Err(ConfigError::InvalidCutPoints(format!(
                "cut points must satisfy alert_low <= watch_low <= watch_high <= alert_high, got {:?}",
                points
            )));
        }
        Ok(())
    }
}
