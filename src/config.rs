// Engine configuration
//
// Everything the engine treats as policy lives here: how stratum keys are
// composed, the category cut points, the minimum comparison population,
// feature declaration order and weights, and the threshold rules.

use crate::percentile::CategoryCutPoints;
use crate::strata::StratumKeySpec;
use crate::threshold::ThresholdRule;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

const DEFAULT_THRESHOLDS: &str = include_str!("../thresholds-default.toml");

/// Rejected configuration
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid category cut points: {0}")]
    InvalidCutPoints(String),

    #[error("min_population must be >= 1, got {0}")]
    InvalidMinPopulation(usize),

    #[error("invalid stratum key: {0}")]
    InvalidStratumKey(String),

    #[error("invalid threshold rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },

    #[error("duplicate threshold rule id '{0}'")]
    DuplicateRuleId(String),

    #[error("weight for feature '{feature}' must be finite and >= 0, got {weight}")]
    InvalidWeight { feature: String, weight: f64 },
}

/// Configuration of the ranking and alerting pipeline
///
/// # Example TOML
/// ```toml
/// min_population = 5
/// features = ["finished_trials", "foraging_eff", "abs_bias"]
/// derive_session_counts = true
///
/// [stratum]
/// fields = ["task", "stage"]
///
/// [categories]
/// alert_low = 5.0
/// watch_low = 15.0
/// watch_high = 85.0
/// alert_high = 95.0
///
/// [feature_weights]
/// abs_bias = 0.5
///
/// [[threshold]]
/// feature = "water_day_total"
/// upper = 3.5
/// severity = "warning"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Metadata fields composing the stratum key
    pub stratum: StratumKeySpec,

    /// Percentile cut points for NORMAL / WATCH / ALERT
    pub categories: CategoryCutPoints,

    /// Smallest leave-one-out population that still yields a percentile
    ///
    /// Default: 1
    pub min_population: usize,

    /// Features ranked by percentile, in declaration order
    ///
    /// Empty means every feature of the table. Declared features come first
    /// in results and in alert reasons.
    pub features: Vec<String>,

    /// Weights for the overall percentile; unlisted features weigh 1.0
    pub feature_weights: BTreeMap<String, f64>,

    /// Derive `session_count` and `stratum_session_count` at ingestion
    pub derive_session_counts: bool,

    /// Threshold rules in declaration order
    pub threshold: Vec<ThresholdRule>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stratum: StratumKeySpec::default(),
            categories: CategoryCutPoints::default(),
            min_population: 1,
            features: Vec::new(),
            feature_weights: BTreeMap::new(),
            derive_session_counts: true,
            threshold: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Narrow tails and a larger comparison population
    ///
    /// Use when alerts must be rare and well supported.
    pub fn strict() -> Self {
        Self {
            categories: CategoryCutPoints {
                alert_low: 2.5,
                watch_low: 10.0,
                watch_high: 90.0,
                alert_high: 97.5,
            },
            min_population: 10,
            ..Self::default()
        }
    }

    /// Wide tails, any population
    ///
    /// Use to surface drifting subjects early.
    pub fn permissive() -> Self {
        Self {
            categories: CategoryCutPoints {
                alert_low: 10.0,
                watch_low: 25.0,
                watch_high: 75.0,
                alert_high: 90.0,
            },
            min_population: 1,
            ..Self::default()
        }
    }

    /// Append the built-in threshold rules after any configured ones
    pub fn with_default_thresholds(mut self) -> Result<Self> {
        let defaults = parse_rules(DEFAULT_THRESHOLDS)
            .context("Failed to parse built-in threshold rules")?;
        self.threshold.extend(defaults);
        Ok(self)
    }

    /// Load and validate a configuration file
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read config file: {}", path.as_ref().display())
        })?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))
    }

    /// Parse and validate a configuration document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(content).context("Failed to parse TOML engine configuration")?;
        config.validate()?;
        debug!(
            "Loaded config: {} declared features, {} threshold rules",
            config.features.len(),
            config.threshold.len()
        );
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.categories.validate()?;

        if self.min_population < 1 {
            return Err(ConfigError::InvalidMinPopulation(self.min_population));
        }

        if self.stratum.fields.is_empty() {
            return Err(ConfigError::InvalidStratumKey(
                "at least one metadata field is required".to_string(),
            ));
        }
        if let Some(blank) = self.stratum.fields.iter().find(|f| f.trim().is_empty()) {
            return Err(ConfigError::InvalidStratumKey(format!(
                "blank field name {:?}",
                blank
            )));
        }

        for (feature, &weight) in &self.feature_weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::InvalidWeight {
                    feature: feature.clone(),
                    weight,
                });
            }
        }

        let mut ids = HashSet::new();
        for rule in &self.threshold {
            rule.validate()?;
            if let Some(id) = &rule.id {
                if !ids.insert(id.as_str()) {
                    return Err(ConfigError::DuplicateRuleId(id.clone()));
                }
            }
        }

        let mut declared = HashSet::new();
        for feature in &self.features {
            if !declared.insert(feature.as_str()) {
                warn!("Feature {} declared more than once", feature);
            }
        }

        Ok(())
    }

    /// Weight of a feature in the overall percentile
    pub fn weight_of(&self, feature: &str) -> f64 {
        self.feature_weights.get(feature).copied().unwrap_or(1.0)
    }
}

fn parse_rules(content: &str) -> Result<Vec<ThresholdRule>> {
    #[derive(serde::Deserialize)]
    struct RuleFile {
        #[serde(default)]
        threshold: Vec<ThresholdRule>,
    }

    let file: RuleFile = toml::from_str(content)?;
    for rule in &file.threshold {
        rule.validate()?;
    }
    Ok(file.threshold)
}
