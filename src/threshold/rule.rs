use crate::config::ConfigError;
use crate::measurement::SessionInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Severity of a threshold violation
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdSeverity {
    Warning,
    Critical,
}

impl fmt::Display for ThresholdSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdSeverity::Warning => f.write_str("warning"),
            ThresholdSeverity::Critical => f.write_str("critical"),
        }
    }
}

/// Absolute bound on one feature
///
/// # Example TOML
/// ```toml
/// [[threshold]]
/// id = "stage_3_sessions"
/// feature = "stratum_session_count"
/// upper = 6
/// severity = "warning"
/// when = { stage = "STAGE_3" }
/// description = "Too many sessions in stage 3"
/// ```
///
/// Rules without an `id` are reported under their feature name, so two
/// anonymous rules on the same feature share one combined alert reason.
/// Give each an `id` to keep them apart.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ThresholdRule {
    /// Optional stable name; shown in alert reasons instead of the feature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Feature the rule reads
    pub feature: String,

    /// Values strictly below this violate the rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,

    /// Values strictly above this violate the rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,

    pub severity: ThresholdSeverity,

    /// Restrict the rule to sessions of one stratum
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stratum: Option<String>,

    /// Restrict the rule to sessions whose metadata has every listed value
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub when: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ThresholdRule {
    pub fn new(feature: impl Into<String>, severity: ThresholdSeverity) -> Self {
        Self {
            id: None,
            feature: feature.into(),
            lower: None,
            upper: None,
            severity,
            stratum: None,
            when: BTreeMap::new(),
            description: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_lower(mut self, lower: f64) -> Self {
        self.lower = Some(lower);
        self
    }

    pub fn with_upper(mut self, upper: f64) -> Self {
        self.upper = Some(upper);
        self
    }

    pub fn in_stratum(mut self, stratum: impl Into<String>) -> Self {
        self.stratum = Some(stratum.into());
        self
    }

    pub fn when(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.when.insert(field.into(), value.into());
        self
    }

    /// Name used in combined alert reasons
    pub fn label(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.feature)
    }

    /// Identifier of the rule at `index` in the declared rule list
    pub fn rule_id(&self, index: usize) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("{}#{}", self.feature, index),
        }
    }

    /// Whether the rule covers `session`
    ///
    /// Both the stratum scope and every metadata condition must hold. A
    /// session without the metadata field is outside the scope.
    pub fn applies_to(&self, session: &SessionInfo) -> bool {
        let in_stratum = match &self.stratum {
            None => true,
            Some(scope) => session.stratum.as_str() == Some(scope.as_str()),
        };
        in_stratum
            && self.when.iter().all(|(field, expected)| {
                session
                    .metadata
                    .get(field)
                    .is_some_and(|actual| actual.trim() == expected)
            })
    }

    /// Check that the bounds describe a usable rule
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feature.trim().is_empty() {
            return Err(ConfigError::InvalidRule {
                rule: self.label().to_string(),
                reason: "feature must not be empty".to_string(),
            });
        }
        let invalid = |reason: String| ConfigError::InvalidRule {
            rule: self.label().to_string(),
            reason,
        };

        if self.when.keys().any(|field| field.trim().is_empty()) {
            return Err(invalid("metadata condition field must not be empty".to_string()));
        }
        if self.lower.is_some_and(f64::is_nan) || self.upper.is_some_and(f64::is_nan) {
            return Err(invalid("bounds must not be NaN".to_string()));
        }
        match (self.lower, self.upper) {
            (None, None) => Err(invalid(
                "at least one of lower or upper is required".to_string(),
            )),
            (Some(lower), Some(upper)) if lower > upper => Err(invalid(format!(
                "lower {} must not exceed upper {}",
                lower, upper
            ))),
            _ => Ok(()),
        }
    }
}
