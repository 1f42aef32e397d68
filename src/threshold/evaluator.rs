use crate::measurement::{MeasurementTable, SessionKey};
use crate::threshold::rule::{ThresholdRule, ThresholdSeverity};
use serde::Serialize;
use tracing::debug;

/// Outcome of one rule on one session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdAlert {
    pub subject_id: String,
    pub session_id: String,
    pub feature_name: String,
    pub rule_id: String,
    /// Name surfaced in combined alert reasons
    pub label: String,
    pub severity: ThresholdSeverity,
    pub value: Option<f64>,
    pub in_range: bool,
}

impl ThresholdAlert {
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(&self.subject_id, &self.session_id)
    }

    pub fn is_violation(&self) -> bool {
        !self.in_range
    }
}

/// Whether `value` satisfies `rule`
///
/// Lower bound only: in range iff value >= lower. Upper bound only: in range
/// iff value <= upper. Both: in range iff inside the closed interval. A missing
/// or non-finite value is always in range.
///
/// # Example
/// ```
/// use stratarank::threshold::{evaluate, ThresholdRule, ThresholdSeverity};
///
/// let rule = ThresholdRule::new("feature_x", ThresholdSeverity::Critical)
///     .with_lower(1.0)
///     .with_upper(10.0);
/// assert!(!evaluate(Some(0.5), &rule));
/// assert!(evaluate(Some(10.0), &rule));
/// assert!(evaluate(None, &rule));
/// ```
pub fn evaluate(value: Option<f64>, rule: &ThresholdRule) -> bool {
    let Some(value) = value.filter(|v| v.is_finite()) else {
        return true;
    };

    let above_lower = rule.lower.map_or(true, |lower| value >= lower);
    let below_upper = rule.upper.map_or(true, |upper| value <= upper);
    above_lower && below_upper
}

/// Evaluates a declared rule list against a table
#[derive(Debug, Clone, Copy)]
pub struct ThresholdEvaluator<'a> {
    rules: &'a [ThresholdRule],
}

impl<'a> ThresholdEvaluator<'a> {
    pub fn new(rules: &'a [ThresholdRule]) -> Self {
        Self { rules }
    }

    /// One alert per (session, applicable rule), in session order then rule order
    ///
    /// Rules on features the table does not have are skipped entirely.
    pub fn evaluate_table(&self, table: &MeasurementTable) -> Vec<ThresholdAlert> {
        let active: Vec<(usize, &ThresholdRule, usize)> = self
            .rules
            .iter()
            .enumerate()
            .filter_map(|(index, rule)| match table.feature_position(&rule.feature) {
                Some(f) => Some((index, rule, f)),
                None => {
                    debug!(
                        "Rule {} skipped: feature {} not in table",
                        rule.rule_id(index),
                        rule.feature
                    );
                    None
                }
            })
            .collect();

        let mut alerts = Vec::with_capacity(table.len() * active.len());
        for (s, session) in table.sessions().iter().enumerate() {
            for &(index, rule, f) in &active {
                if !rule.applies_to(session) {
                    continue;
                }
                let value = table.value_at(s, f);
                alerts.push(ThresholdAlert {
                    subject_id: session.key.subject_id.clone(),
                    session_id: session.key.session_id.clone(),
                    feature_name: rule.feature.clone(),
                    rule_id: rule.rule_id(index),
                    label: rule.label().to_string(),
                    severity: rule.severity,
                    value,
                    in_range: evaluate(value, rule),
                });
            }
        }

        debug!(
            "Evaluated {} threshold checks, {} violations",
            alerts.len(),
            alerts.iter().filter(|a| a.is_violation()).count()
        );
        alerts
    }
}
