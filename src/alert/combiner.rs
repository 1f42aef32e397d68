use crate::measurement::SessionKey;
use crate::percentile::{PercentileCategory, PercentileResult};
use crate::threshold::{ThresholdAlert, ThresholdSeverity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Overall alert level of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CombinedSeverity {
    None,
    Watch,
    Alert,
}

impl CombinedSeverity {
    pub const ALL: [CombinedSeverity; 3] = [
        CombinedSeverity::None,
        CombinedSeverity::Watch,
        CombinedSeverity::Alert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CombinedSeverity::None => "NONE",
            CombinedSeverity::Watch => "WATCH",
            CombinedSeverity::Alert => "ALERT",
        }
    }
}

impl fmt::Display for CombinedSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Combined alert of one (subject, session)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CombinedAlert {
    pub subject_id: String,
    pub session_id: String,
    pub combined_severity: CombinedSeverity,
    pub contributing_reasons: Vec<String>,
}

impl CombinedAlert {
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(&self.subject_id, &self.session_id)
    }
}

fn push_reason(reasons: &mut Vec<String>, reason: String) {
    if !reasons.contains(&reason) {
        reasons.push(reason);
    }
}

fn combine_refs<'a>(
    session: &SessionKey,
    percentiles: impl IntoIterator<Item = &'a PercentileResult>,
    thresholds: impl IntoIterator<Item = &'a ThresholdAlert>,
) -> CombinedAlert {
    let mut severity = CombinedSeverity::None;
    let mut reasons = Vec::new();

    for result in percentiles {
        let level = match result.category {
            PercentileCategory::Alert => CombinedSeverity::Alert,
            PercentileCategory::Watch => CombinedSeverity::Watch,
            PercentileCategory::Normal | PercentileCategory::InsufficientData => continue,
        };
        severity = severity.max(level);
        push_reason(&mut reasons, format!("percentile:{}", result.feature_name));
    }

    for alert in thresholds.into_iter().filter(|a| a.is_violation()) {
        let level = match alert.severity {
            ThresholdSeverity::Critical => CombinedSeverity::Alert,
            ThresholdSeverity::Warning => CombinedSeverity::Watch,
        };
        severity = severity.max(level);
        push_reason(&mut reasons, format!("threshold:{}", alert.label));
    }

    CombinedAlert {
        subject_id: session.subject_id.clone(),
        session_id: session.session_id.clone(),
        combined_severity: severity,
        contributing_reasons: reasons,
    }
}

/// Combine one session's percentile results and threshold alerts
///
/// Inputs are taken in the order given, which must be feature declaration
/// order and rule declaration order respectively. Empty inputs give NONE with
/// no reasons.
///
/// # Example
/// ```
/// use stratarank::alert::{combine, CombinedSeverity};
/// use stratarank::measurement::SessionKey;
///
/// let alert = combine(&SessionKey::new("m1", "7"), &[], &[]);
/// assert_eq!(alert.combined_severity, CombinedSeverity::None);
/// assert!(alert.contributing_reasons.is_empty());
/// ```
pub fn combine(
    session: &SessionKey,
    percentiles: &[PercentileResult],
    thresholds: &[ThresholdAlert],
) -> CombinedAlert {
    combine_refs(session, percentiles, thresholds)
}

/// Combine results for every session present in either input
///
/// Sessions come out in order of first appearance (percentile results
/// first). Each session's inputs keep their relative order.
pub fn combine_all(
    percentiles: &[PercentileResult],
    thresholds: &[ThresholdAlert],
) -> Vec<CombinedAlert> {
    let mut order: Vec<SessionKey> = Vec::new();
    let mut groups: HashMap<SessionKey, (Vec<&PercentileResult>, Vec<&ThresholdAlert>)> =
        HashMap::new();

    for result in percentiles {
        let key = result.session_key();
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                (Vec::new(), Vec::new())
            })
            .0
            .push(result);
    }
    for alert in thresholds {
        let key = alert.session_key();
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                (Vec::new(), Vec::new())
            })
            .1
            .push(alert);
    }

    order
        .into_iter()
        .map(|key| {
            let (p, t) = groups.remove(&key).unwrap_or_default();
            combine_refs(&key, p, t)
        })
        .collect()
}
