//! Enriched session table
//!
//! One row per session carrying everything the dashboard table shows:
//! metadata, per-feature percentiles, the overall percentile, threshold
//! outcomes and the combined alert. The filter engine selects over these rows.

use crate::alert::{CombinedAlert, CombinedSeverity};
use crate::filter::{self, FilterCriteria, FilterError, FilterTable};
use crate::measurement::SessionKey;
use crate::percentile::{PercentileCategory, PercentileResult};
use crate::strata::StratumKey;
use crate::threshold::ThresholdAlert;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

/// Filter fields every enriched table has
pub const FIXED_FIELDS: [&str; 7] = [
    "subject_id",
    "session_id",
    "session_date",
    "stratum",
    "combined_severity",
    "overall_category",
    "threshold_alert",
];

/// Prefix of the per-feature category fields, e.g. `category:foraging_eff`
///
/// Only ranked features have a category field.
pub const CATEGORY_FIELD_PREFIX: &str = "category:";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedRow {
    pub subject_id: String,
    pub session_id: String,
    pub session_date: String,
    pub stratum: StratumKey,
    pub metadata: BTreeMap<String, String>,
    /// Ranked features in declaration order
    pub percentiles: Vec<PercentileResult>,
    /// Weighted mean of the defined feature percentiles
    pub overall_percentile: Option<f64>,
    pub overall_category: PercentileCategory,
    /// Applicable threshold rules in declaration order
    pub thresholds: Vec<ThresholdAlert>,
    pub combined: CombinedAlert,
}

impl EnrichedRow {
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(&self.subject_id, &self.session_id)
    }

    pub fn percentile(&self, feature: &str) -> Option<&PercentileResult> {
        self.percentiles.iter().find(|p| p.feature_name == feature)
    }

    pub fn combined_severity(&self) -> CombinedSeverity {
        self.combined.combined_severity
    }

    pub fn has_threshold_violation(&self) -> bool {
        self.thresholds.iter().any(ThresholdAlert::is_violation)
    }

    pub fn violations(&self) -> impl Iterator<Item = &ThresholdAlert> {
        self.thresholds.iter().filter(|a| a.is_violation())
    }
}

/// Rows of the enriched table plus the columns they were built from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedTable {
    rows: Vec<EnrichedRow>,
    features: Vec<String>,
    metadata_fields: Vec<String>,
}

impl EnrichedTable {
    pub fn new(rows: Vec<EnrichedRow>, features: Vec<String>, metadata_fields: Vec<String>) -> Self {
        Self {
            rows,
            features,
            metadata_fields,
        }
    }

    pub fn rows(&self) -> &[EnrichedRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<EnrichedRow> {
        self.rows
    }

    /// Ranked features in declaration order
    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn metadata_fields(&self) -> &[String] {
        &self.metadata_fields
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, key: &SessionKey) -> Option<&EnrichedRow> {
        self.rows
            .iter()
            .find(|r| r.subject_id == key.subject_id && r.session_id == key.session_id)
    }

    /// Every filterable field name
    pub fn fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = FIXED_FIELDS.iter().map(|f| f.to_string()).collect();
        fields.extend(
            self.features
                .iter()
                .map(|f| format!("{}{}", CATEGORY_FIELD_PREFIX, f)),
        );
        fields.extend(
            self.metadata_fields
                .iter()
                .filter(|m| !FIXED_FIELDS.contains(&m.as_str()))
                .cloned(),
        );
        fields
    }

    fn with_rows(&self, rows: Vec<EnrichedRow>) -> Self {
        Self {
            rows,
            features: self.features.clone(),
            metadata_fields: self.metadata_fields.clone(),
        }
    }

    /// Each subject's most recent session, by (session_date, session_id)
    ///
    /// Kept rows stay in table order.
    pub fn latest_per_subject(&self) -> Self {
        let mut latest: HashMap<&str, usize> = HashMap::new();
        for (idx, row) in self.rows.iter().enumerate() {
            let newer = match latest.get(row.subject_id.as_str()) {
                Some(&best) => {
                    let current = &self.rows[best];
                    (row.session_date.as_str(), row.session_id.as_str())
                        > (current.session_date.as_str(), current.session_id.as_str())
                }
                None => true,
            };
            if newer {
                latest.insert(row.subject_id.as_str(), idx);
            }
        }

        let rows = self
            .rows
            .iter()
            .enumerate()
            .filter(|(idx, row)| latest.get(row.subject_id.as_str()) == Some(idx))
            .map(|(_, row)| row.clone())
            .collect();
        self.with_rows(rows)
    }

    /// Rows of one subject ordered by (session_date, session_id)
    pub fn subject_history(&self, subject_id: &str) -> Vec<&EnrichedRow> {
        let mut rows: Vec<&EnrichedRow> = self
            .rows
            .iter()
            .filter(|r| r.subject_id == subject_id)
            .collect();
        rows.sort_by(|a, b| {
            a.session_date
                .cmp(&b.session_date)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        rows
    }

    /// Subset matching `criteria`
    pub fn filter(&self, criteria: &FilterCriteria) -> Result<Self, FilterError> {
        let rows = filter::apply(self, criteria)?.into_iter().cloned().collect();
        Ok(self.with_rows(rows))
    }

    /// Faceted badge counts for `field` under `criteria`
    pub fn facet_counts(
        &self,
        criteria: &FilterCriteria,
        field: &str,
    ) -> Result<BTreeMap<String, usize>, FilterError> {
        filter::count_per_value(self, criteria, field)
    }
}

impl FilterTable for EnrichedTable {
    type Row = EnrichedRow;

    fn rows(&self) -> &[EnrichedRow] {
        &self.rows
    }

    fn has_field(&self, field: &str) -> bool {
        if FIXED_FIELDS.contains(&field) {
            return true;
        }
        if let Some(feature) = field.strip_prefix(CATEGORY_FIELD_PREFIX) {
            return self.features.iter().any(|f| f == feature);
        }
        self.metadata_fields.iter().any(|m| m == field)
    }

    fn field_value<'r>(&self, row: &'r EnrichedRow, field: &str) -> Option<Cow<'r, str>> {
        match field {
            "subject_id" => Some(Cow::Borrowed(row.subject_id.as_str())),
            "session_id" => Some(Cow::Borrowed(row.session_id.as_str())),
            "session_date" => Some(Cow::Borrowed(row.session_date.as_str())),
            "stratum" => Some(Cow::Owned(row.stratum.to_string())),
            "combined_severity" => Some(Cow::Borrowed(row.combined_severity().as_str())),
            "overall_category" => Some(Cow::Borrowed(row.overall_category.as_str())),
            "threshold_alert" => Some(Cow::Borrowed(if row.has_threshold_violation() {
                "T"
            } else {
                "N"
            })),
            _ => match field.strip_prefix(CATEGORY_FIELD_PREFIX) {
                Some(feature) => row
                    .percentile(feature)
                    .map(|p| Cow::Borrowed(p.category.as_str())),
                None => row.metadata.get(field).map(|v| Cow::Borrowed(v.as_str())),
            },
        }
    }
}
