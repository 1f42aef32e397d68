//! Report rendering for the CLI: text, JSON and CSV
//!
//! Text is for people, JSON carries every field, CSV puts one session per
//! line with a percentile and category column pair per ranked feature.

use crate::enriched::{EnrichedRow, EnrichedTable};
use crate::summary::{AlertSummary, StrataSummary};
use serde::Serialize;
use std::collections::BTreeMap;

/// Facet counts per field
pub type Facets = BTreeMap<String, BTreeMap<String, usize>>;

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<AlertSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strata: Option<StrataSummary>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub facets: Facets,
    pub features: Vec<String>,
    pub rows: Vec<EnrichedRow>,
}

impl Report {
    pub fn new(table: EnrichedTable) -> Self {
        let features = table.features().to_vec();
        Self {
            summary: None,
            strata: None,
            facets: BTreeMap::new(),
            features,
            rows: table.into_rows(),
        }
    }

    /// Attach alert and strata summaries computed over the report rows
    pub fn with_summary(mut self) -> Self {
        self.summary = Some(AlertSummary::from_rows(&self.rows));
        self.strata = Some(StrataSummary::from_rows(&self.rows));
        self
    }

    pub fn with_facets(mut self, facets: Facets) -> Self {
        self.facets = facets;
        self
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();

        for row in &self.rows {
            out.push_str(&format!(
                "{}/{} {} [{}] {} overall={} ({})",
                row.subject_id,
                row.session_id,
                row.session_date,
                row.stratum,
                row.combined.combined_severity,
                format_percentile(row.overall_percentile),
                row.overall_category
            ));
            if !row.combined.contributing_reasons.is_empty() {
                out.push_str(" reasons: ");
                out.push_str(&row.combined.contributing_reasons.join(", "));
            }
            out.push('\n');
            for alert in row.violations() {
                out.push_str(&format!(
                    "    violated {} ({}): {} = {}\n",
                    alert.rule_id,
                    alert.severity,
                    alert.feature_name,
                    format_percentile(alert.value)
                ));
            }
        }

        if let Some(summary) = &self.summary {
            out.push('\n');
            out.push_str(&summary.to_report_string());
        }

        if let Some(strata) = &self.strata {
            out.push_str("\nStrata:\n");
            for s in &strata.strata {
                out.push_str(&format!(
                    "  {:<30} subjects={:<4} sessions={:<5} mean={} median={} sd={}\n",
                    s.stratum.to_string(),
                    s.subjects,
                    s.sessions,
                    format_percentile(s.mean),
                    format_percentile(s.median),
                    format_percentile(s.std_dev)
                ));
            }
        }

        for (field, counts) in &self.facets {
            out.push_str(&format!("\nFacet {}:\n", field));
            for (value, count) in counts {
                out.push_str(&format!("  {:<20} {}\n", value, count));
            }
        }

        out
    }

    fn csv_header(&self) -> String {
        let mut headers: Vec<String> = [
            "subject_id",
            "session_id",
            "session_date",
            "stratum",
            "overall_percentile",
            "overall_category",
            "combined_severity",
            "threshold_alert",
            "reasons",
        ]
        .iter()
        .map(|h| h.to_string())
        .collect();

        for feature in &self.features {
            headers.push(escape_field(&format!("{}_percentile", feature)));
            headers.push(escape_field(&format!("{}_category", feature)));
        }
        headers.join(",")
    }

    fn csv_row(&self, row: &EnrichedRow) -> String {
        let mut fields = vec![
            escape_field(&row.subject_id),
            escape_field(&row.session_id),
            escape_field(&row.session_date),
            escape_field(&row.stratum.to_string()),
            row.overall_percentile
                .map(|p| format!("{:.2}", p))
                .unwrap_or_default(),
            row.overall_category.to_string(),
            row.combined.combined_severity.to_string(),
            if row.has_threshold_violation() { "T" } else { "N" }.to_string(),
            escape_field(&row.combined.contributing_reasons.join(";")),
        ];

        for feature in &self.features {
            match row.percentile(feature) {
                Some(result) => {
                    fields.push(
                        result
                            .percentile
                            .map(|p| format!("{:.2}", p))
                            .unwrap_or_default(),
                    );
                    fields.push(result.category.to_string());
                }
                None => {
                    fields.push(String::new());
                    fields.push(String::new());
                }
            }
        }
        fields.join(",")
    }

    pub fn to_csv(&self) -> String {
        let mut out = self.csv_header();
        out.push('\n');
        for row in &self.rows {
            out.push_str(&self.csv_row(row));
            out.push('\n');
        }
        out
    }
}

fn format_percentile(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.1}", v),
        None => "-".to_string(),
    }
}

/// Quote a CSV field containing a comma, quote or newline
fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
