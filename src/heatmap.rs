//! Percentile matrix of one subject's history
//!
//! Rows are the ranked features plus an overall row, columns are the
//! subject's sessions in date order. Stratum boundaries mark the columns
//! where the subject moved to a new stratum (e.g. a curriculum stage change).

use crate::enriched::EnrichedTable;
use crate::percentile::PercentileCategory;
use crate::strata::StratumKey;
use serde::Serialize;

/// Row label of the overall percentile
pub const OVERALL_ROW: &str = "overall";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixRow {
    pub feature: String,
    pub percentiles: Vec<Option<f64>>,
    pub categories: Vec<PercentileCategory>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PercentileMatrix {
    pub subject_id: String,
    pub session_ids: Vec<String>,
    pub session_dates: Vec<String>,
    pub strata: Vec<StratumKey>,
    /// One row per ranked feature, then the overall row
    pub rows: Vec<MatrixRow>,
    /// Column indices where the stratum differs from the previous column
    pub stratum_boundaries: Vec<usize>,
}

impl PercentileMatrix {
    /// Matrix for `subject_id`; None if the subject has no rows
    pub fn for_subject(table: &EnrichedTable, subject_id: &str) -> Option<Self> {
        let history = table.subject_history(subject_id);
        if history.is_empty() {
            return None;
        }

        let mut rows: Vec<MatrixRow> = table
            .features()
            .iter()
            .map(|feature| {
                let cells: Vec<(Option<f64>, PercentileCategory)> = history
                    .iter()
                    .map(|row| match row.percentile(feature) {
                        Some(p) => (p.percentile, p.category),
                        None => (None, PercentileCategory::InsufficientData),
                    })
                    .collect();
                MatrixRow {
                    feature: feature.clone(),
                    percentiles: cells.iter().map(|c| c.0).collect(),
                    categories: cells.iter().map(|c| c.1).collect(),
                }
            })
            .collect();
        rows.push(MatrixRow {
            feature: OVERALL_ROW.to_string(),
            percentiles: history.iter().map(|r| r.overall_percentile).collect(),
            categories: history.iter().map(|r| r.overall_category).collect(),
        });

        let strata: Vec<StratumKey> = history.iter().map(|r| r.stratum.clone()).collect();
        let stratum_boundaries = strata
            .windows(2)
            .enumerate()
            .filter(|(_, pair)| pair[0] != pair[1])
            .map(|(i, _)| i + 1)
            .collect();

        Some(Self {
            subject_id: subject_id.to_string(),
            session_ids: history.iter().map(|r| r.session_id.clone()).collect(),
            session_dates: history.iter().map(|r| r.session_date.clone()).collect(),
            strata,
            rows,
            stratum_boundaries,
        })
    }

    pub fn columns(&self) -> usize {
        self.session_ids.len()
    }

    pub fn row(&self, feature: &str) -> Option<&MatrixRow> {
        self.rows.iter().find(|r| r.feature == feature)
    }
}
