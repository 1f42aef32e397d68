use crate::cache::{CacheKey, PercentileCache};
use crate::measurement::{MeasurementTable, SessionKey};
use crate::percentile::category::{CategoryCutPoints, InsufficientReason, PercentileCategory};
use crate::percentile::rank::{leave_one_out_ranks, RawRank};
use crate::strata::{Strata, StratumKey};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Raw ranks of one feature across one stratum, in session-key order
pub type RankedColumn = Vec<(SessionKey, RawRank)>;

type Resolved = (Option<f64>, PercentileCategory, Option<InsufficientReason>);

/// Percentile standing of one session on one feature
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PercentileResult {
    pub subject_id: String,
    pub session_id: String,
    pub feature_name: String,
    pub stratum: StratumKey,
    pub value: Option<f64>,
    /// In [0, 100]; None when the category is INSUFFICIENT_DATA
    pub percentile: Option<f64>,
    pub category: PercentileCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insufficient_reason: Option<InsufficientReason>,
}

impl PercentileResult {
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(&self.subject_id, &self.session_id)
    }
}

/// Ranks every session against its stratum and applies the category policy
#[derive(Debug, Clone, PartialEq)]
pub struct PercentileEngine {
    cut_points: CategoryCutPoints,
    min_population: usize,
}

impl Default for PercentileEngine {
    fn default() -> Self {
        Self::new(CategoryCutPoints::default(), 1)
    }
}

impl PercentileEngine {
    pub fn new(cut_points: CategoryCutPoints, min_population: usize) -> Self {
        Self {
            cut_points,
            min_population,
        }
    }

    pub fn cut_points(&self) -> &CategoryCutPoints {
        &self.cut_points
    }

    /// Leave-one-out ranks of one feature for the sessions of one stratum
    pub fn rank_column(
        table: &MeasurementTable,
        sessions: &BTreeSet<SessionKey>,
        feature: usize,
    ) -> RankedColumn {
        let values: Vec<Option<f64>> = sessions
            .iter()
            .map(|key| {
                table
                    .session_position(key)
                    .and_then(|s| table.value_at(s, feature))
            })
            .collect();

        sessions
            .iter()
            .cloned()
            .zip(leave_one_out_ranks(&values))
            .collect()
    }

    /// Apply the minimum-population and cut-point policy to a raw rank
    pub fn resolve(&self, raw: RawRank) -> Resolved {
        let too_small = |population: usize| -> Resolved {
            (
                None,
                PercentileCategory::InsufficientData,
                Some(InsufficientReason::PopulationTooSmall {
                    population,
                    required: self.min_population,
                }),
            )
        };

        match raw {
            RawRank::Missing => (
                None,
                PercentileCategory::InsufficientData,
                Some(InsufficientReason::MissingValue),
            ),
            RawRank::Isolated => too_small(0),
            RawRank::Ranked { population, .. } if population < self.min_population => {
                too_small(population)
            }
            RawRank::Ranked { percentile, .. } => {
                (Some(percentile), self.cut_points.categorize(percentile), None)
            }
        }
    }

    /// Percentile results for every (session, feature) pair of the table
    ///
    /// Results come out in table session order, then feature declaration
    /// order. Unstratified sessions get INSUFFICIENT_DATA for every feature.
    pub fn compute(
        &self,
        table: &MeasurementTable,
        strata: &Strata,
        cache: Option<&PercentileCache>,
    ) -> Vec<PercentileResult> {
        self.compute_features(table, strata, table.features(), cache)
    }

    /// Percentile results restricted to `features`, in the given order
    ///
    /// Names the table does not have are skipped.
    pub fn compute_features(
        &self,
        table: &MeasurementTable,
        strata: &Strata,
        features: &[String],
        cache: Option<&PercentileCache>,
    ) -> Vec<PercentileResult> {
        let columns: Vec<(usize, &String)> = features
            .iter()
            .filter_map(|name| table.feature_position(name).map(|f| (f, name)))
            .collect();
        let mut grid = vec![vec![RawRank::Missing; columns.len()]; table.len()];

        for (stratum, sessions) in strata.ranked() {
            for (c, &(f, feature)) in columns.iter().enumerate() {
                let column: Arc<RankedColumn> = match cache {
                    Some(cache) => {
                        let key = CacheKey::new(table.fingerprint(), stratum.clone(), feature);
                        cache.get_or_compute(key, || Self::rank_column(table, sessions, f))
                    }
                    None => Arc::new(Self::rank_column(table, sessions, f)),
                };

                for (key, raw) in column.iter() {
                    if let Some(s) = table.session_position(key) {
                        grid[s][c] = *raw;
                    }
                }
            }
            debug!(
                "Ranked stratum {} ({} sessions, {} features)",
                stratum,
                sessions.len(),
                columns.len()
            );
        }

        let mut results = Vec::with_capacity(table.len() * columns.len());
        for (s, session) in table.sessions().iter().enumerate() {
            for (c, &(f, feature)) in columns.iter().enumerate() {
                let (percentile, category, insufficient_reason) = if session.stratum.is_stratified() {
                    self.resolve(grid[s][c])
                } else {
                    (
                        None,
                        PercentileCategory::InsufficientData,
                        Some(InsufficientReason::Unstratified),
                    )
                };

                results.push(PercentileResult {
                    subject_id: session.key.subject_id.clone(),
                    session_id: session.key.session_id.clone(),
                    feature_name: feature.clone(),
                    stratum: session.stratum.clone(),
                    value: table.value_at(s, f),
                    percentile,
                    category,
                    insufficient_reason,
                });
            }
        }
        results
    }
}
