//! Alert pipeline
//!
//! Wires the stages together: stratify, rank, evaluate thresholds, combine,
//! and assemble the enriched table. Every stage is a pure function of the
//! table and the configuration, so one engine can serve concurrent callers.

use crate::alert::{combine, CombinedSeverity};
use crate::cache::PercentileCache;
use crate::config::{ConfigError, EngineConfig};
use crate::enriched::{EnrichedRow, EnrichedTable};
use crate::measurement::{
    MeasurementTable, SessionRecord, SESSION_COUNT_FEATURE, STRATUM_SESSION_COUNT_FEATURE,
};
use crate::percentile::{CategoryCutPoints, PercentileCategory, PercentileEngine, PercentileResult};
use crate::strata::stratify;
use crate::threshold::{ThresholdAlert, ThresholdEvaluator};
use std::sync::Arc;
use tracing::{debug, info};

/// Configured ranking and alerting engine
#[derive(Debug, Clone)]
pub struct AlertEngine {
    config: EngineConfig,
    percentiles: PercentileEngine,
    cache: Option<Arc<PercentileCache>>,
}

impl AlertEngine {
    /// Build an engine from a validated configuration
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let percentiles = PercentileEngine::new(config.categories, config.min_population);
        Ok(Self {
            config,
            percentiles,
            cache: None,
        })
    }

    /// Share a percentile cache across evaluations
    pub fn with_cache(mut self, cache: Arc<PercentileCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Build the measurement table for wide-form records
    ///
    /// Applies the configured stratum key, derives session counts when
    /// enabled, and puts declared features first.
    pub fn prepare(&self, records: Vec<SessionRecord>) -> MeasurementTable {
        let mut table = MeasurementTable::from_records(records, &self.config.stratum);
        if self.config.derive_session_counts {
            table = table.with_session_counts();
        }
        table.with_feature_order(&self.config.features)
    }

    /// Features ranked by percentile for `table`
    ///
    /// The declared features present in the table, or when none are declared,
    /// every table feature except the derived session counts.
    pub fn ranked_features(&self, table: &MeasurementTable) -> Vec<String> {
        if self.config.features.is_empty() {
            return table
                .features()
                .iter()
                .filter(|f| {
                    f.as_str() != SESSION_COUNT_FEATURE && f.as_str() != STRATUM_SESSION_COUNT_FEATURE
                })
                .cloned()
                .collect();
        }

        let mut ranked: Vec<String> = Vec::with_capacity(self.config.features.len());
        for feature in &self.config.features {
            if table.has_feature(feature) && !ranked.contains(feature) {
                ranked.push(feature.clone());
            } else if !table.has_feature(feature) {
                debug!("Declared feature {} not in table", feature);
            }
        }
        ranked
    }

    pub fn evaluate_records(&self, records: Vec<SessionRecord>) -> EnrichedTable {
        let table = self.prepare(records);
        self.evaluate(&table)
    }

    /// Run every stage over a table
    ///
    /// Long-form tables that lack the derived session counts get them here
    /// when derivation is enabled.
    pub fn evaluate(&self, table: &MeasurementTable) -> EnrichedTable {
        let derived;
        let table = if self.needs_session_counts(table) {
            debug!("Deriving session counts for {} sessions", table.len());
            derived = table.clone().with_session_counts();
            &derived
        } else {
            table
        };

        let strata = stratify(table);
        let features = self.ranked_features(table);

        let percentiles =
            self.percentiles
                .compute_features(table, &strata, &features, self.cache.as_deref());
        let thresholds = ThresholdEvaluator::new(&self.config.threshold).evaluate_table(table);

        let mut per_session: Vec<(Vec<PercentileResult>, Vec<ThresholdAlert>)> =
            vec![(Vec::new(), Vec::new()); table.len()];
        for result in percentiles {
            if let Some(s) = table.session_position(&result.session_key()) {
                per_session[s].0.push(result);
            }
        }
        for alert in thresholds {
            if let Some(s) = table.session_position(&alert.session_key()) {
                per_session[s].1.push(alert);
            }
        }

        let rows: Vec<EnrichedRow> = table
            .sessions()
            .iter()
            .zip(per_session)
            .map(|(session, (percentiles, thresholds))| {
                let overall_percentile = self.overall_percentile(&percentiles);
                let overall_category =
                    overall_category(self.percentiles.cut_points(), overall_percentile);
                let combined = combine(&session.key, &percentiles, &thresholds);
                EnrichedRow {
                    subject_id: session.key.subject_id.clone(),
                    session_id: session.key.session_id.clone(),
                    session_date: session.session_date.clone(),
                    stratum: session.stratum.clone(),
                    metadata: session.metadata.clone(),
                    percentiles,
                    overall_percentile,
                    overall_category,
                    thresholds,
                    combined,
                }
            })
            .collect();

        info!(
            "Evaluated {} sessions in {} strata ({} unstratified), {} ranked features, {} flagged",
            rows.len(),
            strata.len(),
            strata.unstratified().map_or(0, std::collections::BTreeSet::len),
            features.len(),
            rows.iter()
                .filter(|r| r.combined.combined_severity != CombinedSeverity::None)
                .count()
        );

        EnrichedTable::new(rows, features, table.metadata_fields())
    }

    fn needs_session_counts(&self, table: &MeasurementTable) -> bool {
        self.config.derive_session_counts
            && !(table.has_feature(SESSION_COUNT_FEATURE)
                && table.has_feature(STRATUM_SESSION_COUNT_FEATURE))
    }

    /// Weighted mean of the defined percentiles; None if none is defined
    pub fn overall_percentile(&self, results: &[PercentileResult]) -> Option<f64> {
        let mut weighted = 0.0;
        let mut total = 0.0;
        for result in results {
            if let Some(p) = result.percentile {
                let w = self.config.weight_of(&result.feature_name);
                weighted += w * p;
                total += w;
            }
        }
        (total > 0.0).then(|| weighted / total)
    }
}

fn overall_category(cut_points: &CategoryCutPoints, overall: Option<f64>) -> PercentileCategory {
    match overall {
        Some(p) => cut_points.categorize(p),
        None => PercentileCategory::InsufficientData,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::{Measurement, SessionKey};
    use crate::threshold::{ThresholdRule, ThresholdSeverity};
    use std::collections::BTreeMap;

    fn record(subject: &str, session: &str, date: &str, stage: &str, features: &[(&str, f64)]) -> SessionRecord {
        let mut metadata = BTreeMap::new();
        metadata.insert("task".to_string(), "foraging".to_string());
        metadata.insert("stage".to_string(), stage.to_string());
        SessionRecord {
            subject_id: subject.to_string(),
            session_id: session.to_string(),
            session_date: date.to_string(),
            metadata,
            features: features.iter().map(|(k, v)| (k.to_string(), Some(*v))).collect(),
        }
    }

    fn cohort() -> Vec<SessionRecord> {
        vec![
            record("A", "1", "2024-01-01", "STAGE_1", &[("x", 2.0), ("y", 1.0)]),
            record("B", "1", "2024-01-01", "STAGE_1", &[("x", 5.0), ("y", 2.0)]),
            record("C", "1", "2024-01-01", "STAGE_1", &[("x", 8.0), ("y", 3.0)]),
        ]
    }

    #[test]
    fn test_engine_rejects_invalid_config() {
        let config = EngineConfig {
            min_population: 0,
            ..EngineConfig::default()
        };
        assert!(AlertEngine::new(config).is_err());
    }

    #[test]
    fn test_derived_counts_are_not_ranked_by_default() {
        let engine = AlertEngine::new(EngineConfig::default()).unwrap();
        let table = engine.prepare(cohort());
        assert!(table.has_feature(SESSION_COUNT_FEATURE));
        assert_eq!(engine.ranked_features(&table), vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_declared_features_drive_order() {
        let config = EngineConfig {
            features: vec!["y".to_string(), "nope".to_string(), "x".to_string()],
            ..EngineConfig::default()
        };
        let engine = AlertEngine::new(config).unwrap();
        let enriched = engine.evaluate_records(cohort());
        assert_eq!(enriched.features(), &["y".to_string(), "x".to_string()]);
        let names: Vec<&str> = enriched.rows()[0]
            .percentiles
            .iter()
            .map(|p| p.feature_name.as_str())
            .collect();
        assert_eq!(names, vec!["y", "x"]);
    }

    #[test]
    fn test_middle_session_is_normal() {
        let engine = AlertEngine::new(EngineConfig::default()).unwrap();
        let enriched = engine.evaluate_records(cohort());
        let b = enriched.row(&SessionKey::new("B", "1")).unwrap();

        assert_eq!(b.percentile("x").unwrap().percentile, Some(50.0));
        assert_eq!(b.overall_percentile, Some(50.0));
        assert_eq!(b.overall_category, PercentileCategory::Normal);
        assert_eq!(b.combined.combined_severity, CombinedSeverity::None);
        assert!(b.combined.contributing_reasons.is_empty());
    }

    #[test]
    fn test_extremes_alert_with_reasons_in_feature_order() {
        let engine = AlertEngine::new(EngineConfig::default()).unwrap();
        let enriched = engine.evaluate_records(cohort());
        let c = enriched.row(&SessionKey::new("C", "1")).unwrap();

        assert_eq!(c.combined.combined_severity, CombinedSeverity::Alert);
        assert_eq!(
            c.combined.contributing_reasons,
            vec!["percentile:x".to_string(), "percentile:y".to_string()]
        );
    }

    #[test]
    fn test_overall_percentile_is_weighted() {
        let mut weights = BTreeMap::new();
        weights.insert("x".to_string(), 3.0);
        weights.insert("y".to_string(), 1.0);
        let config = EngineConfig {
            feature_weights: weights,
            ..EngineConfig::default()
        };
        let engine = AlertEngine::new(config).unwrap();

        let mk = |feature: &str, percentile: Option<f64>| PercentileResult {
            subject_id: "A".to_string(),
            session_id: "1".to_string(),
            feature_name: feature.to_string(),
            stratum: crate::strata::StratumKey::Stratified("S".to_string()),
            value: Some(1.0),
            percentile,
            category: PercentileCategory::Normal,
            insufficient_reason: None,
        };

        assert_eq!(
            engine.overall_percentile(&[mk("x", Some(100.0)), mk("y", Some(0.0))]),
            Some(75.0)
        );
        assert_eq!(engine.overall_percentile(&[mk("x", None), mk("y", Some(40.0))]), Some(40.0));
        assert_eq!(engine.overall_percentile(&[mk("x", None)]), None);
        assert_eq!(engine.overall_percentile(&[]), None);
    }

    #[test]
    fn test_threshold_violation_flows_into_combined_alert() {
        let config = EngineConfig {
            threshold: vec![ThresholdRule::new("feature_x", ThresholdSeverity::Critical)
                .with_lower(1.0)
                .with_upper(10.0)],
            ..EngineConfig::default()
        };
        let engine = AlertEngine::new(config).unwrap();
        let enriched = engine.evaluate_records(vec![record(
            "A",
            "1",
            "2024-01-01",
            "STAGE_1",
            &[("feature_x", 0.5)],
        )]);

        let row = &enriched.rows()[0];
        assert!(row.has_threshold_violation());
        assert_eq!(row.combined.combined_severity, CombinedSeverity::Alert);
        assert_eq!(row.combined.contributing_reasons, vec!["threshold:feature_x".to_string()]);
        // a lone session has nobody to be ranked against
        assert_eq!(row.overall_category, PercentileCategory::InsufficientData);
    }

    fn long_form_sessions(subject: &str, count: usize) -> MeasurementTable {
        MeasurementTable::from_measurements(
            (1..=count)
                .map(|i| Measurement {
                    subject_id: subject.to_string(),
                    session_id: format!("{:02}", i),
                    session_date: format!("2024-{:03}", i),
                    stratum_key: Some("foraging_STAGE_1".to_string()),
                    feature_name: "x".to_string(),
                    value: Some(i as f64),
                })
                .collect(),
        )
    }

    #[test]
    fn test_long_form_table_gets_session_counts() {
        let config = EngineConfig::default().with_default_thresholds().unwrap();
        let engine = AlertEngine::new(config).unwrap();
        let table = long_form_sessions("m1", 45);
        assert!(!table.has_feature(SESSION_COUNT_FEATURE));

        let enriched = engine.evaluate(&table);
        let flagged: Vec<&str> = enriched
            .rows()
            .iter()
            .filter(|r| r.violations().any(|a| a.rule_id == "total_sessions"))
            .map(|r| r.session_id.as_str())
            .collect();
        assert_eq!(flagged, vec!["41", "42", "43", "44", "45"]);
        assert_eq!(enriched.features(), &["x".to_string()]);

        let last = enriched.row(&SessionKey::new("m1", "45")).unwrap();
        assert_eq!(last.combined.combined_severity, CombinedSeverity::Alert);
        assert!(last
            .combined
            .contributing_reasons
            .contains(&"threshold:total_sessions".to_string()));
    }

    #[test]
    fn test_long_form_counts_follow_derivation_toggle() {
        let config = EngineConfig {
            derive_session_counts: false,
            ..EngineConfig::default().with_default_thresholds().unwrap()
        };
        let engine = AlertEngine::new(config).unwrap();

        let enriched = engine.evaluate(&long_form_sessions("m1", 45));
        assert!(enriched.rows().iter().all(|r| !r.has_threshold_violation()));
    }

    #[test]
    fn test_stage_session_cap_uses_stage_metadata() {
        let config = EngineConfig::default().with_default_thresholds().unwrap();
        let engine = AlertEngine::new(config).unwrap();
        let records: Vec<SessionRecord> = (1..=7)
            .map(|i| {
                record(
                    "A",
                    &i.to_string(),
                    &format!("2024-01-0{}", i),
                    "STAGE_3",
                    &[("x", 1.0)],
                )
            })
            .collect();

        let enriched = engine.evaluate_records(records);
        let sixth = enriched.row(&SessionKey::new("A", "6")).unwrap();
        let seventh = enriched.row(&SessionKey::new("A", "7")).unwrap();

        assert!(!sixth.has_threshold_violation());
        let violated: Vec<&str> = seventh.violations().map(|a| a.rule_id.as_str()).collect();
        assert_eq!(violated, vec!["stage_3_sessions"]);
        assert_eq!(seventh.combined.combined_severity, CombinedSeverity::Watch);
    }

    #[test]
    fn test_cached_engine_matches_uncached() {
        let cache = Arc::new(PercentileCache::new());
        let cached = AlertEngine::new(EngineConfig::default())
            .unwrap()
            .with_cache(Arc::clone(&cache));
        let plain = AlertEngine::new(EngineConfig::default()).unwrap();

        let first = cached.evaluate_records(cohort());
        let second = cached.evaluate_records(cohort());
        assert_eq!(first, plain.evaluate_records(cohort()));
        assert_eq!(first, second);
        assert!(cache.stats().hits > 0);
    }

    #[test]
    fn test_engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AlertEngine>();
    }
}
