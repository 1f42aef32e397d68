//! stratarank - strata-based percentile ranking and combined alerting
//!
//! Sessions are grouped into strata by their metadata, each feature value is
//! ranked against the other sessions of its stratum (mid-rank, leave-one-out),
//! percentiles are categorized, absolute threshold rules are evaluated, and both
//! are combined into one alert per session. The enriched result can then be
//! filtered and faceted.
//!
//! ```
//! use stratarank::config::EngineConfig;
//! use stratarank::measurement::{Measurement, MeasurementTable};
//! use stratarank::pipeline::AlertEngine;
//!
//! let rows = [("A", 2.0), ("B", 5.0), ("C", 8.0)]
//!     .into_iter()
//!     .map(|(subject, value)| Measurement {
//!         subject_id: subject.to_string(),
//!         session_id: "1".to_string(),
//!         session_date: "2024-05-01".to_string(),
//!         stratum_key: Some("Coupled Baiting_STAGE_1".to_string()),
//!         feature_name: "foraging_eff".to_string(),
//!         value: Some(value),
//!     })
//!     .collect();
//!
//! let table = MeasurementTable::from_measurements(rows);
//! let engine = AlertEngine::new(EngineConfig::default()).unwrap();
//! let enriched = engine.evaluate(&table);
//! assert_eq!(enriched.rows()[1].overall_percentile, Some(50.0));
//! ```

pub mod alert;
pub mod cache;
pub mod cli;
pub mod config;
pub mod enriched;
pub mod filter;
pub mod heatmap;
pub mod measurement;
pub mod output;
pub mod percentile;
pub mod pipeline;
pub mod strata;
pub mod summary;
pub mod threshold;
