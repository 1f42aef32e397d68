//! Immutable measurement table
//!
//! The ingestion adapter hands the engine a finished table of per-session
//! feature measurements. Two shapes are accepted:
//! - long form: one [`Measurement`] per (session, feature)
//! - wide form: one [`SessionRecord`] per session with a metadata map and a feature map
//!
//! Both are normalized into a session × feature grid. Non-finite values are
//! treated as missing. Every table carries a SHA-256 content fingerprint used
//! to key the percentile cache.

use crate::strata::{StratumKey, StratumKeySpec};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Derived feature: 1-based ordinal of a session within its subject's history
pub const SESSION_COUNT_FEATURE: &str = "session_count";

/// Derived feature: 1-based ordinal of a session within the subject's sessions in the same stratum
pub const STRATUM_SESSION_COUNT_FEATURE: &str = "stratum_session_count";

/// Identity of a session: session ids are only unique per subject
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub subject_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(subject_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            session_id: session_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.subject_id, self.session_id)
    }
}

/// One long-form measurement row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub subject_id: String,
    pub session_id: String,
    pub session_date: String,
    /// Raw stratum key; missing or blank routes the session to the unstratified bucket
    #[serde(default)]
    pub stratum_key: Option<String>,
    pub feature_name: String,
    #[serde(default)]
    pub value: Option<f64>,
}

impl Measurement {
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(&self.subject_id, &self.session_id)
    }
}

/// One wide-form session row as produced by the dashboard's data-access layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub subject_id: String,
    pub session_id: String,
    pub session_date: String,
    /// Session metadata (rig, task, stage, trainer, ...) used for strata and filters
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub features: BTreeMap<String, Option<f64>>,
}

/// Per-session metadata resolved at ingestion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub key: SessionKey,
    pub session_date: String,
    pub stratum: StratumKey,
    pub metadata: BTreeMap<String, String>,
}

/// SHA-256 digest of a table's content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableFingerprint([u8; 32]);

impl TableFingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for TableFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Session × feature grid of measurements
#[derive(Debug, Clone)]
pub struct MeasurementTable {
    sessions: Vec<SessionInfo>,
    session_index: HashMap<SessionKey, usize>,
    features: Vec<String>,
    /// values[session][feature]
    values: Vec<Vec<Option<f64>>>,
    fingerprint: TableFingerprint,
}

fn usable(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

impl MeasurementTable {
    /// Build a table from long-form rows
    ///
    /// A session takes the stratum key of its first row. Later rows that
    /// disagree are logged and ignored for stratification; a duplicate
    /// (session, feature) row keeps the first value.
    pub fn from_measurements(rows: Vec<Measurement>) -> Self {
        let mut sessions: Vec<SessionInfo> = Vec::new();
        let mut session_index: HashMap<SessionKey, usize> = HashMap::new();
        let mut features: Vec<String> = Vec::new();
        let mut feature_index: HashMap<String, usize> = HashMap::new();
        let mut cells: Vec<(usize, usize, Option<f64>)> = Vec::with_capacity(rows.len());
        let mut seen: HashSet<(usize, usize)> = HashSet::new();

        for row in rows {
            let key = row.session_key();
            let stratum = StratumKey::from_raw(row.stratum_key.as_deref());
            let s = match session_index.get(&key) {
                Some(&idx) => {
                    if sessions[idx].stratum != stratum {
                        warn!(
                            "Session {} has conflicting stratum keys ({} vs {}), keeping the first",
                            key, sessions[idx].stratum, stratum
                        );
                    }
                    idx
                }
                None => {
                    let idx = sessions.len();
                    session_index.insert(key.clone(), idx);
                    sessions.push(SessionInfo {
                        key,
                        session_date: row.session_date.clone(),
                        stratum,
                        metadata: BTreeMap::new(),
                    });
                    idx
                }
            };

            let f = *feature_index
                .entry(row.feature_name.clone())
                .or_insert_with(|| {
                    features.push(row.feature_name.clone());
                    features.len() - 1
                });

            if !seen.insert((s, f)) {
                warn!(
                    "Duplicate measurement for {} / {}, keeping the first",
                    sessions[s].key, row.feature_name
                );
                continue;
            }
            cells.push((s, f, usable(row.value)));
        }

        let mut values = vec![vec![None; features.len()]; sessions.len()];
        for (s, f, v) in cells {
            values[s][f] = v;
        }

        Self::assemble(sessions, session_index, features, values)
    }

    /// Build a table from wide-form session records
    ///
    /// The stratum key is composed from each record's metadata using `spec`.
    /// Features are declared in sorted name order; use
    /// [`MeasurementTable::with_feature_order`] to impose a configured order.
    pub fn from_records(records: Vec<SessionRecord>, spec: &StratumKeySpec) -> Self {
        let mut features: Vec<String> = records
            .iter()
            .flat_map(|r| r.features.keys().cloned())
            .collect();
        features.sort();
        features.dedup();
        let feature_index: HashMap<&str, usize> = features
            .iter()
            .enumerate()
            .map(|(i, f)| (f.as_str(), i))
            .collect();

        let mut sessions = Vec::with_capacity(records.len());
        let mut session_index = HashMap::with_capacity(records.len());
        let mut values = Vec::with_capacity(records.len());

        for record in records {
            let key = SessionKey::new(&record.subject_id, &record.session_id);
            if session_index.contains_key(&key) {
                warn!("Duplicate session record {}, keeping the first", key);
                continue;
            }

            let mut row = vec![None; features.len()];
            for (name, value) in &record.features {
                if let Some(&f) = feature_index.get(name.as_str()) {
                    row[f] = usable(*value);
                }
            }

            session_index.insert(key.clone(), sessions.len());
            sessions.push(SessionInfo {
                key,
                session_date: record.session_date,
                stratum: spec.key_for(&record.metadata),
                metadata: record.metadata,
            });
            values.push(row);
        }

        Self::assemble(sessions, session_index, features, values)
    }

    /// Load wide-form session records from a JSON array file
    pub fn load_records<P: AsRef<Path>>(path: P) -> Result<Vec<SessionRecord>> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read session table: {}", path.as_ref().display())
        })?;
        let records: Vec<SessionRecord> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse session table: {}", path.as_ref().display()))?;
        debug!("Loaded {} session records", records.len());
        Ok(records)
    }

    fn assemble(
        sessions: Vec<SessionInfo>,
        session_index: HashMap<SessionKey, usize>,
        features: Vec<String>,
        values: Vec<Vec<Option<f64>>>,
    ) -> Self {
        let fingerprint = fingerprint_of(&sessions, &features, &values);
        Self {
            sessions,
            session_index,
            features,
            values,
            fingerprint,
        }
    }

    /// Reorder features: declared names first (in the given order), then the rest
    ///
    /// Declared names absent from the table are ignored.
    pub fn with_feature_order(self, declared: &[String]) -> Self {
        if declared.is_empty() {
            return self;
        }

        let mut order: Vec<usize> = Vec::with_capacity(self.features.len());
        for name in declared {
            if let Some(pos) = self.features.iter().position(|f| f == name) {
                if !order.contains(&pos) {
                    order.push(pos);
                }
            }
        }
        for pos in 0..self.features.len() {
            if !order.contains(&pos) {
                order.push(pos);
            }
        }

        let features = order.iter().map(|&i| self.features[i].clone()).collect();
        let values = self
            .values
            .iter()
            .map(|row| order.iter().map(|&i| row[i]).collect())
            .collect();

        Self::assemble(self.sessions, self.session_index, features, values)
    }

    /// Append the derived session-count features
    ///
    /// Sessions are ordered per subject by (session_date, session_id).
    /// A derived feature that already exists in the table is left untouched.
    pub fn with_session_counts(self) -> Self {
        let (session_count, stratum_count) = self.session_ordinals();

        let mut features = self.features.clone();
        let mut values = self.values.clone();
        for (name, column) in [
            (SESSION_COUNT_FEATURE, session_count),
            (STRATUM_SESSION_COUNT_FEATURE, stratum_count),
        ] {
            if features.iter().any(|f| f == name) {
                debug!("Feature {} already present, not deriving it", name);
                continue;
            }
            features.push(name.to_string());
            for (row, v) in values.iter_mut().zip(column) {
                row.push(v);
            }
        }

        Self::assemble(self.sessions, self.session_index, features, values)
    }

    fn session_ordinals(&self) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
        let mut per_subject: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (idx, session) in self.sessions.iter().enumerate() {
            per_subject
                .entry(session.key.subject_id.as_str())
                .or_default()
                .push(idx);
        }

        let mut session_count = vec![None; self.sessions.len()];
        let mut stratum_count = vec![None; self.sessions.len()];
        for indices in per_subject.values_mut() {
            indices.sort_by(|&a, &b| {
                let (sa, sb) = (&self.sessions[a], &self.sessions[b]);
                sa.session_date
                    .cmp(&sb.session_date)
                    .then_with(|| sa.key.session_id.cmp(&sb.key.session_id))
            });

            let mut within: HashMap<&StratumKey, usize> = HashMap::new();
            for (ordinal, &idx) in indices.iter().enumerate() {
                session_count[idx] = Some((ordinal + 1) as f64);
                let n = within.entry(&self.sessions[idx].stratum).or_insert(0);
                *n += 1;
                stratum_count[idx] = Some(*n as f64);
            }
        }

        (session_count, stratum_count)
    }

    pub fn sessions(&self) -> &[SessionInfo] {
        &self.sessions
    }

    pub fn session(&self, key: &SessionKey) -> Option<&SessionInfo> {
        self.session_index.get(key).map(|&i| &self.sessions[i])
    }

    pub(crate) fn session_position(&self, key: &SessionKey) -> Option<usize> {
        self.session_index.get(key).copied()
    }

    /// Features in declaration order
    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn feature_position(&self, name: &str) -> Option<usize> {
        self.features.iter().position(|f| f == name)
    }

    pub fn has_feature(&self, name: &str) -> bool {
        self.feature_position(name).is_some()
    }

    /// Value of a feature for a session; None when missing or absent
    pub fn value(&self, key: &SessionKey, feature: &str) -> Option<f64> {
        let s = self.session_position(key)?;
        let f = self.feature_position(feature)?;
        self.values[s][f]
    }

    pub(crate) fn value_at(&self, session: usize, feature: usize) -> Option<f64> {
        self.values[session][feature]
    }

    /// Sorted, de-duplicated metadata keys across all sessions
    pub fn metadata_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self
            .sessions
            .iter()
            .flat_map(|s| s.metadata.keys().cloned())
            .collect();
        fields.sort();
        fields.dedup();
        fields
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn fingerprint(&self) -> TableFingerprint {
        self.fingerprint
    }
}

fn fingerprint_of(
    sessions: &[SessionInfo],
    features: &[String],
    values: &[Vec<Option<f64>>],
) -> TableFingerprint {
    const SEP: &[u8] = &[0x1f];

    let mut hasher = Sha256::new();
    for feature in features {
        hasher.update(feature.as_bytes());
        hasher.update(SEP);
    }
    for (session, row) in sessions.iter().zip(values) {
        hasher.update(b"\x1e");
        hasher.update(session.key.subject_id.as_bytes());
        hasher.update(SEP);
        hasher.update(session.key.session_id.as_bytes());
        hasher.update(SEP);
        hasher.update(session.session_date.as_bytes());
        hasher.update(SEP);
        hasher.update(session.stratum.to_string().as_bytes());
        for (k, v) in &session.metadata {
            hasher.update(SEP);
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
        }
        for cell in row {
            match cell {
                Some(v) => {
                    hasher.update([1u8]);
                    hasher.update(v.to_le_bytes());
                }
                None => hasher.update([0u8]),
            }
        }
    }
    TableFingerprint(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(subject: &str, session: &str, date: &str, stratum: Option<&str>, feature: &str, value: Option<f64>) -> Measurement {
        Measurement {
            subject_id: subject.to_string(),
            session_id: session.to_string(),
            session_date: date.to_string(),
            stratum_key: stratum.map(str::to_string),
            feature_name: feature.to_string(),
            value,
        }
    }

    fn record(subject: &str, session: &str, date: &str, stage: &str, features: &[(&str, Option<f64>)]) -> SessionRecord {
        let mut metadata = BTreeMap::new();
        metadata.insert("task".to_string(), "foraging".to_string());
        metadata.insert("stage".to_string(), stage.to_string());
        SessionRecord {
            subject_id: subject.to_string(),
            session_id: session.to_string(),
            session_date: date.to_string(),
            metadata,
            features: features
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
        }
    }

    #[test]
    fn test_from_measurements_builds_grid() {
        let table = MeasurementTable::from_measurements(vec![
            m("m1", "1", "2024-01-01", Some("S"), "bias", Some(0.2)),
            m("m1", "1", "2024-01-01", Some("S"), "trials", Some(300.0)),
            m("m2", "1", "2024-01-01", Some("S"), "bias", None),
        ]);

        assert_eq!(table.len(), 2);
        assert_eq!(table.features(), &["bias".to_string(), "trials".to_string()]);
        assert_eq!(table.value(&SessionKey::new("m1", "1"), "trials"), Some(300.0));
        assert_eq!(table.value(&SessionKey::new("m2", "1"), "bias"), None);
        assert_eq!(table.value(&SessionKey::new("m2", "1"), "trials"), None);
    }

    #[test]
    fn test_non_finite_values_are_missing() {
        let table = MeasurementTable::from_measurements(vec![
            m("m1", "1", "2024-01-01", Some("S"), "bias", Some(f64::NAN)),
            m("m2", "1", "2024-01-01", Some("S"), "bias", Some(f64::INFINITY)),
        ]);
        assert_eq!(table.value(&SessionKey::new("m1", "1"), "bias"), None);
        assert_eq!(table.value(&SessionKey::new("m2", "1"), "bias"), None);
    }

    #[test]
    fn test_duplicate_measurement_keeps_first() {
        let table = MeasurementTable::from_measurements(vec![
            m("m1", "1", "2024-01-01", Some("S"), "bias", Some(1.0)),
            m("m1", "1", "2024-01-01", Some("S"), "bias", Some(2.0)),
        ]);
        assert_eq!(table.value(&SessionKey::new("m1", "1"), "bias"), Some(1.0));
    }

    #[test]
    fn test_missing_stratum_key_is_unstratified() {
        let table = MeasurementTable::from_measurements(vec![
            m("m1", "1", "2024-01-01", None, "bias", Some(1.0)),
            m("m2", "1", "2024-01-01", Some("  "), "bias", Some(1.0)),
        ]);
        assert!(table.sessions().iter().all(|s| s.stratum == StratumKey::Unstratified));
    }

    #[test]
    fn test_from_records_composes_stratum() {
        let spec = StratumKeySpec::default();
        let table = MeasurementTable::from_records(
            vec![record("m1", "1", "2024-01-01", "STAGE_1", &[("bias", Some(0.1))])],
            &spec,
        );
        assert_eq!(
            table.sessions()[0].stratum,
            StratumKey::Stratified("foraging_STAGE_1".to_string())
        );
        assert_eq!(table.metadata_fields(), vec!["stage".to_string(), "task".to_string()]);
    }

    #[test]
    fn test_with_feature_order() {
        let spec = StratumKeySpec::default();
        let table = MeasurementTable::from_records(
            vec![record(
                "m1",
                "1",
                "2024-01-01",
                "STAGE_1",
                &[("a", Some(1.0)), ("b", Some(2.0)), ("c", Some(3.0))],
            )],
            &spec,
        )
        .with_feature_order(&["c".to_string(), "missing".to_string(), "a".to_string()]);

        assert_eq!(table.features(), &["c".to_string(), "a".to_string(), "b".to_string()]);
        assert_eq!(table.value(&SessionKey::new("m1", "1"), "c"), Some(3.0));
        assert_eq!(table.value(&SessionKey::new("m1", "1"), "b"), Some(2.0));
    }

    #[test]
    fn test_session_counts_follow_dates() {
        let spec = StratumKeySpec::default();
        let table = MeasurementTable::from_records(
            vec![
                record("m1", "3", "2024-01-03", "STAGE_2", &[]),
                record("m1", "1", "2024-01-01", "STAGE_1", &[]),
                record("m1", "2", "2024-01-02", "STAGE_1", &[]),
                record("m2", "1", "2024-01-01", "STAGE_1", &[]),
            ],
            &spec,
        )
        .with_session_counts();

        let key = |s: &str, n: &str| SessionKey::new(s, n);
        assert_eq!(table.value(&key("m1", "1"), SESSION_COUNT_FEATURE), Some(1.0));
        assert_eq!(table.value(&key("m1", "3"), SESSION_COUNT_FEATURE), Some(3.0));
        assert_eq!(table.value(&key("m1", "2"), STRATUM_SESSION_COUNT_FEATURE), Some(2.0));
        assert_eq!(table.value(&key("m1", "3"), STRATUM_SESSION_COUNT_FEATURE), Some(1.0));
        assert_eq!(table.value(&key("m2", "1"), SESSION_COUNT_FEATURE), Some(1.0));
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = MeasurementTable::from_measurements(vec![m("m1", "1", "d", Some("S"), "x", Some(1.0))]);
        let b = MeasurementTable::from_measurements(vec![m("m1", "1", "d", Some("S"), "x", Some(1.0))]);
        let c = MeasurementTable::from_measurements(vec![m("m1", "1", "d", Some("S"), "x", Some(1.5))]);

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().to_string().len(), 64);
    }
}
