// Tests for session stratification

use super::*;
use crate::measurement::{Measurement, MeasurementTable, SessionKey};
use std::collections::BTreeMap;

fn row(subject: &str, session: &str, stratum: Option<&str>) -> Measurement {
    Measurement {
        subject_id: subject.to_string(),
        session_id: session.to_string(),
        session_date: "2024-03-01".to_string(),
        stratum_key: stratum.map(str::to_string),
        feature_name: "finished_trials".to_string(),
        value: Some(100.0),
    }
}

fn metadata(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_stratify_groups_by_key() {
    let table = MeasurementTable::from_measurements(vec![
        row("m1", "1", Some("Coupled_STAGE_1")),
        row("m2", "1", Some("Coupled_STAGE_1")),
        row("m3", "1", Some("Coupled_STAGE_2")),
    ]);

    let strata = stratify(&table);
    assert_eq!(strata.len(), 2);

    let stage1 = strata
        .sessions(&StratumKey::Stratified("Coupled_STAGE_1".to_string()))
        .unwrap();
    assert_eq!(
        stage1.iter().cloned().collect::<Vec<_>>(),
        vec![SessionKey::new("m1", "1"), SessionKey::new("m2", "1")]
    );
}

#[test]
fn test_missing_key_goes_to_unstratified() {
    let table = MeasurementTable::from_measurements(vec![
        row("m1", "1", None),
        row("m2", "1", Some("")),
        row("m3", "1", Some(UNSTRATIFIED)),
        row("m4", "1", Some("S")),
    ]);

    let strata = stratify(&table);
    assert_eq!(strata.len(), 1);
    assert_eq!(strata.unstratified().map(|s| s.len()), Some(3));
    assert!(strata.ranked().all(|(key, _)| key.is_stratified()));
}

#[test]
fn test_unstratified_sorts_last() {
    let table = MeasurementTable::from_measurements(vec![row("m1", "1", None), row("m2", "1", Some("Z"))]);
    let keys: Vec<_> = stratify(&table).iter().map(|(k, _)| k.clone()).collect();
    assert_eq!(
        keys,
        vec![StratumKey::Stratified("Z".to_string()), StratumKey::Unstratified]
    );
}

#[test]
fn test_key_spec_composes_fields() {
    let spec = StratumKeySpec::new(["curriculum", "stage", "version"]);
    let key = spec.key_for(&metadata(&[
        ("curriculum", "Uncoupled Baiting"),
        ("stage", "STAGE_3"),
        ("version", "v2"),
        ("rig", "447-1-A"),
    ]));
    assert_eq!(
        key,
        StratumKey::Stratified("Uncoupled Baiting_STAGE_3_v2".to_string())
    );
}

#[test]
fn test_key_spec_missing_component_is_unstratified() {
    let spec = StratumKeySpec::new(["curriculum", "stage"]);
    assert_eq!(
        spec.key_for(&metadata(&[("curriculum", "Coupled")])),
        StratumKey::Unstratified
    );
    assert_eq!(
        spec.key_for(&metadata(&[("curriculum", "Coupled"), ("stage", "   ")])),
        StratumKey::Unstratified
    );
}

#[test]
fn test_key_spec_without_fields_is_unstratified() {
    let spec = StratumKeySpec::new(Vec::<String>::new());
    assert_eq!(spec.key_for(&metadata(&[("stage", "A")])), StratumKey::Unstratified);
}

#[test]
fn test_stratum_key_display_and_serialize() {
    assert_eq!(StratumKey::Unstratified.to_string(), UNSTRATIFIED);
    let json = serde_json::to_string(&StratumKey::Stratified("S1".to_string())).unwrap();
    assert_eq!(json, "\"S1\"");
    assert_eq!(StratumKey::Unstratified.as_str(), None);
}
