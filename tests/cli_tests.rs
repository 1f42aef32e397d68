//! Command-line tests for the stratarank binary
#![allow(deprecated)] // suppress assert_cmd::Command::cargo_bin deprecation in tests

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn fixture() -> String {
    format!("{}/tests/fixtures/sessions.json", env!("CARGO_MANIFEST_DIR"))
}

fn stratarank() -> Command {
    Command::cargo_bin("stratarank").unwrap()
}

#[test]
fn test_text_report() {
    stratarank()
        .arg("--table")
        .arg(fixture())
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "m2/1 2024-05-01 [Coupled Baiting_STAGE_1] NONE overall=66.7 (NORMAL)",
        ))
        .stdout(predicate::str::contains(
            "reasons: percentile:finished_trials, percentile:foraging_eff, percentile:water_day_total, threshold:water_day_total",
        ))
        .stdout(predicate::str::contains("m6/1 2024-05-03 [UNSTRATIFIED] NONE overall=- (INSUFFICIENT_DATA)"))
        .stdout(predicate::str::contains(
            "    violated water_day_total (warning): water_day_total = 4.0",
        ));
}

#[test]
fn test_no_default_thresholds() {
    stratarank()
        .arg("--table")
        .arg(fixture())
        .arg("--no-default-thresholds")
        .assert()
        .success()
        .stdout(predicate::str::contains("threshold:").not());
}

#[test]
fn test_filter_and_facet() {
    stratarank()
        .args(["--table", fixture().as_str(), "--filter", "stage=STAGE_2", "--facet", "stage"])
        .assert()
        .success()
        .stdout(predicate::str::contains("m1/2"))
        .stdout(predicate::str::contains("m1/1 ").not())
        .stdout(predicate::str::contains("Facet stage:"))
        .stdout(predicate::str::is_match(r"STAGE_1\s+4").unwrap())
        .stdout(predicate::str::is_match(r"STAGE_2\s+3").unwrap());
}

#[test]
fn test_unknown_filter_field_fails() {
    stratarank()
        .args(["--table", fixture().as_str(), "--filter", "trainer=Alice"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown filter field 'trainer'"));
}

#[test]
fn test_malformed_filter_expression_fails() {
    stratarank()
        .args(["--table", fixture().as_str(), "--filter", "stage"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid filter expression"));
}

#[test]
fn test_latest_json() {
    let output = stratarank()
        .args(["--table", fixture().as_str(), "--latest", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let rows = value["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 6);
    assert!(rows
        .iter()
        .any(|r| r["subject_id"] == "m1" && r["session_id"] == "2"));
}

#[test]
fn test_csv_output() {
    stratarank()
        .args(["--table", fixture().as_str(), "--format", "csv"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with(
            "subject_id,session_id,session_date,stratum,overall_percentile,overall_category,combined_severity,threshold_alert,reasons,finished_trials_percentile",
        ))
        .stdout(predicate::str::contains("m4,1,2024-05-01,Coupled Baiting_STAGE_1,33.33,NORMAL,NONE,N,"));
}

#[test]
fn test_summary() {
    stratarank()
        .args(["--table", fixture().as_str(), "--summary"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Sessions: 8"))
        .stdout(predicate::str::contains("Threshold violations: 1"))
        .stdout(predicate::str::contains("Strata:"));
}

#[test]
fn test_matrix() {
    let output = stratarank()
        .args(["--table", fixture().as_str(), "--matrix", "m1"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["subject_id"], "m1");
    assert_eq!(value["stratum_boundaries"][0], 1);
}

#[test]
fn test_matrix_unknown_subject() {
    stratarank()
        .args(["--table", fixture().as_str(), "--matrix", "nobody"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown subject: nobody"));
}

#[test]
fn test_config_file() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("engine.toml");
    fs::write(
        &config,
        r#"
features = ["foraging_eff"]

[[threshold]]
id = "low_trials"
feature = "finished_trials"
lower = 310
severity = "critical"
"#,
    )
    .unwrap();

    stratarank()
        .args(["--table", fixture().as_str()])
        .arg("--config")
        .arg(&config)
        .args(["--format", "csv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("foraging_eff_percentile"))
        .stdout(predicate::str::contains("finished_trials_percentile").not())
        .stdout(predicate::str::contains("threshold:low_trials"));
}

#[test]
fn test_invalid_config_fails() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("engine.toml");
    fs::write(&config, "min_population = 0\n").unwrap();

    stratarank()
        .args(["--table", fixture().as_str()])
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("min_population must be >= 1"));
}

#[test]
fn test_missing_table_fails() {
    let dir = TempDir::new().unwrap();
    stratarank()
        .arg("--table")
        .arg(dir.path().join("absent.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read session table"));
}
