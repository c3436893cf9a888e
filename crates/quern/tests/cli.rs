//! End-to-end CLI tests.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::NamedTempFile;

/// Writes a small fruit corpus to a temp file.
fn fruit_corpus() -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp corpus");
    let corpus = serde_json::json!([
        { "text": "ripe mango", "values": { "0": "a" } },
        { "text": "green mango", "values": { "0": "a" } },
        { "text": "ripe apple", "values": { "0": "b" } },
    ]);
    write!(file, "{corpus}").expect("write corpus");
    file
}

#[test]
fn search_all_terms_finds_single_match() {
    let corpus = fruit_corpus();
    Command::cargo_bin("quern")
        .unwrap()
        .args(["search", corpus.path().to_str().unwrap(), "ripe", "mango"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ripe mango"))
        .stdout(predicate::str::contains("1 to 1 of about 1 matches"));
}

#[test]
fn search_any_returns_json_items() {
    let corpus = fruit_corpus();
    let output = Command::cargo_bin("quern")
        .unwrap()
        .args([
            "search",
            corpus.path().to_str().unwrap(),
            "mango",
            "apple",
            "--op",
            "any",
            "--json",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let parsed: serde_json::Value = serde_json::from_slice(&output).expect("valid JSON output");
    assert_eq!(parsed["items"].as_array().map(Vec::len), Some(3));
    assert_eq!(parsed["matches_upper_bound"], 3);
}

#[test]
fn collapse_flag_deduplicates() {
    let corpus = fruit_corpus();
    let output = Command::cargo_bin("quern")
        .unwrap()
        .args([
            "search",
            corpus.path().to_str().unwrap(),
            "mango",
            "apple",
            "--op",
            "any",
            "--collapse",
            "0",
            "--json",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let parsed: serde_json::Value = serde_json::from_slice(&output).expect("valid JSON output");
    assert_eq!(parsed["items"].as_array().map(Vec::len), Some(2));
}

#[test]
fn missing_corpus_fails() {
    Command::cargo_bin("quern")
        .unwrap()
        .args(["search", "/nonexistent/corpus.json", "mango"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot read"));
}

#[test]
fn phrase_requires_order() {
    let corpus = fruit_corpus();
    Command::cargo_bin("quern")
        .unwrap()
        .args([
            "search",
            corpus.path().to_str().unwrap(),
            "mango",
            "ripe",
            "--op",
            "phrase",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("no matches"));
}
