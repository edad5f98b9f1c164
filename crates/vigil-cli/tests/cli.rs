//! Integration tests for the `vigil` binary.
//!
//! Each test lays out a store fixture in a temp directory, launches the
//! binary via `assert_cmd`, and asserts on exit code + output.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn vigil() -> Command {
    Command::cargo_bin("vigil").expect("binary not found")
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

const DECODER: &str = r#"
name: decoder-auth
check:
  - event.module: auth
map:
  - event.kind: event
"#;

const POLICY: &str = r#"
name: policy-main
decoders: [decoder-auth]
"#;

const BROKEN_DECODER: &str = r#"
name: decoder-broken
check:
  - event.count: "+int_equal/not-a-number"
"#;

const BROKEN_POLICY: &str = r#"
name: policy-broken
decoders: [decoder-broken]
"#;

/// Write a store with the given `(name, yaml)` documents.
fn store_with(docs: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("store");
    for (name, yaml) in docs {
        let mut path = store.clone();
        for segment in name.split('.') {
            path.push(segment);
        }
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path.with_extension("yml"), yaml).unwrap();
    }
    dir
}

fn collaborator_args(cmd: &mut Command, dir: &Path) {
    cmd.arg("--store_path")
        .arg(dir.join("store"))
        .arg("--kvdb_path")
        .arg(dir.join("kvdb"));
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

#[test]
fn validate_accepts_a_well_formed_policy() {
    let dir = store_with(&[("decoder-auth", DECODER), ("policy-main", POLICY)]);
    let mut cmd = vigil();
    cmd.arg("validate").arg("policy-main");
    collaborator_args(&mut cmd, dir.path());
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("policy \"policy-main\": ok"));
}

#[test]
fn validate_reports_build_errors() {
    let dir = store_with(&[
        ("decoder-broken", BROKEN_DECODER),
        ("policy-broken", BROKEN_POLICY),
    ]);
    let mut cmd = vigil();
    cmd.arg("validate").arg("policy-broken");
    collaborator_args(&mut cmd, dir.path());
    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("not-a-number"));
}

#[test]
fn validate_reports_missing_policies() {
    let dir = store_with(&[]);
    let mut cmd = vigil();
    cmd.arg("validate").arg("policy-ghost");
    collaborator_args(&mut cmd, dir.path());
    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("not found"));
}

// ---------------------------------------------------------------------------
// argument surface
// ---------------------------------------------------------------------------

#[test]
fn start_rejects_a_malformed_route_spec() {
    let dir = store_with(&[]);
    let mut cmd = vigil();
    cmd.arg("start").arg("--policy").arg("only:two:parts");
    collaborator_args(&mut cmd, dir.path());
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("name:priority:filter:policy"));
}

#[test]
fn start_rejects_out_of_range_server_threads() {
    let dir = store_with(&[]);
    let mut cmd = vigil();
    cmd.arg("start").arg("--server_threads").arg("4096");
    collaborator_args(&mut cmd, dir.path());
    cmd.assert().failure();
}

#[test]
fn help_lists_the_subcommands() {
    vigil()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("start"))
        .stdout(predicate::str::contains("validate"));
}
