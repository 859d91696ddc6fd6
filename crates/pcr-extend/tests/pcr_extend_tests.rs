use predicates::prelude::*;
use sha2::{Digest, Sha256};
use std::fs;
use tempfile::tempdir;

fn extend() -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("pcr-extend").unwrap();
    cmd.env("TPM_DEMO_CONFIG", "/nonexistent/tpm-demo-settings.json");
    cmd.args(["--backend", "soft"]);
    cmd
}

/// PCR value after one extend of a zeroed register.
fn expected_after(digest: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update([0u8; 32]);
    hasher.update(digest);
    hex::encode_upper(hasher.finalize())
}

#[test]
fn measures_file_content() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("input.data");
    fs::write(&file, b"measured boot component").unwrap();
    let digest = Sha256::digest(b"measured boot component");

    let mut cmd = extend();
    cmd.arg("10").arg(&file);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("PCR Index: 10"))
        .stdout(predicate::str::contains(hex::encode_upper(digest)))
        .stdout(predicate::str::contains("PCR10 digest:"))
        .stdout(predicate::str::contains(expected_after(&digest)))
        .stdout(predicate::str::contains("using test data").not());
}

#[test]
fn missing_file_uses_test_digest() {
    let dir = tempdir().unwrap();
    let test_digest: Vec<u8> = (0u8..32).collect();
    let mut cmd = extend();
    cmd.current_dir(dir.path());
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("PCR Index: 16"))
        .stdout(predicate::str::contains("Error loading file input.data, using test data"))
        .stdout(predicate::str::contains(
            "000102030405060708090A0B0C0D0E0F101112131415161718191A1B1C1D1E1F",
        ))
        .stdout(predicate::str::contains(expected_after(&test_digest)));
}

#[test]
fn rejects_out_of_range_index() {
    for index in ["24", "-1", "abc"] {
        let mut cmd = extend();
        cmd.arg(index);
        cmd.assert()
            .failure()
            .stdout(predicate::str::contains("PCR index is out of range (0-23)"));
    }
}

#[test]
fn negative_index_reaches_range_check() {
    let mut cmd = extend();
    cmd.arg("-1");
    cmd.assert()
        .code(1)
        .stdout(predicate::str::contains("Failure: PCR index is out of range (0-23)"))
        .stderr(predicate::str::contains("unexpected argument").not());
}
