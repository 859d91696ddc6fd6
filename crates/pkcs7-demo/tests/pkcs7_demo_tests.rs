use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;
use tpm_demo_core::pkcs7::{self, Verifier};
use tpm_demo_core::soft::SoftDevice;

fn demo() -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("pkcs7-demo").unwrap();
    cmd.env("TPM_DEMO_CONFIG", "/nonexistent/tpm-demo-settings.json");
    cmd.arg("--backend").arg("soft");
    cmd
}

#[test]
fn signs_and_verifies_both_containers() {
    let dir = tempdir().unwrap();
    let mut cmd = demo();
    cmd.arg("--out-dir")
        .arg(dir.path())
        .arg("--cert")
        .arg(dir.path().join("client-rsa-cert.der"));
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("PKCS7 Signed Container"))
        .stdout(predicate::str::contains("PKCS7 Header"))
        .stdout(predicate::str::contains("PKCS7 Footer"))
        .stdout(predicate::str::contains("PKCS7 Container Verified (using TPM)").count(2))
        .stdout(predicate::str::contains("PKCS7 Container Verified (using software)").count(2));

    let single = fs::read(dir.path().join("pkcs7tpmsigned.p7s")).unwrap();
    let content =
        pkcs7::verify_signed_data(&mut Verifier::<SoftDevice>::Software, &single).unwrap();
    assert_eq!(content, b"My encoded DER cert.\0");

    let ex = fs::read(dir.path().join("pkcs7tpmsignedex.p7s")).unwrap();
    let content = pkcs7::verify_signed_data(&mut Verifier::<SoftDevice>::Software, &ex).unwrap();
    assert_eq!(content.len(), 1024 * 1024 + 12);
    assert!(dir.path().join("pkcs7-signer-cert.der").exists());
}

#[test]
fn reuses_key_blob_and_certificate() {
    let dir = tempdir().unwrap();
    let blob_path = dir.path().join("pkcs7-rsa-key.software.json");
    let cert_path = dir.path().join("pkcs7-signer-cert.der");
    let run = || {
        let mut cmd = demo();
        cmd.arg("--no-ex")
            .arg("--out-dir")
            .arg(dir.path())
            .arg("--cert")
            .arg(&cert_path);
        cmd.assert()
            .success()
            .stdout(predicate::str::contains("PKCS7 Header").not());
    };

    run();
    let first_blob = fs::read(&blob_path).unwrap();
    let first_cert = fs::read(&cert_path).unwrap();

    run();
    assert_eq!(fs::read(&blob_path).unwrap(), first_blob);
    assert_eq!(fs::read(&cert_path).unwrap(), first_cert);

    // The second container is signed by the key behind the stored certificate.
    let cert = tpm_demo_core::cert::load_certificate(&cert_path)
        .unwrap()
        .unwrap();
    let signed = fs::read(dir.path().join("pkcs7tpmsigned.p7s")).unwrap();
    pkcs7::verify_signed_data(&mut Verifier::<SoftDevice>::Software, &signed).unwrap();
    assert!(signed
        .windows(cert.tbs_certificate.serial_number.as_bytes().len())
        .any(|w| w == cert.tbs_certificate.serial_number.as_bytes()));
}

#[test]
fn malformed_certificate_fails() {
    let dir = tempdir().unwrap();
    let cert = dir.path().join("bad.der");
    fs::write(&cert, b"definitely not DER").unwrap();
    let mut cmd = demo();
    cmd.arg("--out-dir").arg(dir.path()).arg("--cert").arg(&cert);
    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("Failure:"));
}
