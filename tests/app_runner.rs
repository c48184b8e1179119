//! Installer stub tests
//!
//! Runs the `app-runner` binary against bundles written with the core
//! library.
//!
//! ## What These Tests Verify
//!
//! 1. With no arguments the stub prints the packaged app info
//! 2. An expired user certificate exits 7 without contacting the agent
//! 3. A missing bundle is a local I/O failure (exit 9)
//! 4. No agent listening is a connection failure (exit 12)
//! 5. Unknown arguments are usage errors (exit 2)

use std::net::TcpListener;
use std::path::Path;

use apppack_core::{AppInfoBlock, CertBundle, Descriptor, InstallerBundle};
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn stub() -> Command {
    let mut cmd = Command::cargo_bin("app-runner").expect("Failed to find app-runner binary");
    cmd.env_remove("APP_RUNNER_BUNDLE");
    cmd
}

fn user_bundle(not_after_year: i32) -> CertBundle {
    let ca_key = rcgen::KeyPair::generate().unwrap();
    let mut ca_params = rcgen::CertificateParams::default();
    ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    let ca = ca_params.self_signed(&ca_key).unwrap();

    let user_key = rcgen::KeyPair::generate().unwrap();
    let mut params = rcgen::CertificateParams::new(vec!["installer".to_string()]).unwrap();
    params.not_before = rcgen::date_time_ymd(2000, 1, 1);
    params.not_after = rcgen::date_time_ymd(not_after_year, 1, 1);
    let user = params.signed_by(&user_key, &ca, &ca_key).unwrap();
    CertBundle::new(user.pem(), user_key.serialize_pem(), ca.pem())
}

/// A bundle whose content is opaque bytes; the stub never opens the container.
fn write_bundle(dir: &Path, port: u16, certs: CertBundle) {
    let info = AppInfoBlock::new(
        port,
        Descriptor::app("shop", "Web shop"),
        Descriptor::version("3.1", "hotfix"),
    );
    InstallerBundle::assemble(b"sealed container", certs, info)
        .unwrap()
        .write_to_dir(dir)
        .unwrap();
}

/// A loopback port with nothing listening on it.
fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[test]
fn test_no_args_prints_app_info() {
    let dir = tempdir().unwrap();
    write_bundle(dir.path(), 7443, CertBundle::new("u", "uk", "r"));

    stub()
        .arg("--bundle")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("shop"))
        .stdout(predicate::str::contains("7443"));
}

#[test]
fn test_bundle_from_environment() {
    let dir = tempdir().unwrap();
    write_bundle(dir.path(), 9001, CertBundle::new("u", "uk", "r"));

    stub()
        .env("APP_RUNNER_BUNDLE", dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("9001"));
}

#[test]
fn test_expired_certificate_exit_code() {
    let dir = tempdir().unwrap();
    write_bundle(dir.path(), closed_port(), user_bundle(2001));

    stub()
        .arg("--bundle")
        .arg(dir.path())
        .arg("install")
        .assert()
        .code(7)
        .stdout(predicate::str::contains("expired"));
}

#[test]
fn test_missing_bundle_exit_code() {
    let dir = tempdir().unwrap();

    stub()
        .arg("--bundle")
        .arg(dir.path().join("nowhere"))
        .arg("install")
        .assert()
        .code(9);
}

#[test]
fn test_unreadable_credentials_exit_code() {
    let dir = tempdir().unwrap();
    write_bundle(dir.path(), closed_port(), CertBundle::new("u", "uk", "r"));
    std::fs::write(dir.path().join("cert.info"), b"{\"u\": 1}").unwrap();

    stub()
        .arg("--bundle")
        .arg(dir.path())
        .arg("install")
        .assert()
        .code(6);
}

#[test]
fn test_agent_not_listening_exit_code() {
    let dir = tempdir().unwrap();
    write_bundle(dir.path(), closed_port(), user_bundle(2999));

    stub()
        .arg("--bundle")
        .arg(dir.path())
        .arg("install")
        .assert()
        .code(12);
}

#[test]
fn test_usage_error_exit_code() {
    stub().arg("uninstall").assert().code(2);
}
