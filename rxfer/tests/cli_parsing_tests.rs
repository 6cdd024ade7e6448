//! CLI argument parsing tests
//!
//! These tests only exercise argument parsing and validation that happens before any
//! connection is attempted.

use assert_cmd::Command;
use predicates::prelude::*;

const ENV_VARS: &[&str] = &[
    "RXFER_SOURCE_HOST",
    "RXFER_SOURCE_PORT",
    "RXFER_SOURCE_USER",
    "RXFER_SOURCE_PASSWORD",
    "RXFER_SOURCE_KEY",
    "RXFER_SOURCE_KEY_PASSPHRASE",
    "RXFER_TARGET_HOST",
    "RXFER_TARGET_PORT",
    "RXFER_TARGET_USER",
    "RXFER_TARGET_PASSWORD",
    "RXFER_TARGET_KEY",
    "RXFER_TARGET_KEY_PASSPHRASE",
    "RXFER_STRICT_HOST_KEYS",
    "RXFER_CONCURRENCY",
];

fn rxfer() -> Command {
    let mut cmd = Command::cargo_bin("rxfer").unwrap();
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_help_runs() {
    rxfer()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--source-host"))
        .stdout(predicate::str::contains("--target-host"))
        .stdout(predicate::str::contains("upload-file"));
}

#[test]
fn test_version_runs() {
    rxfer().arg("--version").assert().success();
}

#[test]
fn test_subcommand_is_required() {
    rxfer().assert().failure().code(2);
}

#[test]
fn test_exec_rejects_unknown_role() {
    rxfer()
        .args(["exec", "--on", "middle", "uptime"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("middle"));
}

#[test]
fn test_download_requires_source_host() {
    let tmp_dir = tempfile::tempdir().unwrap();
    rxfer()
        .args(["download", "/var/lib/app"])
        .arg(tmp_dir.path())
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("--source-host is required"));
}

#[test]
fn test_upload_requires_target_user() {
    let tmp_dir = tempfile::tempdir().unwrap();
    rxfer()
        .args(["--target-host", "127.0.0.1", "upload"])
        .arg(tmp_dir.path())
        .arg("/srv/app")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("--target-user is required"));
}

#[test]
fn test_upload_ignores_source_options() {
    // only the target role is needed for uploads
    let tmp_dir = tempfile::tempdir().unwrap();
    rxfer()
        .args([
            "--source-host",
            "127.0.0.1",
            "--source-user",
            "root",
            "--source-password",
            "secret",
            "upload",
        ])
        .arg(tmp_dir.path())
        .arg("/srv/app")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--target-host is required"));
}

#[test]
fn test_secret_is_required() {
    rxfer()
        .args([
            "--source-host",
            "127.0.0.1",
            "--source-user",
            "root",
            "exec",
            "uptime",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "--source-password or --source-key is required",
        ));
}

#[test]
fn test_endpoint_options_read_from_environment() {
    rxfer()
        .env("RXFER_TARGET_HOST", "127.0.0.1")
        .args(["exec", "--on", "target", "uptime"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--target-user is required"));
}

#[test]
fn test_zero_concurrency_rejected() {
    let tmp_dir = tempfile::tempdir().unwrap();
    rxfer()
        .args(["--concurrency", "0", "download", "/"])
        .arg(tmp_dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "work queue concurrency must be greater than zero",
        ));
}

#[test]
fn test_quiet_suppresses_errors() {
    let tmp_dir = tempfile::tempdir().unwrap();
    rxfer()
        .args(["-q", "download", "/"])
        .arg(tmp_dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::is_empty());
}

#[test]
fn test_missing_key_file_reported() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let key = tmp_dir.path().join("missing_id_ed25519");
    rxfer()
        .args(["--source-host", "127.0.0.1", "--source-user", "root", "--source-key"])
        .arg(&key)
        .args(["exec", "uptime"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed reading source private key"));
}
