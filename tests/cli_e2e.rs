//! End-to-end CLI tests for the shotscan binary.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Command with an isolated config home so a user config never leaks in.
fn shotscan(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("shotscan").unwrap();
    cmd.env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("HOME", home.path())
        .env_remove("RUST_LOG");
    cmd
}

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let home = TempDir::new().unwrap();
    shotscan(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Walk short-link identifiers"))
        .stdout(predicate::str::contains("--max-attempts"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    let home = TempDir::new().unwrap();
    shotscan(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("shotscan"));
}

/// Test that invalid flags cause non-zero exit.
#[test]
fn test_binary_invalid_flag_returns_error() {
    let home = TempDir::new().unwrap();
    shotscan(&home)
        .arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_binary_missing_config_file_is_fatal() {
    let home = TempDir::new().unwrap();
    shotscan(&home)
        .args(["--config", "/nonexistent/shotscan.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("config"));
}

#[test]
fn test_binary_corrupt_dead_list_is_fatal() {
    let home = TempDir::new().unwrap();
    let dead = home.path().join("dead.txt");
    fs::write(&dead, "aa0000\nnot-an-id\n").unwrap();

    shotscan(&home)
        .arg("--dead-list")
        .arg(&dead)
        .arg("--output-dir")
        .arg(home.path().join("images"))
        .args(["--base-url", "http://127.0.0.1:9/", "--max-attempts", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("line 2"));
}

#[test]
fn test_binary_browser_backend_requires_feature() {
    if cfg!(feature = "browser") {
        return;
    }
    let home = TempDir::new().unwrap();
    shotscan(&home)
        .arg("--output-dir")
        .arg(home.path().join("images"))
        .args(["--backend", "browser", "--max-attempts", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("browser"));
}

// ==================== Scan Tests ====================

#[tokio::test(flavor = "multi_thread")]
async fn test_binary_three_not_found_attempts_exit_zero() {
    let server = MockServer::start().await;
    let home = TempDir::new().unwrap();
    let output = home.path().join("images");

    shotscan(&home)
        .arg("--output-dir")
        .arg(&output)
        .args(["--base-url", &format!("{}/", server.uri())])
        .args(["--max-attempts", "3", "--delay", "0", "-q"])
        .assert()
        .success();

    let requests = server.received_requests().await.unwrap();
    let paths: Vec<_> = requests.iter().map(|r| r.url.path().to_string()).collect();
    assert_eq!(paths, vec!["/aa0000", "/aa0001", "/aa0002"]);
    assert!(!output.join(".shotscan").join("dead_ids.txt").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_binary_records_tombstone_and_skips_it_next_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/aa0000"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"<img class="screenshot-image" src="https://i.imgur.com/removed.png">"#,
            "text/html",
        ))
        .mount(&server)
        .await;
    let home = TempDir::new().unwrap();
    let output = home.path().join("images");
    let base_url = format!("{}/", server.uri());

    for _ in 0..2 {
        shotscan(&home)
            .arg("--output-dir")
            .arg(&output)
            .args(["--base-url", &base_url, "--max-attempts", "1", "--delay", "0"])
            .assert()
            .success();
    }

    let dead = fs::read_to_string(output.join(".shotscan").join("dead_ids.txt")).unwrap();
    assert_eq!(dead, "aa0000\n");
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1, "second run must skip the dead identifier");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_binary_log_file_receives_summary() {
    let server = MockServer::start().await;
    let home = TempDir::new().unwrap();
    let log = home.path().join("logs").join("shotscan.log");

    shotscan(&home)
        .arg("--output-dir")
        .arg(home.path().join("images"))
        .arg("--log-file")
        .arg(&log)
        .args(["--base-url", &format!("{}/", server.uri())])
        .args(["--max-attempts", "1", "--delay", "0"])
        .assert()
        .success();

    let contents = fs::read_to_string(&log).unwrap();
    assert!(contents.contains("Scan complete"), "{contents}");
}
