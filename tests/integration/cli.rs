//! Binary smoke tests

use assert_cmd::Command;
use std::io::Write;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn stdout_of(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_help_lists_commands() {
    let output = Command::cargo_bin("rest-poller")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .clone();

    let stdout = stdout_of(&output);
    assert!(stdout.contains("poll"));
    assert!(stdout.contains("config"));
}

#[test]
fn test_config_show_prints_defaults() {
    let output = Command::cargo_bin("rest-poller")
        .unwrap()
        .env_remove("REST_POLLER_CONFIG")
        .args(["config", "show"])
        .assert()
        .success()
        .get_output()
        .clone();

    let config: serde_json::Value = serde_json::from_str(&stdout_of(&output)).unwrap();
    assert_eq!(config["max_queue_len"], 8000);
    assert_eq!(config["max_prior_requests"], 25);
    assert_eq!(config["retry_attempts"], 4);
    assert_eq!(config["continuation_max"], 10);
}

#[test]
fn test_config_show_reads_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"throttling": true, "continuation_max": 3}}"#).unwrap();

    let output = Command::cargo_bin("rest-poller")
        .unwrap()
        .args(["--config", file.path().to_str().unwrap(), "config", "show"])
        .assert()
        .success()
        .get_output()
        .clone();

    let config: serde_json::Value = serde_json::from_str(&stdout_of(&output)).unwrap();
    assert_eq!(config["throttling"], true);
    assert_eq!(config["continuation_max"], 3);
    assert_eq!(config["max_queue_len"], 8000);
}

#[test]
fn test_invalid_config_fails() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"retry_attempts": 0}}"#).unwrap();

    Command::cargo_bin("rest-poller")
        .unwrap()
        .args(["--config", file.path().to_str().unwrap(), "config", "show"])
        .assert()
        .failure();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_poll_prints_json_lines() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items.json"))
        .and(query_param("q", "rust"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 7})))
        .mount(&server)
        .await;

    let url = format!("{}/items.json", server.uri());
    let output = tokio::task::spawn_blocking(move || {
        Command::cargo_bin("rest-poller")
            .unwrap()
            .env_remove("REST_POLLER_CONFIG")
            .env_remove("REST_POLLER_TOKEN")
            .args(["poll", &url, "--param", "q=rust", "--cycles", "2"])
            .assert()
            .success()
            .get_output()
            .clone()
    })
    .await
    .unwrap();

    let lines: Vec<serde_json::Value> = stdout_of(&output)
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines, vec![serde_json::json!({"id": 7}), serde_json::json!({"id": 7})]);
}
