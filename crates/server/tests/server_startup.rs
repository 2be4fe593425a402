use std::net::TcpListener;
use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use tempfile::TempDir;
use tokio::time::{sleep, timeout};

/// Find an available port
fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Minimal valid config keeping all files inside `dir`
fn minimal_config(dir: &Path, port: u16) -> String {
    format!(
        r#"
[auth]
method = "none"

[server]
host = "127.0.0.1"
port = {}

[database]
path = '{}'

[media]
root = '{}'
"#,
        port,
        dir.join("startup.db").display(),
        dir.join("media").display(),
    )
}

fn write_config(dir: &Path, content: &str) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    std::fs::write(&path, content).unwrap();
    path
}

/// Spawn the server and return a handle
fn spawn_server(config_path: &Path) -> tokio::process::Child {
    tokio::process::Command::new(env!("CARGO_BIN_EXE_scriptrelay"))
        .env("SCRIPTRELAY_CONFIG", config_path)
        .env("RUST_LOG", "error")
        .kill_on_drop(true)
        .spawn()
        .expect("Failed to spawn server")
}

/// Wait for server to be ready
async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    let client = Client::new();
    for _ in 0..max_attempts {
        if client
            .get(format!("http://127.0.0.1:{}/api/v1/health", port))
            .send()
            .await
            .is_ok()
        {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Run the binary to completion with the given config and report success.
async fn run_to_exit(config_path: &Path) -> bool {
    let output = timeout(
        Duration::from_secs(5),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_scriptrelay"))
            .env("SCRIPTRELAY_CONFIG", config_path)
            .env("RUST_LOG", "error")
            .output(),
    )
    .await
    .expect("Command timed out")
    .expect("Failed to execute command");
    output.status.success()
}

#[tokio::test]
async fn test_health_and_sanitized_config() {
    let dir = TempDir::new().unwrap();
    let port = get_available_port();
    let config_path = write_config(dir.path(), &minimal_config(dir.path(), port));

    let mut server = spawn_server(&config_path);
    assert!(
        wait_for_server(port, 60).await,
        "Server did not start in time"
    );

    let client = Client::new();
    let health: serde_json::Value = client
        .get(format!("http://127.0.0.1:{}/api/v1/health", port))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(health["status"], "ok");

    let config: serde_json::Value = client
        .get(format!("http://127.0.0.1:{}/api/v1/config", port))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(config["auth"]["method"], "none");
    assert_eq!(config["server"]["port"], port);
    assert_eq!(config["queues"]["lua_execution"]["timeout_secs"], 300);

    // Media root is created on startup
    assert!(dir.path().join("media").is_dir());

    server.kill().await.ok();
}

#[tokio::test]
async fn test_missing_config_file_exits_with_error() {
    assert!(!run_to_exit(Path::new("/nonexistent/config.toml")).await);
}

#[tokio::test]
async fn test_missing_auth_section_exits_with_error() {
    let dir = TempDir::new().unwrap();
    let config_path = write_config(dir.path(), "[server]\nport = 8080\n");

    assert!(!run_to_exit(&config_path).await);
}

#[tokio::test]
async fn test_api_key_auth_without_keys_exits_with_error() {
    let dir = TempDir::new().unwrap();
    let content = minimal_config(dir.path(), get_available_port())
        .replace(r#"method = "none""#, r#"method = "api_key""#);
    let config_path = write_config(dir.path(), &content);

    assert!(!run_to_exit(&config_path).await);
}

#[tokio::test]
async fn test_missing_script_queue_exits_with_error() {
    let dir = TempDir::new().unwrap();
    let content = format!(
        "{}\n[queues.default]\nworkers = 1\ntimeout_secs = 60\n",
        minimal_config(dir.path(), get_available_port())
    );
    let config_path = write_config(dir.path(), &content);

    assert!(!run_to_exit(&config_path).await);
}
