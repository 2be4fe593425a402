use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;

/// Name of the queue that runs script executions.
pub const SCRIPT_QUEUE: &str = "lua_execution";

/// Name of the general-purpose queue.
pub const DEFAULT_QUEUE: &str = "default";

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub auth: AuthConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default = "default_queues")]
    pub queues: BTreeMap<String, QueueConfig>,
    #[serde(default)]
    pub media: MediaConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth: AuthConfig::default(),
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            executor: ExecutorConfig::default(),
            runner: RunnerConfig::default(),
            queues: default_queues(),
            media: MediaConfig::default(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8000
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub method: AuthMethod,
    /// Accepted API keys (required when method = "api_key").
    #[serde(default)]
    pub api_keys: Vec<ApiKeyEntry>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            method: AuthMethod::None,
            api_keys: Vec::new(),
        }
    }
}

/// One accepted API key and the user it authenticates as.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiKeyEntry {
    pub key: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    None,
    ApiKey,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("scriptrelay.db")
}

/// Automation endpoint (Splash) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorConfig {
    /// Full URL of the `/execute` endpoint.
    #[serde(default = "default_endpoint_url")]
    pub endpoint_url: String,
    /// Page loaded when the caller does not pass `url`.
    #[serde(default = "default_target_url")]
    pub default_target_url: String,
    /// Wait time forwarded when the caller does not pass `wait`.
    #[serde(default = "default_wait")]
    pub default_wait: f64,
    /// Hard timeout of the endpoint call in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            endpoint_url: default_endpoint_url(),
            default_target_url: default_target_url(),
            default_wait: default_wait(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_endpoint_url() -> String {
    "http://localhost:8050/execute".to_string()
}

fn default_target_url() -> String {
    "https://httpbin.org/html".to_string()
}

fn default_wait() -> f64 {
    3.0
}

fn default_request_timeout() -> u64 {
    30
}

/// Job runner configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerConfig {
    /// Delay between the first progress event and the rest, giving a client
    /// that subscribes right after enqueue time to join the session topic.
    #[serde(default = "default_subscribe_grace")]
    pub subscribe_grace_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            subscribe_grace_ms: default_subscribe_grace(),
        }
    }
}

fn default_subscribe_grace() -> u64 {
    1000
}

/// Per-queue worker pool configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum jobs running concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Default per-job timeout in seconds.
    pub timeout_secs: u64,
}

fn default_workers() -> usize {
    4
}

fn default_queues() -> BTreeMap<String, QueueConfig> {
    let mut queues = BTreeMap::new();
    queues.insert(
        DEFAULT_QUEUE.to_string(),
        QueueConfig {
            workers: default_workers(),
            timeout_secs: 600,
        },
    );
    queues.insert(
        SCRIPT_QUEUE.to_string(),
        QueueConfig {
            workers: default_workers(),
            timeout_secs: 300,
        },
    );
    queues
}

/// Artifact storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MediaConfig {
    /// Directory artifacts are written under.
    #[serde(default = "default_media_root")]
    pub root: PathBuf,
    /// Public URL prefix the root is served from (must end with '/').
    #[serde(default = "default_media_url")]
    pub url_prefix: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            root: default_media_root(),
            url_prefix: default_media_url(),
        }
    }
}

fn default_media_root() -> PathBuf {
    PathBuf::from("media")
}

fn default_media_url() -> String {
    "/media/".to_string()
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub auth: SanitizedAuthConfig,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub executor: ExecutorConfig,
    pub runner: RunnerConfig,
    pub queues: BTreeMap<String, QueueConfig>,
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedAuthConfig {
    pub method: String,
    pub api_keys_configured: usize,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            auth: SanitizedAuthConfig {
                method: match config.auth.method {
                    AuthMethod::None => "none".to_string(),
                    AuthMethod::ApiKey => "api_key".to_string(),
                },
                api_keys_configured: config.auth.api_keys.len(),
            },
            server: config.server.clone(),
            database: config.database.clone(),
            executor: config.executor.clone(),
            runner: config.runner.clone(),
            queues: config.queues.clone(),
            media: config.media.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_valid_config_with_none_auth() {
        let toml = r#"
[auth]
method = "none"

[server]
host = "127.0.0.1"
port = 9000
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.auth.method, AuthMethod::None);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
    }

    #[test]
    fn test_deserialize_defaults() {
        let toml = r#"
[auth]
method = "none"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.database.path.to_str().unwrap(), "scriptrelay.db");
        assert_eq!(config.executor.endpoint_url, "http://localhost:8050/execute");
        assert_eq!(config.executor.default_target_url, "https://httpbin.org/html");
        assert_eq!(config.executor.request_timeout_secs, 30);
        assert_eq!(config.runner.subscribe_grace_ms, 1000);
        assert_eq!(config.media.url_prefix, "/media/");
    }

    #[test]
    fn test_default_queues() {
        let toml = r#"
[auth]
method = "none"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.queues[SCRIPT_QUEUE].timeout_secs, 300);
        assert_eq!(config.queues[DEFAULT_QUEUE].timeout_secs, 600);
        assert_eq!(config.queues[SCRIPT_QUEUE].workers, 4);
    }

    #[test]
    fn test_custom_queues_replace_defaults() {
        let toml = r#"
[auth]
method = "none"

[queues.lua_execution]
workers = 2
timeout_secs = 60
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.queues.len(), 1);
        assert_eq!(
            config.queues[SCRIPT_QUEUE],
            QueueConfig {
                workers: 2,
                timeout_secs: 60
            }
        );
    }

    #[test]
    fn test_deserialize_missing_auth_fails() {
        let toml = r#"
[server]
port = 8080
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_api_keys() {
        let toml = r#"
[auth]
method = "api_key"

[[auth.api_keys]]
key = "secret"
user_id = "alice"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.auth.method, AuthMethod::ApiKey);
        assert_eq!(config.auth.api_keys.len(), 1);
        assert_eq!(config.auth.api_keys[0].user_id, "alice");
    }

    #[test]
    fn test_sanitized_config_hides_keys() {
        let toml = r#"
[auth]
method = "api_key"

[[auth.api_keys]]
key = "secret"
user_id = "alice"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let sanitized = SanitizedConfig::from(&config);
        assert_eq!(sanitized.auth.method, "api_key");
        assert_eq!(sanitized.auth.api_keys_configured, 1);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("secret"));
    }
}
