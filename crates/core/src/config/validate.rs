use super::{types::Config, AuthMethod, ConfigError, SCRIPT_QUEUE};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - API-key auth lists at least one non-empty key
/// - The script execution queue exists
/// - Every queue has workers and a timeout
/// - The media URL prefix ends with '/'
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.auth.method == AuthMethod::ApiKey {
        if config.auth.api_keys.is_empty() {
            return Err(ConfigError::ValidationError(
                "auth.api_keys must not be empty when method = \"api_key\"".to_string(),
            ));
        }
        if config.auth.api_keys.iter().any(|k| k.key.is_empty()) {
            return Err(ConfigError::ValidationError(
                "auth.api_keys entries must have a non-empty key".to_string(),
            ));
        }
    }

    if !config.queues.contains_key(SCRIPT_QUEUE) {
        return Err(ConfigError::ValidationError(format!(
            "queues.{} must be configured",
            SCRIPT_QUEUE
        )));
    }

    for (name, queue) in &config.queues {
        if queue.workers == 0 {
            return Err(ConfigError::ValidationError(format!(
                "queues.{}.workers cannot be 0",
                name
            )));
        }
        if queue.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(format!(
                "queues.{}.timeout_secs cannot be 0",
                name
            )));
        }
    }

    if config.executor.request_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "executor.request_timeout_secs cannot be 0".to_string(),
        ));
    }

    if !config.media.url_prefix.ends_with('/') {
        return Err(ConfigError::ValidationError(
            "media.url_prefix must end with '/'".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_config_from_str, ApiKeyEntry};

    fn base_config() -> Config {
        load_config_from_str(
            r#"
[auth]
method = "none"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&base_config()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let mut config = base_config();
        config.server.port = 0;
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_api_key_without_keys_fails() {
        let mut config = base_config();
        config.auth.method = AuthMethod::ApiKey;
        assert!(validate_config(&config).is_err());

        config.auth.api_keys.push(ApiKeyEntry {
            key: "k".to_string(),
            user_id: "alice".to_string(),
        });
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_missing_script_queue_fails() {
        let mut config = base_config();
        config.queues.remove(SCRIPT_QUEUE);
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("lua_execution"));
    }

    #[test]
    fn test_validate_zero_workers_fails() {
        let mut config = base_config();
        config.queues.get_mut(SCRIPT_QUEUE).unwrap().workers = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_media_prefix_needs_slash() {
        let mut config = base_config();
        config.media.url_prefix = "/media".to_string();
        assert!(validate_config(&config).is_err());
    }
}
