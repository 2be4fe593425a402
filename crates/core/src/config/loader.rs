use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Prefix of environment variables overriding file settings.
pub const ENV_PREFIX: &str = "SCRIPTRELAY_";

/// Load configuration from file with environment variable overrides.
///
/// Nested keys are separated by a double underscore, so
/// `SCRIPTRELAY_EXECUTOR__ENDPOINT_URL` overrides `executor.endpoint_url`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    load_config_with_env(path, ENV_PREFIX)
}

fn load_config_with_env(path: &Path, env_prefix: &str) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(env_prefix).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}
