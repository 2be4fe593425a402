//! Testing utilities and mock implementations.
//!
//! Mocks for the executor and artifact store let the runner and the HTTP
//! layer be exercised without a Splash instance.
//!
//! # Example
//!
//! ```rust,ignore
//! use scriptrelay_core::testing::{fixtures, MockExecutor};
//!
//! let executor = MockExecutor::succeeding(serde_json::json!({"title": "x"}));
//! let config = fixtures::test_config();
//! ```

#[cfg(test)]
mod fake_splash;
mod mock_artifacts;
mod mock_executor;

#[cfg(test)]
pub use fake_splash::{spawn_fake_splash, FakeSplash};
pub use mock_artifacts::MockArtifactStore;
pub use mock_executor::{MockExecutor, RecordedCall};

/// Test fixtures and helper functions.
pub mod fixtures {
    use serde_json::{Map, Value};

    use crate::config::{Config, RunnerConfig};
    use crate::runner::Step;

    /// Smallest script that passes validation.
    pub const MINIMAL_SCRIPT: &str = "function main(splash, args) end";

    /// Default config with no grace delay and anonymous auth.
    pub fn test_config() -> Config {
        Config {
            runner: RunnerConfig {
                subscribe_grace_ms: 0,
            },
            ..Config::default()
        }
    }

    /// Steps titled "Step 1".."Step n".
    pub fn steps(n: usize) -> Vec<Step> {
        (1..=n).map(|i| Step::new(i, format!("Step {}", i))).collect()
    }

    /// Argument map from a JSON object literal; non-objects give an empty map.
    pub fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}
