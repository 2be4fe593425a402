//! In-memory artifact store for testing.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::executor::{ArtifactError, ArtifactStore};

/// Records stored artifacts instead of writing them.
#[derive(Debug, Clone, Default)]
pub struct MockArtifactStore {
    stored: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    fail: bool,
}

impl MockArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose writes always fail.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// `(key, bytes)` of every stored artifact.
    pub fn stored(&self) -> Vec<(String, Vec<u8>)> {
        self.stored
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ArtifactStore for MockArtifactStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, ArtifactError> {
        if self.fail {
            return Err(ArtifactError::Write {
                path: key.into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            });
        }

        self.stored
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((key.to_string(), bytes.to_vec()));
        Ok(format!("/media/{}", key))
    }
}
