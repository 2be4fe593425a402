//! Storage for binary artifacts (screenshots) returned by the endpoint.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Directory screenshots are stored under, relative to the media root.
pub const SCREENSHOT_DIR: &str = "screenshots/lua_editor";

const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Invalid image data: {0}")]
    Decode(String),

    #[error("Invalid artifact key: {0}")]
    InvalidKey(String),

    #[error("Failed to write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Writes artifacts and returns the public URL they are served from.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `bytes` under a relative `key` such as `screenshots/lua_editor/a.png`.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, ArtifactError>;
}

/// Artifact store backed by a directory served as static files.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
    url_prefix: String,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String, ArtifactError> {
        let relative = Path::new(key);
        let is_plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !is_plain {
            return Err(ArtifactError::InvalidKey(key.to_string()));
        }

        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| ArtifactError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        fs::write(&path, bytes)
            .await
            .map_err(|source| ArtifactError::Write {
                path: path.clone(),
                source,
            })?;

        Ok(format!("{}{}", self.url_prefix, key))
    }
}

/// Decode a base64 PNG, accepting an optional data-URL prefix.
pub fn decode_png(data: &str) -> Result<Vec<u8>, ArtifactError> {
    let encoded = data.strip_prefix(PNG_DATA_URL_PREFIX).unwrap_or(data);
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| ArtifactError::Decode(e.to_string()))
}

/// Unique screenshot file name: `lua_script_<millis>_<8 hex>.png`.
pub fn screenshot_file_name() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "lua_script_{}_{}.png",
        Utc::now().timestamp_millis(),
        &suffix[..8]
    )
}
