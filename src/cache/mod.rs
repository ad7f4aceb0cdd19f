use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::error::CacheError;

/// On-disk shape of the cache record
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CacheRecord {
    playlisturl: String,
}

/// Persists the single "current playlist URL" across restarts
#[derive(Debug, Clone)]
pub struct UrlCache {
    path: PathBuf,
}

impl UrlCache {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the last persisted URL
    pub async fn load(&self) -> Result<String, CacheError> {
        let content = match async_fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CacheError::NotFound(self.path.clone()))
            }
            Err(source) => {
                return Err(CacheError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let corrupt = |reason: String| CacheError::Corrupt {
            path: self.path.clone(),
            reason,
        };
        // Objects only; serde would otherwise accept `["url"]` by position
        let value: serde_json::Value =
            serde_json::from_slice(&content).map_err(|e| corrupt(e.to_string()))?;
        if !value.is_object() {
            return Err(corrupt("expected a JSON object".to_string()));
        }
        let record: CacheRecord =
            serde_json::from_value(value).map_err(|e| corrupt(e.to_string()))?;
        Ok(record.playlisturl)
    }

    /// Replace the record atomically: write a sibling temp file, sync it, rename it into place
    pub async fn save(&self, url: &str) -> Result<(), CacheError> {
        let io_err = |source: std::io::Error| CacheError::Io {
            path: self.path.clone(),
            source,
        };

        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        async_fs::create_dir_all(&parent).await.map_err(io_err)?;

        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("url_cache");
        let temp_path = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        let content = serde_json::to_vec(&CacheRecord {
            playlisturl: url.to_string(),
        })
        .map_err(|e| io_err(e.into()))?;

        let written = async {
            let mut file = async_fs::File::create(&temp_path).await?;
            file.write_all(&content).await?;
            file.sync_all().await?;
            async_fs::rename(&temp_path, &self.path).await
        }
        .await;

        if let Err(e) = written {
            let _ = async_fs::remove_file(&temp_path).await;
            return Err(io_err(e));
        }

        debug!("Persisted playlist URL to {:?}", self.path);
        Ok(())
    }
}
