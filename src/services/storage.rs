use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Local directory where handlers and the gateway persist artifacts.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create `root/<rel>` and return it.
    pub async fn ensure_dir(&self, rel: impl AsRef<Path>) -> Result<PathBuf, StorageError> {
        let dir = self.root.join(rel);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Write bytes via a sibling temp file and rename, so readers never see a
    /// partial file. Each call gets its own temp name; concurrent writers to
    /// the same path race only on the final rename.
    pub async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(format!(".{}.tmp", Uuid::new_v4().simple()));
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            tokio::fs::remove_file(&tmp).await.ok();
            return Err(e.into());
        }
        Ok(())
    }

    /// Pretty-printed JSON, written atomically.
    pub async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StorageError> {
        let data = serde_json::to_vec_pretty(value)?;
        self.write_atomic(path, &data).await
    }

    /// Store an uploaded file directly under the root using a sanitized name.
    pub async fn save_upload(&self, file_name: &str, data: &[u8]) -> Result<PathBuf, StorageError> {
        let name = sanitize_file_name(file_name).ok_or(StorageError::InvalidName)?;
        let path = self.root.join(name);
        self.write_atomic(&path, data).await?;
        Ok(path)
    }
}

/// Keep only the final path component and a conservative character set.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid file name")]
    InvalidName,
}
