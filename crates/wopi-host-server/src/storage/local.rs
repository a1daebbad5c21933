use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, instrument};
use wopi_host_core::{ObjectHead, StorageError, StorageGateway};

/// Storage gateway over a local directory.
///
/// A document identity `a/b/c.docx` maps to `{base_dir}/a/b/c.docx`.
/// Identities that would escape `base_dir` are rejected.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage with the given base directory.
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn object_path(&self, id: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(id);
        let clean = !id.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !clean {
            return Err(StorageError::InvalidKey(format!(
                "Document id is not a relative path: {}",
                id
            )));
        }
        Ok(self.base_dir.join(relative))
    }
}

#[async_trait]
impl StorageGateway for LocalStorage {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    #[instrument(skip(self), level = "debug")]
    async fn head(&self, id: &str) -> Result<Option<ObjectHead>, StorageError> {
        let path = self.object_path(id)?;
        let metadata = match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::Io(format!(
                    "Failed to stat {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let last_modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .map_err(|e| StorageError::Io(format!("No modification time for {}: {}", id, e)))?;

        Ok(Some(ObjectHead {
            size_bytes: metadata.len(),
            last_modified,
            etag: None,
        }))
    }

    #[instrument(skip(self), level = "debug")]
    async fn get(&self, id: &str) -> Result<Option<Bytes>, StorageError> {
        let path = self.object_path(id)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::IsADirectory) => {
                Ok(None)
            }
            Err(e) => Err(StorageError::Io(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Write to a uniquely named sibling temp file, then rename over the target.
    #[instrument(skip(self, data), level = "debug", fields(data_len = data.len()))]
    async fn put(&self, id: &str, data: Bytes) -> Result<(), StorageError> {
        let path = self.object_path(id)?;
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.base_dir.clone());
        fs::create_dir_all(&parent).await.map_err(|e| {
            StorageError::Io(format!("Failed to create dir {}: {}", parent.display(), e))
        })?;

        let size = data.len();
        let target = path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut temp = tempfile::Builder::new()
                .prefix(".")
                .suffix(".tmp")
                .tempfile_in(&parent)?;
            temp.write_all(&data)?;
            temp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Internal(format!("Write task for {} failed: {}", id, e)))?
        .map_err(|e| StorageError::Io(format!("Failed to write {}: {}", path.display(), e)))?;

        debug!("Saved {} to {} ({} bytes)", id, path.display(), size);
        Ok(())
    }
}
