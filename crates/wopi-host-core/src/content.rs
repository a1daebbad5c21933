use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::WopiError;
use crate::lock::LockManager;
use crate::storage::StorageGateway;

/// Whether PutFile may proceed when the document has no live lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockedWritePolicy {
    /// Any write to an unlocked document is accepted.
    #[default]
    Allow,
    /// Only creating a document, or filling a zero-byte one, is accepted
    /// without a lock.
    RequireLock,
}

/// Gates file body reads and writes through the lock state.
pub struct ContentAccessGateway {
    storage: Arc<dyn StorageGateway>,
    locks: Arc<LockManager>,
    unlocked_write_policy: UnlockedWritePolicy,
    max_body_bytes: usize,
}

impl ContentAccessGateway {
    pub fn new(
        storage: Arc<dyn StorageGateway>,
        locks: Arc<LockManager>,
        unlocked_write_policy: UnlockedWritePolicy,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            storage,
            locks,
            unlocked_write_policy,
            max_body_bytes,
        }
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Fetch a document body. Lock state does not restrict reads.
    #[instrument(skip(self), level = "debug")]
    pub async fn read(&self, id: &str) -> Result<Bytes, WopiError> {
        let data = self
            .storage
            .get(id)
            .await?
            .ok_or_else(|| WopiError::NotFound(id.to_string()))?;
        debug!("Read {} ({} bytes)", id, data.len());
        Ok(data)
    }

    /// Store a document body on behalf of the holder of `presented_token`.
    ///
    /// Storage is never called while a live lock is held under another token.
    /// A failed `put` leaves the lock untouched so the same write can be retried.
    #[instrument(skip(self, data), level = "debug", fields(data_len = data.len()))]
    pub async fn write(
        &self,
        id: &str,
        data: Bytes,
        presented_token: Option<&str>,
    ) -> Result<(), WopiError> {
        if data.len() > self.max_body_bytes {
            return Err(WopiError::PayloadTooLarge {
                size: data.len(),
                limit: self.max_body_bytes,
            });
        }

        match self.locks.get_lock(id) {
            Some(current) if Some(current.as_str()) != presented_token => {
                debug!(
                    "Rejecting write to {}: locked by {} (presented {:?})",
                    id, current, presented_token
                );
                return Err(WopiError::Conflict {
                    reason: "File is locked by another user".to_string(),
                    current_lock: Some(current),
                });
            }
            Some(_) => {}
            None => self.check_unlocked_write(id).await?,
        }

        let size = data.len();
        self.storage.put(id, data).await.map_err(|e| {
            warn!("Failed to save {}: {}", id, e);
            WopiError::from(e)
        })?;
        debug!("Saved {} ({} bytes)", id, size);
        Ok(())
    }

    async fn check_unlocked_write(&self, id: &str) -> Result<(), WopiError> {
        match self.unlocked_write_policy {
            UnlockedWritePolicy::Allow => Ok(()),
            UnlockedWritePolicy::RequireLock => {
                let existing = self.storage.head(id).await?;
                match existing {
                    Some(head) if head.size_bytes > 0 => {
                        debug!("Rejecting unlocked write to non-empty {}", id);
                        Err(WopiError::Conflict {
                            reason: "File is not locked".to_string(),
                            current_lock: None,
                        })
                    }
                    _ => Ok(()),
                }
            }
        }
    }
}

/// MIME type served for a document, chosen by file extension.
pub fn mime_type_for(name: &str) -> &'static str {
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "doc" => "application/msword",
        "xls" => "application/vnd.ms-excel",
        "ppt" => "application/vnd.ms-powerpoint",
        "odt" => "application/vnd.oasis.opendocument.text",
        "ods" => "application/vnd.oasis.opendocument.spreadsheet",
        "odp" => "application/vnd.oasis.opendocument.presentation",
        "pdf" => "application/pdf",
        "csv" => "text/csv",
        "txt" => "text/plain",
        "rtf" => "application/rtf",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::storage::{MemoryStorage, ObjectHead};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Wraps a memory store, counting puts and optionally failing them.
    #[derive(Default)]
    struct RecordingStorage {
        inner: MemoryStorage,
        puts: AtomicUsize,
        fail_puts: bool,
    }

    #[async_trait]
    impl StorageGateway for RecordingStorage {
        fn backend_name(&self) -> &'static str {
            "recording"
        }

        async fn head(&self, id: &str) -> Result<Option<ObjectHead>, StorageError> {
            self.inner.head(id).await
        }

        async fn get(&self, id: &str) -> Result<Option<Bytes>, StorageError> {
            self.inner.get(id).await
        }

        async fn put(&self, id: &str, data: Bytes) -> Result<(), StorageError> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            if self.fail_puts {
                return Err(StorageError::Io("bucket unavailable".to_string()));
            }
            self.inner.put(id, data).await
        }
    }

    fn gateway(
        storage: Arc<RecordingStorage>,
        locks: Arc<LockManager>,
        policy: UnlockedWritePolicy,
    ) -> ContentAccessGateway {
        ContentAccessGateway::new(storage, locks, policy, 1024)
    }

    #[tokio::test]
    async fn test_write_with_mismatched_lock_never_reaches_storage() {
        let storage = Arc::new(RecordingStorage::default());
        let locks = Arc::new(LockManager::default());
        let content = gateway(storage.clone(), locks.clone(), UnlockedWritePolicy::Allow);

        locks.lock("doc1", "A").unwrap();

        let err = content
            .write("doc1", Bytes::from_static(b"data"), Some("B"))
            .await
            .unwrap_err();
        assert_eq!(err.current_lock(), Some("A"));

        let err = content
            .write("doc1", Bytes::from_static(b"data"), None)
            .await
            .unwrap_err();
        assert_eq!(err.current_lock(), Some("A"));

        assert_eq!(storage.puts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let storage = Arc::new(RecordingStorage::default());
        let locks = Arc::new(LockManager::default());
        let content = gateway(storage.clone(), locks.clone(), UnlockedWritePolicy::Allow);

        locks.lock("doc1", "A").unwrap();
        content
            .write("doc1", Bytes::from_static(b"payload"), Some("A"))
            .await
            .unwrap();

        let body = content.read("doc1").await.unwrap();
        assert_eq!(&body[..], b"payload");
    }

    #[tokio::test]
    async fn test_read_ignores_lock_state() {
        let storage = Arc::new(RecordingStorage::default());
        storage
            .inner
            .put("doc1", Bytes::from_static(b"shared"))
            .await
            .unwrap();
        let locks = Arc::new(LockManager::default());
        locks.lock("doc1", "A").unwrap();
        let content = gateway(storage, locks, UnlockedWritePolicy::Allow);

        assert_eq!(&content.read("doc1").await.unwrap()[..], b"shared");
        assert_eq!(
            content.read("missing").await.unwrap_err(),
            WopiError::NotFound("missing".to_string())
        );
    }

    #[tokio::test]
    async fn test_failed_put_keeps_lock() {
        let storage = Arc::new(RecordingStorage {
            fail_puts: true,
            ..Default::default()
        });
        let locks = Arc::new(LockManager::default());
        let content = gateway(storage.clone(), locks.clone(), UnlockedWritePolicy::Allow);

        locks.lock("doc1", "A").unwrap();
        let err = content
            .write("doc1", Bytes::from_static(b"data"), Some("A"))
            .await
            .unwrap_err();
        assert!(matches!(err, WopiError::Storage(StorageError::Io(_))));
        assert_eq!(locks.get_lock("doc1").as_deref(), Some("A"));
        assert_eq!(storage.puts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unlocked_write_allowed_by_default() {
        let storage = Arc::new(RecordingStorage::default());
        storage
            .inner
            .put("doc1", Bytes::from_static(b"old"))
            .await
            .unwrap();
        let content = gateway(
            storage.clone(),
            Arc::new(LockManager::default()),
            UnlockedWritePolicy::Allow,
        );

        content
            .write("doc1", Bytes::from_static(b"new"), None)
            .await
            .unwrap();
        assert_eq!(&content.read("doc1").await.unwrap()[..], b"new");
    }

    #[tokio::test]
    async fn test_require_lock_policy() {
        let storage = Arc::new(RecordingStorage::default());
        storage
            .inner
            .put("existing", Bytes::from_static(b"old"))
            .await
            .unwrap();
        storage.inner.put("empty", Bytes::new()).await.unwrap();
        let content = gateway(
            storage.clone(),
            Arc::new(LockManager::default()),
            UnlockedWritePolicy::RequireLock,
        );

        let err = content
            .write("existing", Bytes::from_static(b"new"), Some("A"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WopiError::Conflict {
                current_lock: None,
                ..
            }
        ));
        assert_eq!(storage.puts.load(Ordering::SeqCst), 0);

        content
            .write("empty", Bytes::from_static(b"first"), None)
            .await
            .unwrap();
        content
            .write("brand-new", Bytes::from_static(b"first"), None)
            .await
            .unwrap();
        assert_eq!(storage.puts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_lock_does_not_block_write() {
        let storage = Arc::new(RecordingStorage::default());
        let locks = Arc::new(LockManager::new(std::time::Duration::from_millis(20)));
        let content = gateway(storage.clone(), locks.clone(), UnlockedWritePolicy::Allow);

        locks.lock("doc1", "A").unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;

        content
            .write("doc1", Bytes::from_static(b"data"), Some("B"))
            .await
            .unwrap();
        assert_eq!(storage.puts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_oversized_write_rejected() {
        let storage = Arc::new(RecordingStorage::default());
        let content = gateway(
            storage.clone(),
            Arc::new(LockManager::default()),
            UnlockedWritePolicy::Allow,
        );

        let err = content
            .write("doc1", Bytes::from(vec![0u8; 2048]), None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            WopiError::PayloadTooLarge {
                size: 2048,
                limit: 1024
            }
        );
        assert_eq!(storage.puts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_mime_type_for() {
        assert_eq!(
            mime_type_for("reports/Q1.XLSX"),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        );
        assert_eq!(mime_type_for("notes.odt"), "application/vnd.oasis.opendocument.text");
        assert_eq!(mime_type_for("README"), "application/octet-stream");
    }
}
