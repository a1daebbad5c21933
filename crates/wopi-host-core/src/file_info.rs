use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::WopiError;
use crate::lock::LockManager;
use crate::storage::{ObjectHead, StorageGateway};

/// Identity and permission of an already-authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessContext {
    pub user_id: String,
    pub user_friendly_name: String,
    pub can_write: bool,
}

/// CheckFileInfo response body, using WOPI field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileMetadata {
    pub base_file_name: String,
    pub size: u64,
    pub version: String,
    pub owner_id: String,
    pub user_id: String,
    pub user_friendly_name: String,
    pub user_can_write: bool,
    pub is_locked: bool,
    pub supports_update: bool,
    pub supports_locks: bool,
    pub supports_get_lock: bool,
}

/// Builds `FileMetadata` from a fresh storage `head` and the current lock state.
///
/// Nothing is cached between calls.
pub struct FileInfoAssembler {
    storage: Arc<dyn StorageGateway>,
    locks: Arc<LockManager>,
    owner_id: String,
}

impl FileInfoAssembler {
    pub fn new(
        storage: Arc<dyn StorageGateway>,
        locks: Arc<LockManager>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            locks,
            owner_id: owner_id.into(),
        }
    }

    #[instrument(skip(self, access), level = "debug", fields(user = %access.user_id))]
    pub async fn check_file_info(
        &self,
        id: &str,
        access: &AccessContext,
    ) -> Result<FileMetadata, WopiError> {
        let head = self
            .storage
            .head(id)
            .await?
            .ok_or_else(|| WopiError::NotFound(id.to_string()))?;

        let is_locked = self.locks.get_lock(id).is_some();
        debug!(
            "File info for {}: {} bytes, locked: {}",
            id, head.size_bytes, is_locked
        );

        Ok(FileMetadata {
            base_file_name: base_file_name(id).to_string(),
            size: head.size_bytes,
            version: version_of(&head),
            owner_id: self.owner_id.clone(),
            user_id: access.user_id.clone(),
            user_friendly_name: access.user_friendly_name.clone(),
            user_can_write: access.can_write,
            is_locked,
            supports_update: true,
            supports_locks: true,
            supports_get_lock: true,
        })
    }
}

/// Version string for an object: last-modified epoch milliseconds, suffixed
/// with the entity tag when the backend provides one. Stores such as S3 only
/// keep second-resolution timestamps, so the tag is what separates two saves
/// within the same second.
fn version_of(head: &ObjectHead) -> String {
    let millis = head.last_modified.timestamp_millis();
    match head
        .etag
        .as_deref()
        .map(|tag| tag.trim_start_matches("W/").trim_matches('"'))
        .filter(|tag| !tag.is_empty())
    {
        Some(tag) => format!("{}-{}", millis, tag),
        None => millis.to_string(),
    }
}

/// Final `/`-separated segment of a document identity.
fn base_file_name(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::storage::MemoryStorage;
    use bytes::Bytes;

    fn access(can_write: bool) -> AccessContext {
        AccessContext {
            user_id: "user1".to_string(),
            user_friendly_name: "User1".to_string(),
            can_write,
        }
    }

    fn setup() -> (Arc<MemoryStorage>, Arc<LockManager>, FileInfoAssembler) {
        let storage = Arc::new(MemoryStorage::new());
        let locks = Arc::new(LockManager::default());
        let assembler = FileInfoAssembler::new(storage.clone(), locks.clone(), "admin");
        (storage, locks, assembler)
    }

    #[tokio::test]
    async fn test_unknown_document() {
        let (_storage, _locks, assembler) = setup();
        let err = assembler
            .check_file_info("missing.xlsx", &access(true))
            .await
            .unwrap_err();
        assert_eq!(err, WopiError::NotFound("missing.xlsx".to_string()));
    }

    #[tokio::test]
    async fn test_metadata_reflects_storage_and_lock() {
        let (storage, locks, assembler) = setup();
        storage
            .put("team/reports/q1.xlsx", Bytes::from_static(b"sheet"))
            .await
            .unwrap();

        let info = assembler
            .check_file_info("team/reports/q1.xlsx", &access(false))
            .await
            .unwrap();
        assert_eq!(info.base_file_name, "q1.xlsx");
        assert_eq!(info.size, 5);
        assert_eq!(info.owner_id, "admin");
        assert_eq!(info.user_id, "user1");
        assert!(!info.user_can_write);
        assert!(!info.is_locked);

        locks.lock("team/reports/q1.xlsx", "A").unwrap();
        let info = assembler
            .check_file_info("team/reports/q1.xlsx", &access(false))
            .await
            .unwrap();
        assert!(info.is_locked);
        // Write permission comes from the caller, not from lock state.
        assert!(!info.user_can_write);
    }

    #[tokio::test]
    async fn test_version_stable_until_write() {
        let (storage, _locks, assembler) = setup();
        storage.put("doc1", Bytes::from_static(b"v1")).await.unwrap();

        let first = assembler.check_file_info("doc1", &access(true)).await.unwrap();
        let second = assembler.check_file_info("doc1", &access(true)).await.unwrap();
        assert_eq!(first.version, second.version);

        storage.put("doc1", Bytes::from_static(b"v2")).await.unwrap();
        let third = assembler.check_file_info("doc1", &access(true)).await.unwrap();
        assert_ne!(first.version, third.version);
    }

    /// Gateway with second-resolution timestamps whose tag changes on every put,
    /// like S3.
    struct CoarseClockStorage {
        etag: std::sync::Mutex<Option<String>>,
    }

    #[async_trait::async_trait]
    impl StorageGateway for CoarseClockStorage {
        fn backend_name(&self) -> &'static str {
            "coarse"
        }

        async fn head(&self, _id: &str) -> Result<Option<ObjectHead>, StorageError> {
            Ok(Some(ObjectHead {
                size_bytes: 2,
                last_modified: chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
                etag: self.etag.lock().unwrap().clone(),
            }))
        }

        async fn get(&self, _id: &str) -> Result<Option<Bytes>, StorageError> {
            Ok(None)
        }

        async fn put(&self, _id: &str, data: Bytes) -> Result<(), StorageError> {
            *self.etag.lock().unwrap() = Some(format!("\"{}\"", data.len()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_version_changes_within_same_second() {
        let storage = Arc::new(CoarseClockStorage {
            etag: std::sync::Mutex::new(None),
        });
        let assembler =
            FileInfoAssembler::new(storage.clone(), Arc::new(LockManager::default()), "admin");

        let untagged = assembler.check_file_info("doc1", &access(true)).await.unwrap();
        assert_eq!(untagged.version, "1700000000000");

        storage.put("doc1", Bytes::from_static(b"v1")).await.unwrap();
        let first = assembler.check_file_info("doc1", &access(true)).await.unwrap();
        storage.put("doc1", Bytes::from_static(b"v22")).await.unwrap();
        let second = assembler.check_file_info("doc1", &access(true)).await.unwrap();

        assert_eq!(first.version, "1700000000000-2");
        assert_eq!(second.version, "1700000000000-3");
    }

    #[test]
    fn test_version_strips_etag_quotes() {
        let head = ObjectHead {
            size_bytes: 1,
            last_modified: chrono::DateTime::from_timestamp(1, 0).unwrap(),
            etag: Some("W/\"abc\"".to_string()),
        };
        assert_eq!(version_of(&head), "1000-abc");
    }

    #[test]
    fn test_json_field_names() {
        let info = FileMetadata {
            base_file_name: "q1.xlsx".to_string(),
            size: 5,
            version: "1700000000000".to_string(),
            owner_id: "admin".to_string(),
            user_id: "user1".to_string(),
            user_friendly_name: "User1".to_string(),
            user_can_write: true,
            is_locked: false,
            supports_update: true,
            supports_locks: true,
            supports_get_lock: true,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["BaseFileName"], "q1.xlsx");
        assert_eq!(json["Size"], 5);
        assert_eq!(json["Version"], "1700000000000");
        assert_eq!(json["UserCanWrite"], true);
        assert_eq!(json["SupportsLocks"], true);
        assert_eq!(json["IsLocked"], false);
    }
}
