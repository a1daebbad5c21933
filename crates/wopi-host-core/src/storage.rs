use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::error::StorageError;

/// Metadata returned by a `head` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectHead {
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
    /// Store-provided entity tag, when the backend has one.
    pub etag: Option<String>,
}

/// Access boundary to the backing object store.
///
/// Implementations carry no protocol knowledge. `put` must replace the whole
/// object atomically; whether a `put` is immediately visible to a following
/// `get` is a property of the backend.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Returns the backend identifier (e.g., "s3", "local").
    fn backend_name(&self) -> &'static str;

    /// Fetch object metadata, or `None` if the key is unknown.
    async fn head(&self, id: &str) -> Result<Option<ObjectHead>, StorageError>;

    /// Fetch the object body, or `None` if the key is unknown.
    async fn get(&self, id: &str) -> Result<Option<Bytes>, StorageError>;

    /// Replace the object body.
    async fn put(&self, id: &str, data: Bytes) -> Result<(), StorageError>;
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
    etag: String,
}

/// In-process, immediately consistent storage gateway.
///
/// Every `put` stamps a last-modified time strictly later than the previous
/// one, so versions derived from it always change on write.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: DashMap<String, StoredObject>,
    last_stamp_ms: AtomicI64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn next_stamp(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_millis();
        let prev = self
            .last_stamp_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |prev| {
                Some(now.max(prev + 1))
            })
            .unwrap_or(now);
        let stamp = now.max(prev + 1);
        DateTime::from_timestamp_millis(stamp).unwrap_or_else(Utc::now)
    }

    fn etag_for(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("\"{}\"", hex::encode(hasher.finalize()))
    }
}

#[async_trait]
impl StorageGateway for MemoryStorage {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn head(&self, id: &str) -> Result<Option<ObjectHead>, StorageError> {
        Ok(self.objects.get(id).map(|obj| ObjectHead {
            size_bytes: obj.data.len() as u64,
            last_modified: obj.last_modified,
            etag: Some(obj.etag.clone()),
        }))
    }

    async fn get(&self, id: &str) -> Result<Option<Bytes>, StorageError> {
        Ok(self.objects.get(id).map(|obj| obj.data.clone()))
    }

    #[instrument(skip(self, data), level = "debug", fields(data_len = data.len()))]
    async fn put(&self, id: &str, data: Bytes) -> Result<(), StorageError> {
        let object = StoredObject {
            etag: Self::etag_for(&data),
            last_modified: self.next_stamp(),
            data,
        };
        self.objects.insert(id.to_string(), object);
        debug!("Stored {} in memory", id);
        Ok(())
    }
}
