mod local;
mod s3;

pub use local::LocalStorage;
pub use s3::S3Storage;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use wopi_host_core::{ObjectHead, StorageError, StorageGateway};

/// Bounds every call of the wrapped gateway by a timeout.
///
/// A storage call that overruns is abandoned and reported as
/// `StorageError::Timeout`; lock state is never held across it.
pub struct TimeoutStorage {
    inner: Arc<dyn StorageGateway>,
    timeout: Duration,
}

impl TimeoutStorage {
    pub fn new(inner: Arc<dyn StorageGateway>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StorageError>>,
    ) -> Result<T, StorageError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| StorageError::Timeout(self.timeout.as_millis() as u64))?
    }
}

#[async_trait]
impl StorageGateway for TimeoutStorage {
    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    async fn head(&self, id: &str) -> Result<Option<ObjectHead>, StorageError> {
        self.bounded(self.inner.head(id)).await
    }

    async fn get(&self, id: &str) -> Result<Option<Bytes>, StorageError> {
        self.bounded(self.inner.get(id)).await
    }

    async fn put(&self, id: &str, data: Bytes) -> Result<(), StorageError> {
        self.bounded(self.inner.put(id, data)).await
    }
}
