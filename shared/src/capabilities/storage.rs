use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::error::BackendError;

/// Managed object storage (buckets of public files).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `bytes` and returns the public URL of the new object.
    async fn upload(
        &self,
        bucket: &str,
        file_name: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<String, BackendError>;

    async fn remove(&self, bucket: &str, file_name: &str) -> Result<(), BackendError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: String,
}

/// In-process object store. Public URLs are `{base_url}/{bucket}/{file}`.
#[derive(Debug)]
pub struct MemoryObjectStore {
    base_url: String,
    objects: RwLock<HashMap<(String, String), StoredObject>>,
    uploads: AtomicUsize,
    fail_uploads: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            objects: RwLock::new(HashMap::new()),
            uploads: AtomicUsize::new(0),
            fail_uploads: AtomicBool::new(false),
        }
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub async fn get(&self, bucket: &str, file_name: &str) -> Option<StoredObject> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), file_name.to_string()))
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(
        &self,
        bucket: &str,
        file_name: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<String, BackendError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(BackendError::new(503, "storage unavailable"));
        }
        let key = (bucket.to_string(), file_name.to_string());
        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(BackendError::new(409, "object already exists"));
        }
        objects.insert(
            key,
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(format!("{}/{}/{}", self.base_url, bucket, file_name))
    }

    async fn remove(&self, bucket: &str, file_name: &str) -> Result<(), BackendError> {
        self.objects
            .write()
            .await
            .remove(&(bucket.to_string(), file_name.to_string()));
        Ok(())
    }
}
