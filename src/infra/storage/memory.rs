use std::{
    collections::HashMap,
    io::Cursor,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use super::{ObjectReader, ObjectStore, StorageError};

/// An object held by [`MemoryObjectStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: String,
}

/// In-process [`ObjectStore`] used by tests and local runs without S3.
///
/// Failure switches let callers exercise the publish and retrieve error paths.
#[derive(Debug)]
pub struct MemoryObjectStore {
    bucket: String,
    bucket_created: AtomicBool,
    objects: RwLock<HashMap<String, StoredObject>>,
    bucket_checks: AtomicUsize,
    fail_puts: AtomicBool,
    fail_gets: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            bucket_created: AtomicBool::new(false),
            objects: RwLock::new(HashMap::new()),
            bucket_checks: AtomicUsize::new(0),
            fail_puts: AtomicBool::new(false),
            fail_gets: AtomicBool::new(false),
        }
    }

    pub async fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn is_bucket_created(&self) -> bool {
        self.bucket_created.load(Ordering::SeqCst)
    }

    /// Number of `bucket_exists` calls served so far.
    pub fn bucket_checks(&self) -> usize {
        self.bucket_checks.load(Ordering::SeqCst)
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    fn require_bucket(&self, op: &'static str) -> Result<(), StorageError> {
        if self.is_bucket_created() {
            Ok(())
        } else {
            Err(StorageError::backend(
                op,
                format!("NoSuchBucket: bucket `{}` does not exist", self.bucket),
            ))
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn bucket_exists(&self) -> Result<bool, StorageError> {
        self.bucket_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.is_bucket_created())
    }

    async fn create_bucket(&self) -> Result<(), StorageError> {
        self.bucket_created.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn object_exists(&self, key: &str) -> Result<bool, StorageError> {
        self.require_bucket("head_object")?;
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.require_bucket("put_object")?;
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::backend(
                "put_object",
                "SlowDown: injected upload failure",
            ));
        }
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<ObjectReader, StorageError> {
        self.require_bucket("get_object")?;
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(StorageError::backend(
                "get_object",
                "InternalError: injected read failure",
            ));
        }
        let object = self
            .objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(key))?;
        Ok(Box::pin(Cursor::new(object.body)))
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        self.require_bucket("presign_get")?;
        Ok(format!(
            "memory://{}/{key}?expires_in={}",
            self.bucket,
            ttl.as_secs()
        ))
    }
}
