//! Object storage adapters.
//!
//! [`ObjectStore`] is the narrow contract the publish and retrieve paths need
//! from an S3-compatible backend. Implementations are constructed once at
//! startup and shared behind an `Arc`.

mod memory;
mod s3;

use std::{pin::Pin, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncRead;

pub use memory::{MemoryObjectStore, StoredObject};
pub use s3::{S3ObjectStore, normalize_endpoint};

/// Streaming handle over an object's bytes. Dropping it releases the connection.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{key}` does not exist")]
    NotFound { key: String },
    #[error("storage request `{op}` failed: {message}")]
    Backend { op: &'static str, message: String },
    #[error("invalid storage configuration: {0}")]
    Configuration(String),
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn backend(op: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            op,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Operations consumed from an S3-compatible bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Name of the bucket every operation targets.
    fn bucket(&self) -> &str;

    async fn bucket_exists(&self) -> Result<bool, StorageError>;

    /// Create the bucket. A bucket that already exists counts as success.
    async fn create_bucket(&self) -> Result<(), StorageError>;

    async fn object_exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Write `body` under `key`, replacing any previous object.
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Open a streaming read. Missing objects yield [`StorageError::NotFound`].
    async fn get_object(&self, key: &str) -> Result<ObjectReader, StorageError>;

    /// Issue a credential-less URL granting read access to `key` for `ttl`.
    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;
}
