//! Shared handle over the object store used by the publish and retrieve paths.

use std::{sync::Arc, time::Duration};

use tokio::sync::OnceCell;
use tracing::info;

use crate::infra::storage::{ObjectStore, StorageError};

pub const PDF_CONTENT_TYPE: &str = "application/pdf";
pub(crate) const INDEX_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Object store plus the bucket-readiness memo.
///
/// Built once at startup and shared by every component that talks to storage.
pub struct ArtifactStore {
    backend: Arc<dyn ObjectStore>,
    url_ttl: Duration,
    bucket_ready: OnceCell<()>,
}

impl ArtifactStore {
    pub fn new(backend: Arc<dyn ObjectStore>, url_ttl: Duration) -> Self {
        Self {
            backend,
            url_ttl,
            bucket_ready: OnceCell::new(),
        }
    }

    pub fn backend(&self) -> &dyn ObjectStore {
        self.backend.as_ref()
    }

    pub fn url_ttl(&self) -> Duration {
        self.url_ttl
    }

    /// Make sure the bucket exists. Only a successful check is remembered.
    pub async fn ensure_bucket(&self) -> Result<(), StorageError> {
        self.bucket_ready
            .get_or_try_init(|| async {
                if !self.backend.bucket_exists().await? {
                    self.backend.create_bucket().await?;
                    info!(
                        target = "texforge::storage",
                        bucket = self.backend.bucket(),
                        "created bucket"
                    );
                }
                Ok::<(), StorageError>(())
            })
            .await?;
        Ok(())
    }
}
