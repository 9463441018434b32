//! Publishing of compiled artifacts.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    domain::build::{BuildId, LogicalId},
    infra::storage::StorageError,
};

use super::artifacts::{ArtifactStore, INDEX_CONTENT_TYPE, PDF_CONTENT_TYPE};

#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct PublishError {
    pub stage: &'static str,
    #[source]
    pub source: StorageError,
}

impl PublishError {
    fn at(stage: &'static str) -> impl FnOnce(StorageError) -> Self {
        move |source| Self { stage, source }
    }
}

#[derive(Debug, Clone)]
pub struct PublishResult {
    pub object_key: String,
    pub signed_url: String,
    /// Whether an artifact already existed for the slot. Best effort.
    pub overwritten: bool,
}

#[derive(Clone)]
pub struct ArtifactPublisher {
    store: Arc<ArtifactStore>,
}

impl ArtifactPublisher {
    pub fn new(store: Arc<ArtifactStore>) -> Self {
        Self { store }
    }

    /// Store `artifact` under the slot's key, index it by build id and sign a URL.
    ///
    /// A later publish for the same logical id replaces the stored object.
    pub async fn publish(
        &self,
        logical_id: &LogicalId,
        build_id: BuildId,
        artifact: Bytes,
    ) -> Result<PublishResult, PublishError> {
        self.store
            .ensure_bucket()
            .await
            .map_err(PublishError::at("ensure bucket"))?;

        let backend = self.store.backend();
        let object_key = logical_id.object_key();

        let overwritten = match backend.object_exists(&object_key).await {
            Ok(exists) => exists,
            Err(err) => {
                warn!(
                    target = "texforge::publish",
                    object_key = %object_key,
                    error = %err,
                    "existence check failed; reporting no overwrite"
                );
                false
            }
        };

        let artifact_bytes = artifact.len();
        backend
            .put_object(&object_key, artifact, PDF_CONTENT_TYPE)
            .await
            .map_err(PublishError::at("upload"))?;

        backend
            .put_object(
                &build_id.index_key(),
                Bytes::from(object_key.clone()),
                INDEX_CONTENT_TYPE,
            )
            .await
            .map_err(PublishError::at("index"))?;

        let signed_url = backend
            .presign_get(&object_key, self.store.url_ttl())
            .await
            .map_err(PublishError::at("sign url"))?;

        info!(
            target = "texforge::publish",
            build_id = %build_id,
            logical_id = %logical_id,
            object_key = %object_key,
            artifact_bytes,
            overwritten,
            "artifact published"
        );

        Ok(PublishResult {
            object_key,
            signed_url,
            overwritten,
        })
    }
}
