//! Streaming read path for published artifacts, addressed by build id.

use std::{io, pin::Pin, sync::Arc};

use async_stream::try_stream;
use bytes::Bytes;
use futures::Stream;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::{
    domain::build::BuildId,
    infra::storage::{ObjectReader, StorageError},
};

use super::artifacts::ArtifactStore;

/// Relay buffer size; bounds per-download memory.
pub const CHUNK_SIZE: usize = 32 * 1024;
/// Upper bound on an index object's size.
const MAX_INDEX_BYTES: u64 = 1024;

pub type ArtifactStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error("PDF not found")]
    NotFound,
    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for RetrieveError {
    fn from(err: StorageError) -> Self {
        if err.is_not_found() {
            RetrieveError::NotFound
        } else {
            RetrieveError::Storage(err)
        }
    }
}

#[derive(Clone)]
pub struct ArtifactRetriever {
    store: Arc<ArtifactStore>,
}

impl ArtifactRetriever {
    pub fn new(store: Arc<ArtifactStore>) -> Self {
        Self { store }
    }

    /// Open the artifact published by `build_id` as a chunked byte stream.
    pub async fn retrieve(&self, build_id: BuildId) -> Result<ArtifactStream, RetrieveError> {
        self.store.ensure_bucket().await.map_err(RetrieveError::Storage)?;

        let object_key = self.resolve_object_key(build_id).await?;
        let reader = self.store.backend().get_object(&object_key).await?;

        debug!(
            target = "texforge::retrieve",
            build_id = %build_id,
            object_key = %object_key,
            "streaming artifact"
        );

        Ok(Box::pin(chunked(reader)))
    }

    async fn resolve_object_key(&self, build_id: BuildId) -> Result<String, RetrieveError> {
        let reader = self.store.backend().get_object(&build_id.index_key()).await?;
        let mut raw = Vec::new();
        reader
            .take(MAX_INDEX_BYTES)
            .read_to_end(&mut raw)
            .await
            .map_err(|err| RetrieveError::Storage(StorageError::Io(err)))?;

        let key = String::from_utf8(raw).map_err(|err| {
            RetrieveError::Storage(StorageError::backend(
                "read_index",
                format!("index for build {build_id} is not valid UTF-8: {err}"),
            ))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(RetrieveError::Storage(StorageError::backend(
                "read_index",
                format!("index for build {build_id} is empty"),
            )));
        }
        Ok(key.to_string())
    }
}

/// Yield the reader's bytes in chunks of `CHUNK_SIZE` (the last one may be shorter).
fn chunked(mut reader: ObjectReader) -> impl Stream<Item = io::Result<Bytes>> + Send {
    try_stream! {
        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            let mut filled = 0;
            while filled < CHUNK_SIZE {
                let read = reader.read(&mut buffer[filled..]).await?;
                if read == 0 {
                    break;
                }
                filled += read;
            }
            if filled == 0 {
                break;
            }
            yield Bytes::copy_from_slice(&buffer[..filled]);
            if filled < CHUNK_SIZE {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::Cursor,
        sync::atomic::{AtomicBool, Ordering},
        task::{Context, Poll},
        time::Duration,
    };

    use futures::{StreamExt, TryStreamExt};
    use tokio::io::{AsyncRead, ReadBuf};

    use super::*;
    use crate::{
        application::publish::ArtifactPublisher, domain::build::LogicalId,
        infra::storage::MemoryObjectStore,
    };

    fn services(memory: &Arc<MemoryObjectStore>) -> (ArtifactPublisher, ArtifactRetriever) {
        let store = Arc::new(ArtifactStore::new(memory.clone(), Duration::from_secs(60)));
        (
            ArtifactPublisher::new(store.clone()),
            ArtifactRetriever::new(store),
        )
    }

    async fn collect(stream: ArtifactStream) -> Vec<Bytes> {
        stream.try_collect().await.expect("stream")
    }

    /// Reader that records when the stream lets go of it.
    struct FlaggedReader {
        inner: Cursor<Vec<u8>>,
        released: Arc<AtomicBool>,
    }

    impl AsyncRead for FlaggedReader {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
        }
    }

    impl Drop for FlaggedReader {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn streams_large_artifacts_in_fixed_chunks() {
        let memory = Arc::new(MemoryObjectStore::new("latex-builds"));
        let (publisher, retriever) = services(&memory);
        let build_id = BuildId::generate();
        let mut payload = b"%PDF-1.7\n".to_vec();
        payload.resize(CHUNK_SIZE * 2 + 100, b'x');

        publisher
            .publish(
                &LogicalId::parse("big").expect("valid"),
                build_id,
                Bytes::from(payload.clone()),
            )
            .await
            .expect("publish");

        let chunks = collect(retriever.retrieve(build_id).await.expect("retrieve")).await;
        let sizes: Vec<usize> = chunks.iter().map(Bytes::len).collect();
        assert_eq!(sizes, vec![CHUNK_SIZE, CHUNK_SIZE, 100]);
        assert_eq!(chunks.concat(), payload);
    }

    #[tokio::test]
    async fn earlier_build_ids_resolve_to_the_latest_artifact() {
        let memory = Arc::new(MemoryObjectStore::new("latex-builds"));
        let (publisher, retriever) = services(&memory);
        let logical_id = LogicalId::parse("slot").expect("valid");
        let first = BuildId::generate();
        let second = BuildId::generate();

        publisher
            .publish(&logical_id, first, Bytes::from_static(b"%PDF-first"))
            .await
            .expect("first");
        publisher
            .publish(&logical_id, second, Bytes::from_static(b"%PDF-second"))
            .await
            .expect("second");

        for build_id in [first, second] {
            let chunks = collect(retriever.retrieve(build_id).await.expect("retrieve")).await;
            assert_eq!(chunks.concat(), b"%PDF-second");
        }
    }

    #[tokio::test]
    async fn unknown_build_is_not_found() {
        let memory = Arc::new(MemoryObjectStore::new("latex-builds"));
        let (_, retriever) = services(&memory);

        let err = retriever
            .retrieve(BuildId::generate())
            .await
            .err()
            .expect("missing build");
        assert!(matches!(err, RetrieveError::NotFound));
    }

    #[tokio::test]
    async fn backend_failures_are_storage_errors() {
        let memory = Arc::new(MemoryObjectStore::new("latex-builds"));
        let (_, retriever) = services(&memory);
        memory.fail_gets(true);

        let err = retriever
            .retrieve(BuildId::generate())
            .await
            .err()
            .expect("read failure");
        assert!(matches!(err, RetrieveError::Storage(_)));
    }

    #[tokio::test]
    async fn dropping_the_stream_releases_the_reader() {
        let released = Arc::new(AtomicBool::new(false));
        let reader: ObjectReader = Box::pin(FlaggedReader {
            inner: Cursor::new(vec![b'x'; CHUNK_SIZE * 3]),
            released: released.clone(),
        });

        let mut stream = Box::pin(chunked(reader));
        let first = stream.next().await.expect("one chunk").expect("read");
        assert_eq!(first.len(), CHUNK_SIZE);
        assert!(!released.load(Ordering::SeqCst));

        drop(stream);
        assert!(released.load(Ordering::SeqCst));
    }
}
