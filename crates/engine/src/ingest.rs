//! Streaming ingest pipeline.
//!
//! Terminates a chunked upload: bytes are staged on the target backend and
//! fed through an incremental hasher; once the stream ends the dedup
//! resolver decides whether the staged bytes are promoted or discarded.

use crate::backends::BackendSet;
use crate::error::{EngineError, EngineResult};
use crate::resolver::{DedupResolver, Resolution};
use bytes::Bytes;
use depot_core::{BackendKind, ContentHash, MAX_FILENAME_LEN};
use depot_metadata::FileRow;
use depot_storage::StreamingUpload;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tracing::{info, warn};

/// One chunk of an ordered upload stream. Identity fields are read from the
/// first chunk only.
#[derive(Clone, Debug)]
pub struct UploadChunk {
    pub owner_id: u64,
    pub file_name: String,
    pub object_key: String,
    pub content: Bytes,
    pub is_last: bool,
}

/// Result of a completed ingestion.
#[derive(Debug)]
pub struct IngestOutcome {
    pub record: FileRow,
    /// Resolved download address for the content.
    pub object_url: String,
    /// True when no new bytes were persisted (owner reuse or cross-owner
    /// share).
    pub deduplicated: bool,
}

/// Identity captured from the first chunk.
struct UploadHeader {
    owner_id: i64,
    file_name: String,
    object_key: String,
}

/// Streaming ingest pipeline shared by the synchronous and queued paths.
pub struct IngestPipeline {
    resolver: Arc<DedupResolver>,
    backends: Arc<BackendSet>,
}

impl IngestPipeline {
    pub fn new(resolver: Arc<DedupResolver>, backends: Arc<BackendSet>) -> Self {
        Self { resolver, backends }
    }

    pub fn backends(&self) -> &Arc<BackendSet> {
        &self.backends
    }

    pub fn resolver(&self) -> &Arc<DedupResolver> {
        &self.resolver
    }

    /// Ingest an ordered chunk stream into the given backend.
    ///
    /// Staged data is removed on every non-success path; the final key is
    /// only written for genuinely new content.
    pub async fn ingest<S>(&self, target: BackendKind, mut chunks: S) -> EngineResult<IngestOutcome>
    where
        S: Stream<Item = EngineResult<UploadChunk>> + Unpin + Send,
    {
        let storage = self.backends.get(target)?;

        let mut header: Option<UploadHeader> = None;
        let mut upload: Option<Box<dyn StreamingUpload>> = None;
        let mut hasher = ContentHash::hasher();
        let mut total_bytes: i64 = 0;

        while let Some(next) = chunks.next().await {
            let chunk = match next {
                Ok(chunk) => chunk,
                Err(e) => {
                    Self::abort(upload).await;
                    return Err(e);
                }
            };

            if header.is_none() {
                if let Err(e) = validate_first_chunk(&chunk) {
                    // Nothing staged yet.
                    return Err(e);
                }
                header = Some(UploadHeader {
                    owner_id: chunk.owner_id as i64,
                    file_name: chunk.file_name.clone(),
                    object_key: chunk.object_key.clone(),
                });
                upload = Some(storage.put_stream(&chunk.object_key).await?);
            }

            hasher.update(&chunk.content);
            total_bytes += chunk.content.len() as i64;
            let staged = upload.as_mut().expect("upload opened with header");
            if let Err(e) = staged.write(chunk.content.clone()).await {
                Self::abort(upload).await;
                return Err(e.into());
            }

            if chunk.is_last {
                break;
            }
        }

        let header = match header {
            Some(header) => header,
            None => return Err(EngineError::NoContent),
        };
        let upload = upload.expect("upload opened with header");
        let hash = hasher.finalize();

        let resolution = match self
            .resolver
            .resolve(header.owner_id, &hash, &header.file_name)
            .await
        {
            Ok(resolution) => resolution,
            Err(e) => {
                Self::abort(Some(upload)).await;
                return Err(e);
            }
        };

        match resolution {
            Resolution::Reuse(record) => {
                Self::abort(Some(upload)).await;
                info!(record_id = record.id, "instant transfer: owner reuse");
                let object_url = self.backends.url_for(&record)?;
                Ok(IngestOutcome {
                    record,
                    object_url,
                    deduplicated: true,
                })
            }
            Resolution::Shared { record, .. } => {
                Self::abort(Some(upload)).await;
                info!(record_id = record.id, "instant transfer: cross-owner share");
                let object_url = self.backends.url_for(&record)?;
                Ok(IngestOutcome {
                    record,
                    object_url,
                    deduplicated: true,
                })
            }
            Resolution::New => {
                let written = upload.finish().await?;
                debug_assert_eq!(written as i64, total_bytes);

                match self
                    .resolver
                    .commit_new(
                        header.owner_id,
                        &hash,
                        &header.file_name,
                        total_bytes,
                        storage.backend_kind(),
                        &header.object_key,
                    )
                    .await
                {
                    Ok((record, lost_race)) => {
                        if lost_race {
                            // Our promoted copy is redundant; the winning
                            // record points elsewhere.
                            if let Err(e) = storage.delete(&header.object_key).await {
                                warn!(key = %header.object_key, error = %e, "failed to remove redundant object");
                            }
                        }
                        let object_url = self.backends.url_for(&record)?;
                        Ok(IngestOutcome {
                            record,
                            object_url,
                            deduplicated: lost_race,
                        })
                    }
                    Err(e) => {
                        // Record creation failed after promotion; take the
                        // object back out so no orphan remains.
                        if let Err(del_err) = storage.delete(&header.object_key).await {
                            warn!(key = %header.object_key, error = %del_err, "failed to remove orphaned object");
                        }
                        Err(e)
                    }
                }
            }
        }
    }

    /// Ingest a fully buffered body as a single-chunk stream.
    pub async fn ingest_bytes(
        &self,
        target: BackendKind,
        owner_id: u64,
        file_name: &str,
        object_key: &str,
        content: Bytes,
    ) -> EngineResult<IngestOutcome> {
        let chunk = UploadChunk {
            owner_id,
            file_name: file_name.to_string(),
            object_key: object_key.to_string(),
            content,
            is_last: true,
        };
        self.ingest(target, futures::stream::iter([Ok(chunk)]))
            .await
    }

    async fn abort(upload: Option<Box<dyn StreamingUpload>>) {
        if let Some(upload) = upload {
            if let Err(e) = upload.abort().await {
                warn!(error = %e, "failed to abort staged upload");
            }
        }
    }
}

fn validate_first_chunk(chunk: &UploadChunk) -> EngineResult<()> {
    if chunk.file_name.is_empty() {
        return Err(EngineError::Validation("empty filename".to_string()));
    }
    if chunk.file_name.len() > MAX_FILENAME_LEN {
        return Err(EngineError::Validation(format!(
            "filename exceeds {MAX_FILENAME_LEN} bytes"
        )));
    }
    if chunk.object_key.is_empty() {
        return Err(EngineError::Validation("empty object key".to_string()));
    }
    Ok(())
}
