//! Async ingest adapter.
//!
//! Replays a queued upload message through the same pipeline the streaming
//! path uses, so the two paths cannot diverge in dedup semantics. Runs
//! under the retry scheduler: every failure may be re-executed, and a
//! redelivered message that already succeeded resolves to a reuse.

use crate::error::{EngineError, EngineResult};
use crate::ingest::{IngestOutcome, IngestPipeline};
use bytes::Bytes;
use depot_core::{BackendKind, ContentHash, PersistFileMsg, MAX_ASYNC_PAYLOAD, MAX_FILENAME_LEN};
use std::sync::Arc;
use tracing::{error, info};

/// Adapter from queued persist messages to the ingest pipeline.
pub struct AsyncIngestAdapter {
    pipeline: Arc<IngestPipeline>,
    target: BackendKind,
}

impl AsyncIngestAdapter {
    pub fn new(pipeline: Arc<IngestPipeline>, target: BackendKind) -> Self {
        Self { pipeline, target }
    }

    /// Persist a queued upload. Idempotent under at-least-once delivery:
    /// a replay finds the existing record and reports success.
    pub async fn persist(&self, msg: &PersistFileMsg) -> EngineResult<IngestOutcome> {
        validate(msg)?;

        // A client-declared hash is advisory; the pipeline recomputes the
        // authoritative one. Reject early when they disagree so corrupted
        // payloads never reach storage.
        if !msg.file_hash.is_empty() {
            let computed = ContentHash::compute(&msg.content).to_hex();
            if computed != msg.file_hash {
                error!(
                    filename = %msg.filename,
                    declared = %msg.file_hash,
                    %computed,
                    "queued payload hash mismatch"
                );
                return Err(EngineError::HashMismatch {
                    expected: msg.file_hash.clone(),
                    actual: computed,
                });
            }
        }

        let outcome = self
            .pipeline
            .ingest_bytes(
                self.target,
                msg.owner_id,
                &msg.filename,
                &msg.object_key,
                Bytes::from(msg.content.clone()),
            )
            .await?;

        info!(
            record_id = outcome.record.id,
            deduplicated = outcome.deduplicated,
            filename = %msg.filename,
            "queued upload persisted"
        );
        Ok(outcome)
    }
}

fn validate(msg: &PersistFileMsg) -> EngineResult<()> {
    if msg.filename.is_empty() {
        return Err(EngineError::Validation("empty filename".to_string()));
    }
    if msg.filename.len() > MAX_FILENAME_LEN {
        return Err(EngineError::Validation(format!(
            "filename exceeds {MAX_FILENAME_LEN} bytes"
        )));
    }
    if msg.content.is_empty() {
        return Err(EngineError::NoContent);
    }
    if msg.content.len() > MAX_ASYNC_PAYLOAD {
        return Err(EngineError::Validation(format!(
            "payload of {} bytes exceeds queued upload limit {MAX_ASYNC_PAYLOAD}",
            msg.content.len()
        )));
    }
    if msg.object_key.is_empty() {
        return Err(EngineError::Validation("empty object key".to_string()));
    }
    Ok(())
}
