//! The set of configured storage backends.

use crate::error::{EngineError, EngineResult};
use depot_core::{BackendKind, SharedReference};
use depot_metadata::FileRow;
use depot_storage::ObjectStore;
use std::sync::Arc;

/// Configured backends, addressed by the tag recorded on file records.
///
/// The local backend is always present; the cloud backend only when
/// configured.
pub struct BackendSet {
    local: Arc<dyn ObjectStore>,
    cloud: Option<Arc<dyn ObjectStore>>,
}

impl BackendSet {
    pub fn new(local: Arc<dyn ObjectStore>, cloud: Option<Arc<dyn ObjectStore>>) -> Self {
        Self { local, cloud }
    }

    /// Get the backend for a kind.
    pub fn get(&self, kind: BackendKind) -> EngineResult<&Arc<dyn ObjectStore>> {
        match kind {
            BackendKind::Local => Ok(&self.local),
            BackendKind::Cloud => self.cloud.as_ref().ok_or_else(|| {
                EngineError::Validation("cloud backend not configured".to_string())
            }),
        }
    }

    /// Resolve a record to its download address.
    ///
    /// A shared record resolves through the key embedded in its reference
    /// encoding; it never owns bytes of its own.
    pub fn url_for(&self, record: &FileRow) -> EngineResult<String> {
        let storage = self.get(record.backend_kind()?)?;
        if record.is_shared() {
            let reference = SharedReference::decode_key(&record.object_key)?;
            Ok(storage.public_url(&reference.target_key))
        } else {
            Ok(storage.public_url(&record.object_key))
        }
    }
}
