//! Three-way dedup resolution.
//!
//! Given an owner and a freshly computed content hash, decide whether the
//! content already exists for this owner (reuse), exists under another
//! owner (share the bytes through a reference record), or is genuinely new
//! (caller persists bytes, then commits the record).

use crate::error::{EngineError, EngineResult};
use depot_core::{BackendKind, ContentHash, SharedReference};
use depot_metadata::{FileRow, MetaStore, MetadataError, NewFile};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Outcome of dedup resolution.
#[derive(Debug)]
pub enum Resolution {
    /// The owner already holds this content; the record is returned
    /// unchanged and no bytes move.
    Reuse(FileRow),
    /// Another owner holds the bytes; `record` is this owner's shared
    /// reference and `target_key` is the key that actually owns the data.
    Shared { record: FileRow, target_key: String },
    /// Nobody holds this content. Persist bytes first, then call
    /// [`DedupResolver::commit_new`].
    New,
}

/// Dedup resolver over the metadata store.
pub struct DedupResolver {
    meta: Arc<dyn MetaStore>,
}

impl DedupResolver {
    pub fn new(meta: Arc<dyn MetaStore>) -> Self {
        Self { meta }
    }

    /// Resolve an upload against existing records. Lookup order is load-
    /// bearing: an owner match wins over a global match, and only real
    /// hashes participate.
    pub async fn resolve(
        &self,
        owner_id: i64,
        hash: &ContentHash,
        file_name: &str,
    ) -> EngineResult<Resolution> {
        let hex = hash.to_hex();

        // Shared-record creation below can itself lose a race; one retry
        // re-reads the winner.
        for _ in 0..2 {
            if let Some(record) = self.meta.find_owner_real_by_hash(owner_id, &hex).await? {
                debug!(owner_id, hash = %hex, record_id = record.id, "owner already holds content");
                return Ok(Resolution::Reuse(record));
            }

            let global = match self.meta.find_global_real_by_hash(&hex).await? {
                Some(row) => row,
                None => return Ok(Resolution::New),
            };

            // The owner may already reference these bytes through a shared
            // record from an earlier upload.
            for shared in self.meta.find_owner_shared(owner_id).await? {
                match SharedReference::decode_key(&shared.object_key) {
                    Ok(reference) if reference.target_key == global.object_key => {
                        debug!(
                            owner_id,
                            record_id = shared.id,
                            "owner already holds a shared reference"
                        );
                        return Ok(Resolution::Reuse(shared));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(record_id = shared.id, error = %e, "undecodable shared key, skipping")
                    }
                }
            }

            let reference = SharedReference::new(
                owner_id as u64,
                global.object_key.clone(),
                OffsetDateTime::now_utc(),
            );
            let new_file = NewFile {
                owner_id,
                file_name: file_name.to_string(),
                file_size: global.file_size,
                backend: global.backend_kind()?,
                object_key: reference.encode_key(),
                file_hash: reference.synthetic_hash(),
            };

            match self.meta.create_file(&new_file).await {
                Ok(record) => {
                    info!(
                        owner_id,
                        record_id = record.id,
                        target = %global.object_key,
                        "created shared reference"
                    );
                    return Ok(Resolution::Shared {
                        record,
                        target_key: global.object_key,
                    });
                }
                // Another writer created a colliding record between our
                // lookup and insert; loop and re-read.
                Err(MetadataError::UniqueViolation(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(EngineError::Metadata(MetadataError::UniqueViolation(
            "share creation kept losing races".to_string(),
        )))
    }

    /// Commit a record for newly persisted bytes.
    ///
    /// A uniqueness conflict means a concurrent upload of identical content
    /// won the race; the conflict is benign and resolution is re-run to
    /// return the winning record. The boolean is true when the caller's
    /// bytes turned out to be redundant (caller should discard its copy).
    pub async fn commit_new(
        &self,
        owner_id: i64,
        hash: &ContentHash,
        file_name: &str,
        file_size: i64,
        backend: BackendKind,
        object_key: &str,
    ) -> EngineResult<(FileRow, bool)> {
        let new_file = NewFile {
            owner_id,
            file_name: file_name.to_string(),
            file_size,
            backend,
            object_key: object_key.to_string(),
            file_hash: hash.to_hex(),
        };

        match self.meta.create_file(&new_file).await {
            Ok(record) => Ok((record, false)),
            Err(MetadataError::UniqueViolation(detail)) => {
                info!(owner_id, hash = %hash, %detail, "lost create race, reusing winner");
                match self.resolve(owner_id, hash, file_name).await? {
                    Resolution::Reuse(record) => Ok((record, true)),
                    Resolution::Shared { record, .. } => Ok((record, true)),
                    // The conflicting row vanished between insert and
                    // re-read; surface the original conflict.
                    Resolution::New => Err(EngineError::Metadata(
                        MetadataError::UniqueViolation(detail),
                    )),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether deleting this record permits deleting its backend bytes.
    ///
    /// Shared records never do; a real record does only when it was the
    /// last real record carrying its hash.
    pub async fn may_delete_bytes(&self, record: &FileRow) -> EngineResult<bool> {
        if record.is_shared() {
            return Ok(false);
        }
        let remaining = self
            .meta
            .count_other_real_with_hash(&record.file_hash, record.id)
            .await?;
        Ok(remaining == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_metadata::MemoryStore;

    fn resolver() -> (DedupResolver, Arc<MemoryStore>) {
        let meta = Arc::new(MemoryStore::new());
        (DedupResolver::new(meta.clone()), meta)
    }

    #[tokio::test]
    async fn test_new_content_resolves_new() {
        let (resolver, _) = resolver();
        let hash = ContentHash::compute(b"fresh");
        match resolver.resolve(1, &hash, "a.txt").await.unwrap() {
            Resolution::New => {}
            other => panic!("expected New, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_same_owner_reuses() {
        let (resolver, _) = resolver();
        let hash = ContentHash::compute(b"dup");
        let (record, deduplicated) = resolver
            .commit_new(1, &hash, "a.txt", 3, BackendKind::Local, "uploads/1/a")
            .await
            .unwrap();
        assert!(!deduplicated);

        match resolver.resolve(1, &hash, "a-again.txt").await.unwrap() {
            Resolution::Reuse(found) => assert_eq!(found.id, record.id),
            other => panic!("expected Reuse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cross_owner_shares() {
        let (resolver, _) = resolver();
        let hash = ContentHash::compute(b"common bytes");
        let (original, _) = resolver
            .commit_new(1, &hash, "a.txt", 12, BackendKind::Local, "uploads/1/a")
            .await
            .unwrap();

        match resolver.resolve(2, &hash, "b.txt").await.unwrap() {
            Resolution::Shared { record, target_key } => {
                assert_eq!(target_key, original.object_key);
                assert_eq!(record.owner_id, 2);
                assert!(record.is_shared());
                assert_eq!(record.file_size, original.file_size);
                let decoded = SharedReference::decode_key(&record.object_key).unwrap();
                assert_eq!(decoded.target_key, original.object_key);
            }
            other => panic!("expected Shared, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_repeated_share_reuses_reference() {
        let (resolver, _) = resolver();
        let hash = ContentHash::compute(b"common bytes");
        resolver
            .commit_new(1, &hash, "a.txt", 12, BackendKind::Local, "uploads/1/a")
            .await
            .unwrap();

        let first = match resolver.resolve(2, &hash, "b.txt").await.unwrap() {
            Resolution::Shared { record, .. } => record,
            other => panic!("expected Shared, got {other:?}"),
        };

        // Second upload of the same content by the same owner must not
        // create a second reference.
        match resolver.resolve(2, &hash, "b-copy.txt").await.unwrap() {
            Resolution::Reuse(record) => assert_eq!(record.id, first.id),
            other => panic!("expected Reuse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_commit_conflict_is_benign() {
        let (resolver, _) = resolver();
        let hash = ContentHash::compute(b"raced");
        let (winner, _) = resolver
            .commit_new(1, &hash, "w.txt", 5, BackendKind::Local, "uploads/1/w")
            .await
            .unwrap();

        // Same owner lost a concurrent race: re-commit resolves to the
        // winner instead of failing.
        let (record, deduplicated) = resolver
            .commit_new(1, &hash, "w.txt", 5, BackendKind::Local, "uploads/1/w2")
            .await
            .unwrap();
        assert!(deduplicated);
        assert_eq!(record.id, winner.id);

        // A different owner's lost race resolves to a shared reference.
        let (record, deduplicated) = resolver
            .commit_new(2, &hash, "x.txt", 5, BackendKind::Local, "uploads/2/x")
            .await
            .unwrap();
        assert!(deduplicated);
        assert!(record.is_shared());
    }

    #[tokio::test]
    async fn test_delete_safety() {
        let (resolver, _) = resolver();
        let hash = ContentHash::compute(b"shared bytes");
        let (real, _) = resolver
            .commit_new(1, &hash, "a.txt", 12, BackendKind::Local, "uploads/1/a")
            .await
            .unwrap();
        let shared = match resolver.resolve(2, &hash, "b.txt").await.unwrap() {
            Resolution::Shared { record, .. } => record,
            other => panic!("expected Shared, got {other:?}"),
        };

        // Shared records never own bytes.
        assert!(!resolver.may_delete_bytes(&shared).await.unwrap());
        // The only real record does.
        assert!(resolver.may_delete_bytes(&real).await.unwrap());
    }
}
