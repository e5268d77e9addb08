//! Shared-reference encoding for cross-owner deduplication.
//!
//! When a second owner uploads bytes that already exist under another owner's
//! record, no data is written. Instead a *shared* record is created whose
//! object key embeds the original backend key, and whose hash column holds a
//! synthetic marker (the hash column is globally unique, so the real hash
//! cannot appear twice).
//!
//! Wire contract, preserved byte-for-byte from the deployed format:
//!
//! ```text
//! object key: shared_{owner_id}_{stamp_millis}_{target_key}
//! hash:       shared_{owner_id}_{stamp_millis}
//! ```
//!
//! The target key may itself contain underscores or be a full URL, so
//! decoding splits on the first two separators only.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Marker prefix reserved for synthetic keys and hashes.
///
/// Real hashes are lowercase hex, so the namespaces are disjoint by
/// construction.
pub const SHARED_PREFIX: &str = "shared_";

/// A decoded cross-owner reference: which owner holds it, when it was
/// created, and which backend key actually owns the bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedReference {
    /// Owner the reference was created for.
    pub owner_id: u64,
    /// Creation stamp in unix milliseconds; disambiguates repeated shares.
    pub stamp_millis: i64,
    /// The original record's backend key.
    pub target_key: String,
}

impl SharedReference {
    /// Build a reference for `owner_id` pointing at `target_key`, stamped
    /// with the given wall-clock time.
    pub fn new(owner_id: u64, target_key: impl Into<String>, now: OffsetDateTime) -> Self {
        let stamp_millis = (now.unix_timestamp_nanos() / 1_000_000) as i64;
        Self {
            owner_id,
            stamp_millis,
            target_key: target_key.into(),
        }
    }

    /// Encode the unique object key stored on the shared record.
    pub fn encode_key(&self) -> String {
        format!(
            "{SHARED_PREFIX}{}_{}_{}",
            self.owner_id, self.stamp_millis, self.target_key
        )
    }

    /// Encode the synthetic hash stored on the shared record.
    ///
    /// Never a real content hash; exists only to satisfy the unique
    /// constraint on the hash column.
    pub fn synthetic_hash(&self) -> String {
        format!("{SHARED_PREFIX}{}_{}", self.owner_id, self.stamp_millis)
    }

    /// Decode a shared object key back into its parts.
    ///
    /// Everything after the second separator is the target key, verbatim.
    pub fn decode_key(key: &str) -> crate::Result<Self> {
        let rest = key.strip_prefix(SHARED_PREFIX).ok_or_else(|| {
            crate::Error::InvalidSharedReference(format!("missing {SHARED_PREFIX} prefix: {key}"))
        })?;
        let (owner, rest) = rest.split_once('_').ok_or_else(|| {
            crate::Error::InvalidSharedReference(format!("missing owner separator: {key}"))
        })?;
        let (stamp, target_key) = rest.split_once('_').ok_or_else(|| {
            crate::Error::InvalidSharedReference(format!("missing stamp separator: {key}"))
        })?;

        let owner_id = owner.parse().map_err(|_| {
            crate::Error::InvalidSharedReference(format!("bad owner id {owner:?} in {key}"))
        })?;
        let stamp_millis = stamp.parse().map_err(|_| {
            crate::Error::InvalidSharedReference(format!("bad stamp {stamp:?} in {key}"))
        })?;

        Ok(Self {
            owner_id,
            stamp_millis,
            target_key: target_key.to_string(),
        })
    }

    /// Whether a persisted hash value is a synthetic marker rather than a
    /// real content hash. Every real-hash lookup must exclude these.
    pub fn is_synthetic(hash: &str) -> bool {
        hash.starts_with(SHARED_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_encode_decode_roundtrip() {
        let now = datetime!(2024-03-01 12:00:00 UTC);
        let original = SharedReference::new(42, "uploads/42/1709294400000.bin", now);
        let decoded = SharedReference::decode_key(&original.encode_key()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_target_key_with_underscores_and_url() {
        for target in [
            "my_file_with_underscores.txt",
            "http://cdn.example.com/uploads/7/1700000000000.png",
            "a",
        ] {
            let reference = SharedReference {
                owner_id: 7,
                stamp_millis: 1700000000000,
                target_key: target.to_string(),
            };
            let decoded = SharedReference::decode_key(&reference.encode_key()).unwrap();
            assert_eq!(decoded.target_key, target);
        }
    }

    #[test]
    fn test_exact_wire_format() {
        let reference = SharedReference {
            owner_id: 3,
            stamp_millis: 1709294400123,
            target_key: "uploads/1/origin.bin".to_string(),
        };
        assert_eq!(
            reference.encode_key(),
            "shared_3_1709294400123_uploads/1/origin.bin"
        );
        assert_eq!(reference.synthetic_hash(), "shared_3_1709294400123");
    }

    #[test]
    fn test_decode_rejects_malformed_keys() {
        assert!(SharedReference::decode_key("uploads/plain.bin").is_err());
        assert!(SharedReference::decode_key("shared_42").is_err());
        assert!(SharedReference::decode_key("shared_42_123").is_err());
        assert!(SharedReference::decode_key("shared_notanum_123_key").is_err());
    }

    #[test]
    fn test_synthetic_namespace_is_disjoint_from_hex() {
        let real = crate::ContentHash::compute(b"data").to_hex();
        assert!(!SharedReference::is_synthetic(&real));
        assert!(SharedReference::is_synthetic("shared_1_2"));
    }
}
