//! Wire schemas for queued work.
//!
//! Both messages are JSON on the broker. Binary payloads travel base64-coded
//! so the envelope stays printable in broker tooling.

use serde::{Deserialize, Serialize};

/// Cache-invalidation request: drop the cached entry for `name` once
/// `due_timestamp` (unix seconds) has passed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInvalidateMsg {
    pub name: String,
    pub due_timestamp: i64,
}

/// Asynchronous small-file upload: the whole body rides in the message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistFileMsg {
    pub owner_id: u64,
    pub filename: String,
    pub file_size: i64,
    /// Client-computed hash, if any. Verified against the recomputed hash
    /// during ingestion; empty means "compute server-side".
    #[serde(default)]
    pub file_hash: String,
    pub object_key: String,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

/// Base64 encoding for binary payloads.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD
            .decode(&s)
            .map_err(|e| serde::de::Error::custom(format!("base64 decode error: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persist_msg_json_roundtrip() {
        let msg = PersistFileMsg {
            owner_id: 9,
            filename: "report.pdf".to_string(),
            file_size: 4,
            file_hash: String::new(),
            object_key: "uploads/9/report.pdf".to_string(),
            content: vec![0xde, 0xad, 0xbe, 0xef],
        };
        let json = serde_json::to_string(&msg).unwrap();
        // Payload must not appear as a raw JSON byte array.
        assert!(json.contains("3q2+7w=="));
        let back: PersistFileMsg = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_invalidate_msg_roundtrip() {
        let msg = CacheInvalidateMsg {
            name: "alice".to_string(),
            due_timestamp: 1709294400,
        };
        let back: CacheInvalidateMsg =
            serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_persist_msg_hash_defaults_empty() {
        let json = r#"{"owner_id":1,"filename":"a","file_size":1,"object_key":"k","content":"AA=="}"#;
        let msg: PersistFileMsg = serde_json::from_str(json).unwrap();
        assert!(msg.file_hash.is_empty());
        assert_eq!(msg.content, vec![0u8]);
    }
}
