//! Storage backend identification.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which physical backend owns a record's bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local filesystem under the configured storage root.
    Local,
    /// Remote S3-compatible object store.
    Cloud,
}

impl BackendKind {
    /// The tag persisted in file records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Cloud => "cloud",
        }
    }

    /// Parse a persisted backend tag.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "local" => Ok(Self::Local),
            "cloud" => Ok(Self::Cloud),
            other => Err(crate::Error::UnknownBackend(other.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_roundtrip() {
        for kind in [BackendKind::Local, BackendKind::Cloud] {
            assert_eq!(BackendKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(BackendKind::parse("qiniu").is_err());
    }
}
