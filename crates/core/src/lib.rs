//! Core domain types and shared logic for the depot file vault.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Content hashes and incremental hashing
//! - Backend addressing (local filesystem vs. cloud object store)
//! - The shared-reference encoding used for cross-owner deduplication
//! - Queue message schemas for asynchronous ingestion
//! - Configuration types

pub mod backend;
pub mod config;
pub mod error;
pub mod hash;
pub mod queue;
pub mod shared;

pub use backend::BackendKind;
pub use error::{Error, Result};
pub use hash::{ContentHash, ContentHasher};
pub use queue::{CacheInvalidateMsg, PersistFileMsg};
pub use shared::SharedReference;

/// Maximum accepted filename length in bytes.
pub const MAX_FILENAME_LEN: usize = 255;

/// Maximum payload size for a queued (asynchronous) upload: 8 MiB.
///
/// Larger files must go through the streaming path; the broker carries the
/// whole body inline.
pub const MAX_ASYNC_PAYLOAD: usize = 8 * 1024 * 1024;

/// Default listing page size.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Maximum listing page size.
pub const MAX_PAGE_SIZE: u32 = 100;
