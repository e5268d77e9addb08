//! Content-addressable ingestion and deduplication engine for depot.
//!
//! The two coupled subsystems at the heart of the vault:
//! - the dedup resolver, deciding reuse / share / create-new for every
//!   upload, and
//! - the streaming ingest pipeline, staging bytes while hashing them and
//!   finalizing atomically once resolution is known.
//!
//! The async adapter replays queued uploads through the same pipeline so
//! the synchronous and asynchronous paths share one dedup decision.

pub mod adapter;
pub mod backends;
pub mod error;
pub mod ingest;
pub mod resolver;
pub mod service;

pub use adapter::AsyncIngestAdapter;
pub use backends::BackendSet;
pub use error::{EngineError, EngineResult};
pub use ingest::{IngestOutcome, IngestPipeline, UploadChunk};
pub use resolver::{DedupResolver, Resolution};
pub use service::{DownloadTarget, FileService};
