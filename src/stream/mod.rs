//! Per-key JSONL streams: ordered appends through cached handles, edit and
//! delete by atomic rewrite, and finalization into a `{metadata, messages}`
//! document
//!
//! Layout on disk:
//! - `{active_dir}/{key}.jsonl`  one record per line while the stream is open
//! - `{complete_dir}/{key}.json` the finalized document
//! - `.{key}.{uuid}.tmp`         staging files for rewrite and finalize

pub mod error;
pub mod finalize;
pub mod handles;
pub mod paths;
pub mod record;
pub mod rewrite;
pub mod scheduler;
pub mod store;

pub use error::{Result, StreamError};
pub use finalize::METADATA_MARKER;
pub use paths::{StreamPaths, validate_key};
pub use record::FinalizedDocument;
pub use scheduler::{Completion, KeyedScheduler};
pub use store::StreamStore;
