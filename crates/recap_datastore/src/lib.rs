//! # Stage cache datastore
//!
//! Keyed, append-only storage of pipeline stage results, scoped per
//! job fingerprint. One record holds everything needed to resume a
//! crashed or cancelled job: completed stage payloads plus per-segment
//! summaries. Records expire after a period of inactivity unless they
//! contain transcription output, which is too expensive to reproduce.

mod datastore;
mod domain;

pub use datastore::file::FileCacheStore;
pub use datastore::CacheStore;
pub use domain::{
    AssetRef, JobCache, JobFingerprint, SegmentResult, StageRecord, DEFAULT_CACHE_TTL_SECONDS,
    TRANSCRIPT_STAGE_PREFIX,
};
