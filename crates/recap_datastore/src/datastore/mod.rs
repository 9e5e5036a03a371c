use std::{collections::BTreeMap, future::Future};

pub mod file;

use crate::{JobCache, JobFingerprint, SegmentResult, StageRecord};

/// Persistence surface below the stage cache: one record per
/// fingerprint, addressable stage-by-stage and segment-by-segment.
///
/// Absence is a normal, cheap outcome everywhere: resumability depends
/// on "not found" never being an error.
pub trait CacheStore {
    /// Load the whole job record, applying the expiry policy: an
    /// expired record is deleted and reported as absent.
    fn load(
        &self,
        fingerprint: &JobFingerprint,
    ) -> impl Future<Output = anyhow::Result<Option<JobCache>>> + Send;

    fn get_stage(
        &self,
        fingerprint: &JobFingerprint,
        stage: &str,
    ) -> impl Future<Output = anyhow::Result<Option<StageRecord>>> + Send;

    /// Last-write-wins; callers are expected to check `get_stage` first
    /// to avoid redoing expensive work. `config` is recorded when it
    /// creates the record and ignored on later writes, so it describes
    /// the settings the cached payloads were produced under.
    fn save_stage(
        &self,
        fingerprint: &JobFingerprint,
        stage: &str,
        payload: serde_json::Value,
        config: Option<serde_json::Value>,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Drop one stage so it gets recomputed; sibling stages are
    /// untouched.
    fn clear_stage(
        &self,
        fingerprint: &JobFingerprint,
        stage: &str,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn get_segments(
        &self,
        fingerprint: &JobFingerprint,
    ) -> impl Future<Output = anyhow::Result<BTreeMap<u32, SegmentResult>>> + Send;

    fn save_segment(
        &self,
        fingerprint: &JobFingerprint,
        segment: &SegmentResult,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Remove the whole record. Called on confirmed success and on
    /// explicit cache-clear requests.
    fn delete(
        &self,
        fingerprint: &JobFingerprint,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Delete every record whose TTL has lapsed, respecting the
    /// transcription exemption. Returns the number deleted.
    fn sweep_expired(&self) -> impl Future<Output = anyhow::Result<usize>> + Send;
}

impl<T: CacheStore + Send + Sync> CacheStore for &T {
    async fn load(&self, fingerprint: &JobFingerprint) -> anyhow::Result<Option<JobCache>> {
        (**self).load(fingerprint).await
    }

    async fn get_stage(
        &self,
        fingerprint: &JobFingerprint,
        stage: &str,
    ) -> anyhow::Result<Option<StageRecord>> {
        (**self).get_stage(fingerprint, stage).await
    }

    async fn save_stage(
        &self,
        fingerprint: &JobFingerprint,
        stage: &str,
        payload: serde_json::Value,
        config: Option<serde_json::Value>,
    ) -> anyhow::Result<()> {
        (**self).save_stage(fingerprint, stage, payload, config).await
    }

    async fn clear_stage(&self, fingerprint: &JobFingerprint, stage: &str) -> anyhow::Result<()> {
        (**self).clear_stage(fingerprint, stage).await
    }

    async fn get_segments(
        &self,
        fingerprint: &JobFingerprint,
    ) -> anyhow::Result<BTreeMap<u32, SegmentResult>> {
        (**self).get_segments(fingerprint).await
    }

    async fn save_segment(
        &self,
        fingerprint: &JobFingerprint,
        segment: &SegmentResult,
    ) -> anyhow::Result<()> {
        (**self).save_segment(fingerprint, segment).await
    }

    async fn delete(&self, fingerprint: &JobFingerprint) -> anyhow::Result<()> {
        (**self).delete(fingerprint).await
    }

    async fn sweep_expired(&self) -> anyhow::Result<usize> {
        (**self).sweep_expired().await
    }
}
