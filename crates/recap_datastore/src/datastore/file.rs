use std::{collections::BTreeMap, path::PathBuf};

use anyhow::Context;
use chrono::{Duration, Utc};

use crate::{
    datastore::CacheStore, domain::DEFAULT_CACHE_TTL_SECONDS, JobCache, JobFingerprint,
    SegmentResult, StageRecord,
};

/// Flat-file cache store: one pretty-printed JSON record per
/// fingerprint under a single directory. Good enough for the
/// single-process deployment this substrate targets, and trivially
/// inspectable when a job needs debugging.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    dir: PathBuf,
    ttl: Duration,
}

impl FileCacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileCacheStore {
            dir: dir.into(),
            ttl: Duration::seconds(DEFAULT_CACHE_TTL_SECONDS),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn record_path(&self, fingerprint: &JobFingerprint) -> PathBuf {
        self.dir.join(format!("{fingerprint}.json"))
    }

    /// Read a record without applying the expiry policy. A missing or
    /// corrupt file is absent, never an error.
    async fn read_raw(&self, fingerprint: &JobFingerprint) -> Option<JobCache> {
        let path = self.record_path(fingerprint);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(_) => return None,
        };

        match serde_json::from_slice::<JobCache>(&bytes) {
            Ok(cache) => Some(cache),
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "Discarding unreadable cache record");
                None
            }
        }
    }

    async fn write(&self, cache: &JobCache) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .context("Failed to create cache directory")?;

        let bytes = serde_json::to_vec_pretty(cache).context("Failed to serialize cache record")?;
        tokio::fs::write(self.record_path(&cache.fingerprint), bytes)
            .await
            .inspect_err(|e| tracing::error!(error = ?e, "Failed to write cache record"))
            .context("Failed to write cache record")?;
        Ok(())
    }

    async fn load_or_new(&self, fingerprint: &JobFingerprint) -> JobCache {
        match self.read_raw(fingerprint).await {
            Some(cache) => cache,
            None => JobCache::new(fingerprint.clone(), Utc::now()),
        }
    }

    async fn remove_file(&self, fingerprint: &JobFingerprint) -> anyhow::Result<()> {
        match tokio::fs::remove_file(self.record_path(fingerprint)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to delete cache record"),
        }
    }
}

impl CacheStore for FileCacheStore {
    async fn load(&self, fingerprint: &JobFingerprint) -> anyhow::Result<Option<JobCache>> {
        let Some(cache) = self.read_raw(fingerprint).await else {
            return Ok(None);
        };

        if cache.is_expired(Utc::now(), self.ttl) {
            tracing::info!(%fingerprint, "Cache record expired");
            self.remove_file(fingerprint).await?;
            return Ok(None);
        }

        Ok(Some(cache))
    }

    async fn get_stage(
        &self,
        fingerprint: &JobFingerprint,
        stage: &str,
    ) -> anyhow::Result<Option<StageRecord>> {
        let cache = self.load(fingerprint).await?;
        Ok(cache.and_then(|c| c.stages.get(stage).cloned()))
    }

    async fn save_stage(
        &self,
        fingerprint: &JobFingerprint,
        stage: &str,
        payload: serde_json::Value,
        config: Option<serde_json::Value>,
    ) -> anyhow::Result<()> {
        let now = Utc::now();
        let mut cache = self.load_or_new(fingerprint).await;
        if let Some(config) = config {
            if cache.config.is_null() {
                cache.config = config;
            }
        }
        cache.updated_at = now;
        cache
            .stages
            .insert(stage.to_string(), StageRecord::completed(payload, now));
        self.write(&cache).await?;

        tracing::info!(%fingerprint, stage, "Saved stage result");
        Ok(())
    }

    async fn clear_stage(&self, fingerprint: &JobFingerprint, stage: &str) -> anyhow::Result<()> {
        let Some(mut cache) = self.read_raw(fingerprint).await else {
            return Ok(());
        };

        if cache.stages.remove(stage).is_some() {
            cache.updated_at = Utc::now();
            self.write(&cache).await?;
            tracing::info!(%fingerprint, stage, "Cleared stage result");
        }
        Ok(())
    }

    async fn get_segments(
        &self,
        fingerprint: &JobFingerprint,
    ) -> anyhow::Result<BTreeMap<u32, SegmentResult>> {
        let cache = self.load(fingerprint).await?;
        Ok(cache.map(|c| c.segments).unwrap_or_default())
    }

    async fn save_segment(
        &self,
        fingerprint: &JobFingerprint,
        segment: &SegmentResult,
    ) -> anyhow::Result<()> {
        let mut cache = self.load_or_new(fingerprint).await;
        cache.updated_at = Utc::now();
        cache
            .segments
            .insert(segment.segment_number, segment.clone());
        self.write(&cache).await?;

        tracing::info!(%fingerprint, segment = segment.segment_number, "Saved segment summary");
        Ok(())
    }

    async fn delete(&self, fingerprint: &JobFingerprint) -> anyhow::Result<()> {
        self.remove_file(fingerprint).await?;
        tracing::info!(%fingerprint, "Deleted cache record");
        Ok(())
    }

    async fn sweep_expired(&self) -> anyhow::Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).context("Failed to read cache directory"),
        };

        let now = Utc::now();
        let mut deleted = 0;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(_) => continue,
            };
            let cache = match serde_json::from_slice::<JobCache>(&bytes) {
                Ok(cache) => cache,
                Err(e) => {
                    tracing::warn!(error = %e, path = %path.display(), "Skipping unreadable cache record");
                    continue;
                }
            };

            if cache.is_expired(now, self.ttl) {
                tokio::fs::remove_file(&path).await?;
                deleted += 1;
                tracing::info!(fingerprint = %cache.fingerprint, "Swept expired cache record");
            }
        }

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AssetRef;
    use serde_json::json;

    fn fingerprint(tag: &str) -> JobFingerprint {
        JobFingerprint::compute(&AssetRef::Url(format!("https://example.com/{tag}.mp4")), None, 1)
    }

    fn store(dir: &tempfile::TempDir) -> FileCacheStore {
        FileCacheStore::new(dir.path())
    }

    #[tokio::test]
    async fn missing_fingerprint_is_absent_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let fp = fingerprint("missing");

        assert!(store.load(&fp).await.unwrap().is_none());
        assert!(store.get_stage(&fp, "media").await.unwrap().is_none());
        assert!(store.get_segments(&fp).await.unwrap().is_empty());
        store.clear_stage(&fp, "media").await.unwrap();
        store.delete(&fp).await.unwrap();
    }

    #[tokio::test]
    async fn save_then_get_stage_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let fp = fingerprint("roundtrip");

        let payload = json!({"local_path": "/tmp/a.mp4", "duration_seconds": 600.0});
        store.save_stage(&fp, "media", payload.clone(), None).await.unwrap();

        let record = store.get_stage(&fp, "media").await.unwrap().unwrap();
        assert_eq!(record.status, "completed");
        assert_eq!(record.payload, payload);

        // Sibling stages are independent.
        assert!(store.get_stage(&fp, "merge").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn job_config_is_recorded_on_first_write_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let fp = fingerprint("config");

        store
            .save_stage(&fp, "media", json!({}), Some(json!({"part_size_limit_bytes": 100})))
            .await
            .unwrap();
        // A later write with different settings does not rewrite the
        // config the cached payloads were produced under.
        store
            .save_stage(&fp, "plan", json!({}), Some(json!({"part_size_limit_bytes": 999})))
            .await
            .unwrap();

        let cache = store.load(&fp).await.unwrap().unwrap();
        assert_eq!(cache.config["part_size_limit_bytes"], 100);
    }

    #[tokio::test]
    async fn clear_stage_leaves_siblings_intact() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let fp = fingerprint("clear");

        store.save_stage(&fp, "media", json!({"a": 1}), None).await.unwrap();
        store.save_stage(&fp, "slides", json!({"b": 2}), None).await.unwrap();

        store.clear_stage(&fp, "slides").await.unwrap();
        assert!(store.get_stage(&fp, "slides").await.unwrap().is_none());
        assert!(store.get_stage(&fp, "media").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn segments_are_individually_addressable() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let fp = fingerprint("segments");

        for n in 1..=2u32 {
            store
                .save_segment(
                    &fp,
                    &SegmentResult {
                        segment_number: n,
                        summary_text: format!("part {n}"),
                        start_offset_seconds: f64::from(n - 1) * 900.0,
                    },
                )
                .await
                .unwrap();
        }

        let segments = store.get_segments(&fp).await.unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[&2].summary_text, "part 2");
        assert_eq!(segments[&2].start_offset_seconds, 900.0);
    }

    #[tokio::test]
    async fn expired_record_is_deleted_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).with_ttl(Duration::seconds(0));
        let fp = fingerprint("expired");

        store.save_stage(&fp, "media", json!({}), None).await.unwrap();
        // TTL of zero makes any existing record stale.
        assert!(store.load(&fp).await.unwrap().is_none());
        assert!(!store.record_path(&fp).exists());
    }

    #[tokio::test]
    async fn sweep_respects_transcript_exemption() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).with_ttl(Duration::seconds(0));

        let plain = fingerprint("plain");
        store.save_stage(&plain, "media", json!({}), None).await.unwrap();

        let transcribed = fingerprint("transcribed");
        store
            .save_stage(&transcribed, "transcript", json!({"text": "hello"}), None)
            .await
            .unwrap();

        let deleted = store.sweep_expired().await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.read_raw(&plain).await.is_none());
        assert!(store.read_raw(&transcribed).await.is_some());
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let fp = fingerprint("delete");

        store.save_stage(&fp, "media", json!({}), None).await.unwrap();
        store.delete(&fp).await.unwrap();
        assert!(store.load(&fp).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_record_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let fp = fingerprint("corrupt");

        tokio::fs::create_dir_all(dir.path()).await.unwrap();
        tokio::fs::write(store.record_path(&fp), b"not json")
            .await
            .unwrap();

        assert!(store.load(&fp).await.unwrap().is_none());
        // Sweep skips it rather than erroring out.
        assert_eq!(store.sweep_expired().await.unwrap(), 0);
    }
}
