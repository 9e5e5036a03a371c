use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use chrono::Utc;
use recap_datastore::{CacheStore, JobCache, JobFingerprint, SegmentResult, StageRecord};

/// In-memory cache store. No expiry; tests that need expiry use the
/// real file store.
#[derive(Clone, Default)]
pub struct MockCacheStore {
    pub records: Arc<Mutex<HashMap<JobFingerprint, JobCache>>>,
    pub deleted: Arc<Mutex<Vec<JobFingerprint>>>,
}

impl MockCacheStore {
    pub fn record(&self, fingerprint: &JobFingerprint) -> Option<JobCache> {
        self.records.lock().unwrap().get(fingerprint).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().unwrap().is_empty()
    }
}

impl CacheStore for MockCacheStore {
    async fn load(&self, fingerprint: &JobFingerprint) -> anyhow::Result<Option<JobCache>> {
        Ok(self.record(fingerprint))
    }

    async fn get_stage(
        &self,
        fingerprint: &JobFingerprint,
        stage: &str,
    ) -> anyhow::Result<Option<StageRecord>> {
        Ok(self
            .record(fingerprint)
            .and_then(|c| c.stages.get(stage).cloned()))
    }

    async fn save_stage(
        &self,
        fingerprint: &JobFingerprint,
        stage: &str,
        payload: serde_json::Value,
        config: Option<serde_json::Value>,
    ) -> anyhow::Result<()> {
        let now = Utc::now();
        let mut records = self.records.lock().unwrap();
        let cache = records
            .entry(fingerprint.clone())
            .or_insert_with(|| JobCache::new(fingerprint.clone(), now));
        if let Some(config) = config {
            if cache.config.is_null() {
                cache.config = config;
            }
        }
        cache.updated_at = now;
        cache
            .stages
            .insert(stage.to_string(), StageRecord::completed(payload, now));
        Ok(())
    }

    async fn clear_stage(&self, fingerprint: &JobFingerprint, stage: &str) -> anyhow::Result<()> {
        let mut records = self.records.lock().unwrap();
        if let Some(cache) = records.get_mut(fingerprint) {
            cache.stages.remove(stage);
        }
        Ok(())
    }

    async fn get_segments(
        &self,
        fingerprint: &JobFingerprint,
    ) -> anyhow::Result<BTreeMap<u32, SegmentResult>> {
        Ok(self
            .record(fingerprint)
            .map(|c| c.segments)
            .unwrap_or_default())
    }

    async fn save_segment(
        &self,
        fingerprint: &JobFingerprint,
        segment: &SegmentResult,
    ) -> anyhow::Result<()> {
        let now = Utc::now();
        let mut records = self.records.lock().unwrap();
        let cache = records
            .entry(fingerprint.clone())
            .or_insert_with(|| JobCache::new(fingerprint.clone(), now));
        cache.updated_at = now;
        cache
            .segments
            .insert(segment.segment_number, segment.clone());
        Ok(())
    }

    async fn delete(&self, fingerprint: &JobFingerprint) -> anyhow::Result<()> {
        self.records.lock().unwrap().remove(fingerprint);
        self.deleted.lock().unwrap().push(fingerprint.clone());
        Ok(())
    }

    async fn sweep_expired(&self) -> anyhow::Result<usize> {
        Ok(0)
    }
}
