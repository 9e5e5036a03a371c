use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use recap_datastore::AssetRef;
use recap_pulse::{
    media::{MediaHandler, MediaInfo},
    SegmentPlan, StepError,
};

/// Media handler that writes real placeholder files, so the
/// artifact-exists checks behave as they would in production.
#[derive(Clone)]
pub struct MockMediaHandler {
    pub info: MediaInfo,
    pub downloads: Arc<Mutex<Vec<AssetRef>>>,
    pub splits: Arc<Mutex<Vec<usize>>>,
}

impl MockMediaHandler {
    pub fn new(duration_seconds: f64, size_bytes: u64) -> Self {
        Self {
            info: MediaInfo {
                duration_seconds,
                size_bytes,
            },
            downloads: Arc::new(Mutex::new(Vec::new())),
            splits: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn download_count(&self) -> usize {
        self.downloads.lock().unwrap().len()
    }
}

impl MediaHandler for MockMediaHandler {
    async fn download(
        &self,
        asset: &AssetRef,
        dest_dir: &Path,
        base_name: &str,
    ) -> Result<PathBuf, StepError> {
        self.downloads.lock().unwrap().push(asset.clone());
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| StepError::transient(anyhow::anyhow!("{e}")))?;
        let path = dest_dir.join(format!("{base_name}.mp4"));
        tokio::fs::write(&path, b"media bytes")
            .await
            .map_err(|e| StepError::transient(anyhow::anyhow!("{e}")))?;
        Ok(path)
    }

    async fn probe(&self, _path: &Path) -> Result<MediaInfo, StepError> {
        Ok(self.info)
    }

    async fn split(
        &self,
        path: &Path,
        plan: &SegmentPlan,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, StepError> {
        self.splits.lock().unwrap().push(plan.len());
        if plan.is_single() {
            return Ok(vec![path.to_path_buf()]);
        }

        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| StepError::transient(anyhow::anyhow!("{e}")))?;
        let mut parts = Vec::new();
        for window in &plan.parts {
            let part = out_dir.join(format!("part{}.mp4", window.part_index));
            tokio::fs::write(&part, b"part bytes")
                .await
                .map_err(|e| StepError::transient(anyhow::anyhow!("{e}")))?;
            parts.push(part);
        }
        Ok(parts)
    }
}
