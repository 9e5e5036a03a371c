use std::path::{Path, PathBuf};

use futures::StreamExt;
use recap_datastore::AssetRef;
use reqwest::Client;
use serde::Deserialize;
use tokio::{io::AsyncWriteExt, process::Command};

use crate::{
    error::StepError,
    media::{MediaHandler, MediaInfo},
    segment::SegmentPlan,
};

/// Media handler backed by system ffmpeg/ffprobe and streaming HTTP
/// downloads.
pub struct FfmpegMedia {
    client: Client,
}

impl FfmpegMedia {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// The URL to actually fetch. File-service share links are turned
    /// into direct-download form; anything else is fetched as given.
    fn download_url(asset: &AssetRef) -> Option<String> {
        let AssetRef::Url(url) = asset else {
            return None;
        };
        match AssetRef::file_service_id(url) {
            Some(id) => Some(format!(
                "https://drive.google.com/uc?export=download&confirm=t&id={id}"
            )),
            None => Some(url.clone()),
        }
    }

    fn extension_of(url: &str) -> &str {
        url.rsplit('/')
            .next()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext)
            .filter(|ext| ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or("mp4")
    }

    async fn stream_to_file(&self, url: &str, dest: &Path) -> Result<(), StepError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to start download"))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(StepError::from_status(
                status.as_u16(),
                format!("download of {url} failed"),
            ));
        }

        // Write to a temp name first so a partial download never
        // passes the artifact-exists check on resume.
        let partial = dest.with_extension("partial");
        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(|e| StepError::transient(anyhow::anyhow!("cannot create {partial:?}: {e}")))?;

        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| StepError::transient(anyhow::anyhow!("write failed: {e}")))?;
        }
        file.flush()
            .await
            .map_err(|e| StepError::transient(anyhow::anyhow!("flush failed: {e}")))?;
        drop(file);

        tokio::fs::rename(&partial, dest)
            .await
            .map_err(|e| StepError::transient(anyhow::anyhow!("rename failed: {e}")))?;
        Ok(())
    }
}

impl Default for FfmpegMedia {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaHandler for FfmpegMedia {
    #[tracing::instrument(skip(self))]
    async fn download(
        &self,
        asset: &AssetRef,
        dest_dir: &Path,
        base_name: &str,
    ) -> Result<PathBuf, StepError> {
        if let AssetRef::Local { path, .. } = asset {
            return Ok(PathBuf::from(path));
        }

        let url = Self::download_url(asset).ok_or_else(|| {
            StepError::invalid(anyhow::anyhow!("asset has no downloadable source"))
        })?;
        let dest = dest_dir.join(format!("{base_name}.{}", Self::extension_of(&url)));

        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            tracing::info!(path = %dest.display(), "Media already downloaded, skipping");
            return Ok(dest);
        }

        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| StepError::transient(anyhow::anyhow!("cannot create workdir: {e}")))?;

        self.stream_to_file(&url, &dest).await?;
        tracing::info!(path = %dest.display(), "Downloaded media");
        Ok(dest)
    }

    async fn probe(&self, path: &Path) -> Result<MediaInfo, StepError> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration,size",
                "-of",
                "json",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| StepError::transient(anyhow::anyhow!("failed to run ffprobe: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StepError::invalid(anyhow::anyhow!(
                "ffprobe rejected {path:?}: {stderr}"
            )));
        }

        let probed: ProbeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| StepError::invalid(anyhow::anyhow!("unparseable ffprobe output: {e}")))?;

        let duration_seconds = probed
            .format
            .duration
            .parse::<f64>()
            .map_err(|e| StepError::invalid(anyhow::anyhow!("bad duration from ffprobe: {e}")))?;
        let size_bytes = probed
            .format
            .size
            .parse::<u64>()
            .map_err(|e| StepError::invalid(anyhow::anyhow!("bad size from ffprobe: {e}")))?;

        Ok(MediaInfo {
            duration_seconds,
            size_bytes,
        })
    }

    #[tracing::instrument(skip(self, plan))]
    async fn split(
        &self,
        path: &Path,
        plan: &SegmentPlan,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, StepError> {
        if plan.is_single() {
            return Ok(vec![path.to_path_buf()]);
        }

        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| StepError::transient(anyhow::anyhow!("cannot create split dir: {e}")))?;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "media".into());
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mp4".into());

        let mut parts = Vec::with_capacity(plan.len());
        for window in &plan.parts {
            let out = out_dir.join(format!("{stem}_part{}.{ext}", window.part_index));

            // Stream copy, no re-encode. Cut points land on the
            // nearest keyframe, which is close enough for summaries.
            let output = Command::new("ffmpeg")
                .args(["-y", "-ss", &window.start_seconds.to_string(), "-i"])
                .arg(path)
                .args(["-t", &window.duration_seconds.to_string(), "-c", "copy"])
                .arg(&out)
                .output()
                .await
                .map_err(|e| StepError::transient(anyhow::anyhow!("failed to run ffmpeg: {e}")))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(StepError::invalid(anyhow::anyhow!(
                    "ffmpeg failed on part {}: {stderr}",
                    window.part_index
                )));
            }
            parts.push(out);
        }

        tracing::info!(parts = parts.len(), "Split media into parts");
        Ok(parts)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: ProbeFormat,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: String,
    size: String,
}
