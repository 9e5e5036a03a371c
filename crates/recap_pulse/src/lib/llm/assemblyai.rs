use std::{path::Path, time::Duration};

use reqwest::Client;
use serde::Deserialize;

use crate::{
    error::StepError,
    llm::{ok_or_api_error, Transcriber, Transcript, TranscriptParagraph},
};

/// AssemblyAI transcription client. Uploads the media, submits a
/// transcription job, polls until terminal, then fetches paragraph
/// timings.
pub struct AssemblyAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    poll_interval: Duration,
}

impl AssemblyAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.assemblyai.com/v2".into(),
            poll_interval: Duration::from_secs(10),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn upload(&self, media_path: &Path) -> Result<String, StepError> {
        let bytes = tokio::fs::read(media_path)
            .await
            .map_err(|e| StepError::invalid(anyhow::anyhow!("cannot read media file: {e}")))?;

        let resp = self
            .client
            .post(format!("{}/upload", self.base_url))
            .header("authorization", &self.api_key)
            .body(bytes)
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to upload media"))?;

        let uploaded = ok_or_api_error(resp).await?.json::<UploadResponse>().await?;
        Ok(uploaded.upload_url)
    }

    async fn submit(&self, audio_url: &str) -> Result<String, StepError> {
        let body = serde_json::json!({
            "audio_url": audio_url,
            "language_detection": true
        });

        let resp = self
            .client
            .post(format!("{}/transcript", self.base_url))
            .header("authorization", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let submitted = ok_or_api_error(resp).await?.json::<TranscriptStatus>().await?;
        Ok(submitted.id)
    }

    async fn poll(&self, id: &str) -> Result<TranscriptStatus, StepError> {
        loop {
            let resp = self
                .client
                .get(format!("{}/transcript/{id}", self.base_url))
                .header("authorization", &self.api_key)
                .send()
                .await?;
            let status = ok_or_api_error(resp).await?.json::<TranscriptStatus>().await?;

            match status.status.as_str() {
                "completed" => return Ok(status),
                "error" => {
                    let detail = status.error.unwrap_or_else(|| "unknown".into());
                    return Err(StepError::transient(anyhow::anyhow!(
                        "transcription job {id} failed: {detail}"
                    )));
                }
                _ => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }

    async fn paragraphs(&self, id: &str) -> Result<Vec<TranscriptParagraph>, StepError> {
        let resp = self
            .client
            .get(format!("{}/transcript/{id}/paragraphs", self.base_url))
            .header("authorization", &self.api_key)
            .send()
            .await?;
        let body = ok_or_api_error(resp).await?.json::<ParagraphsResponse>().await?;

        Ok(body
            .paragraphs
            .into_iter()
            .map(|p| TranscriptParagraph {
                text: p.text,
                start_seconds: p.start as f64 / 1000.0,
                end_seconds: p.end as f64 / 1000.0,
            })
            .collect())
    }
}

impl Transcriber for AssemblyAiClient {
    const TRANSCRIPTION_MODEL: &'static str = "assemblyai-universal";

    #[tracing::instrument(skip(self))]
    async fn transcribe(&self, media_path: &Path) -> Result<Transcript, StepError> {
        let audio_url = self.upload(media_path).await?;
        let id = self.submit(&audio_url).await?;
        tracing::info!(%id, "Submitted transcription job");

        let status = self.poll(&id).await?;
        let paragraphs = self.paragraphs(&id).await?;

        let duration_seconds = status
            .audio_duration
            .map(|d| d as f64)
            .or_else(|| paragraphs.last().map(|p| p.end_seconds))
            .unwrap_or(0.0);

        Ok(Transcript {
            duration_seconds,
            text: status.text.unwrap_or_default(),
            paragraphs,
        })
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptStatus {
    id: String,
    status: String,
    text: Option<String>,
    error: Option<String>,
    audio_duration: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ParagraphsResponse {
    #[serde(default)]
    paragraphs: Vec<ParagraphEntry>,
}

#[derive(Debug, Deserialize)]
struct ParagraphEntry {
    text: String,
    start: u64,
    end: u64,
}
