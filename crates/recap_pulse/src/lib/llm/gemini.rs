use std::{path::Path, path::PathBuf, time::Duration};

use reqwest::Client;
use serde::Deserialize;

use crate::{
    error::StepError,
    llm::{ok_or_api_error, Generator},
};

/// Client for the Gemini generateContent API. Large attachments go
/// through the Files API first and are deleted after the call.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    file_poll_interval: Duration,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://generativelanguage.googleapis.com".into(),
            file_poll_interval: Duration::from_secs(10),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn upload_file(&self, path: &Path, api_key: &str) -> Result<GeminiFile, StepError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StepError::invalid(anyhow::anyhow!("cannot read attachment: {e}")))?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".into());
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime_for(path))
            .map_err(|e| StepError::invalid(anyhow::anyhow!("invalid mime type: {e}")))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .client
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .query(&[("key", api_key)])
            .multipart(form)
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to upload attachment"))?;

        let resp = ok_or_api_error(resp).await?;
        let uploaded = resp.json::<UploadResponse>().await?;
        Ok(uploaded.file)
    }

    /// Poll a freshly uploaded file until the provider finishes
    /// processing it.
    async fn wait_until_active(
        &self,
        mut file: GeminiFile,
        api_key: &str,
    ) -> Result<GeminiFile, StepError> {
        while file.state.as_deref() == Some("PROCESSING") {
            tokio::time::sleep(self.file_poll_interval).await;

            let resp = self
                .client
                .get(format!("{}/v1beta/{}", self.base_url, file.name))
                .query(&[("key", api_key)])
                .send()
                .await?;
            file = ok_or_api_error(resp).await?.json::<GeminiFile>().await?;
        }

        if file.state.as_deref() == Some("FAILED") {
            return Err(StepError::invalid(anyhow::anyhow!(
                "provider failed to process uploaded file {}",
                file.name
            )));
        }
        Ok(file)
    }

    async fn delete_file(&self, name: &str, api_key: &str) {
        let result = self
            .client
            .delete(format!("{}/v1beta/{name}", self.base_url))
            .query(&[("key", api_key)])
            .send()
            .await;
        if let Err(e) = result {
            tracing::warn!(error = %e, file = name, "Failed to delete uploaded file");
        }
    }

    async fn send_generate_request(
        &self,
        parts: Vec<serde_json::Value>,
        api_key: &str,
    ) -> Result<String, StepError> {
        let body = serde_json::json!({
            "contents": [{ "parts": parts }],
            "generationConfig": {
                "thinkingConfig": { "thinkingLevel": "high" }
            }
        });

        let resp = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url,
                Self::GENERATION_MODEL
            ))
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to make generate request"))?;

        let generated = ok_or_api_error(resp).await?.json::<GenerateResponse>().await?;

        generated
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().find_map(|p| p.text))
            .ok_or_else(|| StepError::invalid(anyhow::anyhow!("no text in generate response")))
    }
}

impl Generator for GeminiClient {
    const GENERATION_MODEL: &'static str = "gemini-3-flash-preview";

    async fn generate(
        &self,
        prompt: &str,
        attachments: &[PathBuf],
        api_key: Option<&str>,
    ) -> Result<String, StepError> {
        let api_key = api_key.unwrap_or(&self.api_key);

        let mut uploaded = Vec::with_capacity(attachments.len());
        let mut upload_err = None;
        for path in attachments {
            match self.upload_file(path, api_key).await {
                Ok(file) => match self.wait_until_active(file, api_key).await {
                    Ok(file) => uploaded.push(file),
                    Err(e) => {
                        upload_err = Some(e);
                        break;
                    }
                },
                Err(e) => {
                    upload_err = Some(e);
                    break;
                }
            }
        }

        let result = match upload_err {
            Some(e) => Err(e),
            None => {
                let mut parts: Vec<serde_json::Value> = uploaded
                    .iter()
                    .map(|file| {
                        serde_json::json!({
                            "file_data": { "file_uri": file.uri }
                        })
                    })
                    .collect();
                parts.push(serde_json::json!({ "text": prompt }));
                self.send_generate_request(parts, api_key).await
            }
        };

        // Uploaded files are billed storage; drop them win or lose.
        for file in &uploaded {
            self.delete_file(&file.name, api_key).await;
        }

        result
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mp3") => "audio/mpeg",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: GeminiFile,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiFile {
    name: String,
    uri: String,
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<GenerateCandidate>,
}

#[derive(Debug, Deserialize)]
struct GenerateCandidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}
