use std::path::PathBuf;

use reqwest::Client;
use serde::Deserialize;

use crate::{
    error::StepError,
    llm::{ok_or_api_error, Generator},
};

/// Fallback generative provider speaking the OpenAI-compatible chat
/// completions protocol. Text-only: attachments are not sent, so
/// fallback output may lack visual detail from the media itself.
pub struct GlmClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GlmClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.z.ai/api/paas/v4".into(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

impl Generator for GlmClient {
    const GENERATION_MODEL: &'static str = "glm-4.6";

    async fn generate(
        &self,
        prompt: &str,
        attachments: &[PathBuf],
        api_key: Option<&str>,
    ) -> Result<String, StepError> {
        if !attachments.is_empty() {
            tracing::warn!(
                count = attachments.len(),
                "Fallback provider is text-only, dropping attachments"
            );
        }

        let body = serde_json::json!({
            "model": Self::GENERATION_MODEL,
            "messages": [{ "role": "user", "content": prompt }]
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key.unwrap_or(&self.api_key))
            .json(&body)
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to make chat completion request"))?;

        let completion = ok_or_api_error(resp).await?.json::<ChatResponse>().await?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| StepError::invalid(anyhow::anyhow!("no choices in chat response")))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}
