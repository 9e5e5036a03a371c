//! Provider clients and the traits the pipeline is generic over.

mod assemblyai;
mod gemini;
mod generator;
mod glm;
mod transcriber;

pub use assemblyai::AssemblyAiClient;
pub use gemini::GeminiClient;
pub use generator::Generator;
pub use glm::GlmClient;
pub use transcriber::{Transcriber, Transcript, TranscriptParagraph};

use crate::error::StepError;

/// Map a non-success HTTP response to the step error the status code
/// implies, carrying the response body as detail.
pub(crate) async fn ok_or_api_error(
    resp: reqwest::Response,
) -> Result<reqwest::Response, StepError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(StepError::from_status(status.as_u16(), body))
}
