use std::{future::Future, path::PathBuf};

use crate::error::StepError;

/// A generative provider. One surface serves per-segment
/// summarization, the final merge, and slide matching; only the
/// prompt and attachments differ.
///
/// `api_key` overrides the client's configured key for one call; the
/// retry/fallback wrapper uses this to rotate pool credentials.
pub trait Generator {
    const GENERATION_MODEL: &'static str;

    fn generate(
        &self,
        prompt: &str,
        attachments: &[PathBuf],
        api_key: Option<&str>,
    ) -> impl Future<Output = Result<String, StepError>> + Send;
}

impl<T: Generator + Send + Sync> Generator for &T {
    const GENERATION_MODEL: &'static str = T::GENERATION_MODEL;

    async fn generate(
        &self,
        prompt: &str,
        attachments: &[PathBuf],
        api_key: Option<&str>,
    ) -> Result<String, StepError> {
        (**self).generate(prompt, attachments, api_key).await
    }
}
