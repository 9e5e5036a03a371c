use std::{future::Future, path::Path};

/// Where job output and status updates go. The pipeline talks to the
/// requester only through this seam, so delivery transports (chat bot,
/// CLI, test harness) are interchangeable.
pub trait ProgressSink {
    fn send_text(&self, text: &str) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn send_file(&self, path: &Path) -> impl Future<Output = anyhow::Result<()>> + Send;
}

impl<T: ProgressSink + Send + Sync> ProgressSink for &T {
    async fn send_text(&self, text: &str) -> anyhow::Result<()> {
        (**self).send_text(text).await
    }

    async fn send_file(&self, path: &Path) -> anyhow::Result<()> {
        (**self).send_file(path).await
    }
}

/// Default sink: logs instead of delivering. Useful for the sweep and
/// cron paths where nobody is listening.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    async fn send_text(&self, text: &str) -> anyhow::Result<()> {
        tracing::info!(chars = text.len(), "Job output:\n{text}");
        Ok(())
    }

    async fn send_file(&self, path: &Path) -> anyhow::Result<()> {
        tracing::info!(path = %path.display(), "Job produced file");
        Ok(())
    }
}
