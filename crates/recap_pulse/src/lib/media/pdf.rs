use std::path::{Path, PathBuf};

use futures::StreamExt;
use recap_datastore::AssetRef;
use reqwest::Client;
use tokio::{io::AsyncWriteExt, process::Command};

use crate::{error::StepError, media::SlideRenderer};

/// Slide renderer backed by poppler's pdftoppm. Fetches the document,
/// rasterizes one PNG per page, and returns them in page order.
pub struct PdftoppmRenderer {
    client: Client,
    dpi: u32,
}

impl PdftoppmRenderer {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            dpi: 150,
        }
    }

    async fn fetch(&self, asset: &AssetRef, out_dir: &Path) -> Result<PathBuf, StepError> {
        if let AssetRef::Local { path, .. } = asset {
            return Ok(PathBuf::from(path));
        }

        let AssetRef::Url(url) = asset else {
            return Err(StepError::invalid(anyhow::anyhow!(
                "slide asset has no downloadable source"
            )));
        };
        let url = match AssetRef::file_service_id(url) {
            Some(id) => format!("https://drive.google.com/uc?export=download&confirm=t&id={id}"),
            None => url.clone(),
        };

        let dest = out_dir.join("slides.pdf");
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            return Ok(dest);
        }

        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(StepError::from_status(
                status.as_u16(),
                format!("slide download from {url} failed"),
            ));
        }

        // Write to a temp name first so a partial download never
        // passes the reuse check above on resume.
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

        tokio::fs::rename(&partial, &dest)
            .await
            .map_err(|e| StepError::transient(anyhow::anyhow!("rename failed: {e}")))?;
        Ok(dest)
    }
}

impl Default for PdftoppmRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl SlideRenderer for PdftoppmRenderer {
    #[tracing::instrument(skip(self))]
    async fn render_to_images(
        &self,
        asset: &AssetRef,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, StepError> {
        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| StepError::transient(anyhow::anyhow!("cannot create slide dir: {e}")))?;

        let pdf = self.fetch(asset, out_dir).await?;
        let prefix = out_dir.join("page");

        let output = Command::new("pdftoppm")
            .args(["-png", "-r", &self.dpi.to_string()])
            .arg(&pdf)
            .arg(&prefix)
            .output()
            .await
            .map_err(|e| StepError::transient(anyhow::anyhow!("failed to run pdftoppm: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StepError::invalid(anyhow::anyhow!(
                "pdftoppm rejected {pdf:?}: {stderr}"
            )));
        }

        // pdftoppm zero-pads page numbers, so a lexicographic sort is
        // page order.
        let mut pages = Vec::new();
        let mut entries = tokio::fs::read_dir(out_dir)
            .await
            .map_err(|e| StepError::transient(anyhow::anyhow!("cannot list slide dir: {e}")))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StepError::transient(anyhow::anyhow!("cannot list slide dir: {e}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("png") {
                pages.push(path);
            }
        }
        pages.sort();

        if pages.is_empty() {
            return Err(StepError::invalid(anyhow::anyhow!(
                "no pages rendered from {pdf:?}"
            )));
        }

        tracing::info!(pages = pages.len(), "Rendered slide document");
        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PDF_BYTES: &[u8] = b"%PDF-1.4 complete document";

    #[tokio::test]
    async fn interrupted_download_leftover_is_replaced_by_a_fresh_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slides.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(PDF_BYTES))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        // What a crash mid-stream leaves behind.
        tokio::fs::write(dir.path().join("slides.partial"), b"%PDF-1.4 trunc")
            .await
            .unwrap();

        let renderer = PdftoppmRenderer::new();
        let asset = AssetRef::Url(format!("{}/slides.pdf", server.uri()));
        let dest = renderer.fetch(&asset, dir.path()).await.unwrap();

        assert_eq!(tokio::fs::read(&dest).await.unwrap(), PDF_BYTES);
        assert!(!dir.path().join("slides.partial").exists());
    }

    #[tokio::test]
    async fn completed_download_is_reused_without_refetching() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(PDF_BYTES))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("slides.pdf"), PDF_BYTES)
            .await
            .unwrap();

        let renderer = PdftoppmRenderer::new();
        let asset = AssetRef::Url(format!("{}/slides.pdf", server.uri()));
        let dest = renderer.fetch(&asset, dir.path()).await.unwrap();
        assert_eq!(dest, dir.path().join("slides.pdf"));
    }
}
