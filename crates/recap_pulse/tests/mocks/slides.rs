use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use recap_datastore::AssetRef;
use recap_pulse::{media::SlideRenderer, StepError};

#[derive(Clone)]
pub struct MockSlideRenderer {
    pub pages: usize,
    pub calls: Arc<Mutex<Vec<AssetRef>>>,
    pub fail_with: Option<String>,
}

impl MockSlideRenderer {
    pub fn new(pages: usize) -> Self {
        Self {
            pages,
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_with: None,
        }
    }

    pub fn failing(msg: &str) -> Self {
        Self {
            fail_with: Some(msg.to_string()),
            ..Self::new(0)
        }
    }
}

impl SlideRenderer for MockSlideRenderer {
    async fn render_to_images(
        &self,
        asset: &AssetRef,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, StepError> {
        self.calls.lock().unwrap().push(asset.clone());
        if let Some(ref msg) = self.fail_with {
            return Err(StepError::invalid(anyhow::anyhow!("{msg}")));
        }

        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| StepError::transient(anyhow::anyhow!("{e}")))?;
        let mut images = Vec::new();
        for page in 1..=self.pages {
            let image = out_dir.join(format!("page-{page:02}.png"));
            tokio::fs::write(&image, b"png bytes")
                .await
                .map_err(|e| StepError::transient(anyhow::anyhow!("{e}")))?;
            images.push(image);
        }
        Ok(images)
    }
}
