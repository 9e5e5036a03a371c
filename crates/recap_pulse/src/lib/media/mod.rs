//! Media acquisition and manipulation: download, probe, split, and
//! slide rendering. All implementations shell out to system tools.

mod ffmpeg;
mod pdf;

pub use ffmpeg::FfmpegMedia;
pub use pdf::PdftoppmRenderer;

use std::{
    future::Future,
    path::{Path, PathBuf},
};

use recap_datastore::AssetRef;
use serde::{Deserialize, Serialize};

use crate::{error::StepError, segment::SegmentPlan};

/// What a probe reports about a local media file. Drives segmentation
/// planning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration_seconds: f64,
    pub size_bytes: u64,
}

/// Fetching and cutting media files.
pub trait MediaHandler {
    /// Materialize the asset as a local file under `dest_dir`, named
    /// from `base_name` plus the source's extension. Re-downloading an
    /// asset that already exists locally is a no-op.
    fn download(
        &self,
        asset: &AssetRef,
        dest_dir: &Path,
        base_name: &str,
    ) -> impl Future<Output = Result<PathBuf, StepError>> + Send;

    fn probe(&self, path: &Path) -> impl Future<Output = Result<MediaInfo, StepError>> + Send;

    /// Cut the file into one part per plan window, written to
    /// `out_dir`. A single-window plan returns the input untouched.
    fn split(
        &self,
        path: &Path,
        plan: &SegmentPlan,
        out_dir: &Path,
    ) -> impl Future<Output = Result<Vec<PathBuf>, StepError>> + Send;
}

impl<T: MediaHandler + Send + Sync> MediaHandler for &T {
    async fn download(
        &self,
        asset: &AssetRef,
        dest_dir: &Path,
        base_name: &str,
    ) -> Result<PathBuf, StepError> {
        (**self).download(asset, dest_dir, base_name).await
    }

    async fn probe(&self, path: &Path) -> Result<MediaInfo, StepError> {
        (**self).probe(path).await
    }

    async fn split(
        &self,
        path: &Path,
        plan: &SegmentPlan,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, StepError> {
        (**self).split(path, plan, out_dir).await
    }
}

/// Turning a slide document into one image per page.
pub trait SlideRenderer {
    fn render_to_images(
        &self,
        asset: &AssetRef,
        out_dir: &Path,
    ) -> impl Future<Output = Result<Vec<PathBuf>, StepError>> + Send;
}

impl<T: SlideRenderer + Send + Sync> SlideRenderer for &T {
    async fn render_to_images(
        &self,
        asset: &AssetRef,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, StepError> {
        (**self).render_to_images(asset, out_dir).await
    }
}
