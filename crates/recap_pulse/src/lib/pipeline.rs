use std::{path::PathBuf, sync::Arc};

use recap_datastore::{AssetRef, CacheStore, JobFingerprint, SegmentResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::{
    config::PipelineConfig,
    error::PipelineError,
    llm::{Generator, Transcriber, Transcript},
    media::{MediaHandler, MediaInfo, SlideRenderer},
    merge::{condense_context, format_timestamp, label_parts, rewrite_timestamp_markers},
    progress::ProgressSink,
    segment::SegmentPlan,
};

pub mod builder;

pub const STAGE_MEDIA: &str = "media";
pub const STAGE_PLAN: &str = "plan";
pub const STAGE_PARTS: &str = "parts";
pub const STAGE_TRANSCRIPT: &str = "transcript";
pub const STAGE_SLIDES: &str = "slides";
pub const STAGE_MERGE: &str = "merge";
pub const STAGE_SLIDE_MATCH: &str = "slide_match";

/// One summarization request, as submitted by a user.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub media: AssetRef,
    pub slides: Option<AssetRef>,
    pub user_id: u64,
    pub title: Option<String>,
}

/// What a completed job produced.
#[derive(Debug)]
pub struct JobOutcome {
    pub fingerprint: JobFingerprint,
    pub document: String,
    pub slide_images: Vec<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MediaStagePayload {
    path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct PlanStagePayload {
    info: MediaInfo,
    plan: SegmentPlan,
}

#[derive(Debug, Serialize, Deserialize)]
struct PartsStagePayload {
    paths: Vec<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TranscriptStagePayload {
    transcript: Transcript,
}

#[derive(Debug, Serialize, Deserialize)]
struct SlidesStagePayload {
    images: Vec<PathBuf>,
    degraded: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct MergeStagePayload {
    document: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SlideMatchStagePayload {
    document: String,
}

/// The resumable summarization pipeline.
///
/// Every expensive step writes its result to the stage cache before
/// the next one starts, and every step checks the cache before doing
/// work, so a crashed or failed job resumes from its last completed
/// stage when the same inputs are resubmitted.
pub struct SummaryPipeline<D, T, G, M, R>
where
    D: CacheStore + Send + Sync + 'static,
    T: Transcriber + Send + Sync + 'static,
    G: Generator + Send + Sync + 'static,
    M: MediaHandler + Send + Sync + 'static,
    R: SlideRenderer + Send + Sync + 'static,
{
    config: PipelineConfig,
    store: D,
    transcriber: T,
    generator: G,
    media: M,
    slides: R,
    slots: Arc<Semaphore>,
}

impl<D, T, G, M, R> SummaryPipeline<D, T, G, M, R>
where
    D: CacheStore + Send + Sync + 'static,
    T: Transcriber + Send + Sync + 'static,
    G: Generator + Send + Sync + 'static,
    M: MediaHandler + Send + Sync + 'static,
    R: SlideRenderer + Send + Sync + 'static,
{
    /// Run one job end to end, waiting for an admission slot first.
    /// Failures are reported to the sink before being returned.
    #[tracing::instrument(skip(self, sink), fields(user_id = request.user_id))]
    pub async fn run<K>(&self, request: JobRequest, sink: &K) -> Result<JobOutcome, PipelineError>
    where
        K: ProgressSink + Send + Sync,
    {
        let fingerprint = JobFingerprint::compute(&request.media, request.slides.as_ref(), request.user_id);

        let _permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| PipelineError::Stage {
                stage: "admission",
                fingerprint: fingerprint.clone(),
                source: e.into(),
            })?;

        tracing::info!(%fingerprint, "Starting summarization job");
        match self.execute(&request, &fingerprint, sink).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                tracing::error!(error = %err, %fingerprint, "Job failed");
                if let Err(send_err) = sink.send_text(&err.user_message()).await {
                    tracing::warn!(error = %send_err, "Failed to report job failure");
                }
                Err(err)
            }
        }
    }

    async fn execute<K>(
        &self,
        request: &JobRequest,
        fingerprint: &JobFingerprint,
        sink: &K,
    ) -> Result<JobOutcome, PipelineError>
    where
        K: ProgressSink + Send + Sync,
    {
        let workdir = self.config.workdir.join(fingerprint.as_str());

        // Stage 1: materialize the media locally.
        let media_path = self.media_stage(request, fingerprint, &workdir).await?;

        // Stage 2: probe and plan segmentation.
        let (info, plan) = self.plan_stage(fingerprint, &media_path).await?;
        tracing::info!(
            parts = plan.len(),
            duration = info.duration_seconds,
            size = info.size_bytes,
            "Planned segmentation"
        );

        // Stage 3: split, transcribe, and render slides concurrently.
        // The three touch disjoint cache stages and disjoint files.
        let (parts, transcript, slides) = tokio::join!(
            self.parts_stage(fingerprint, &media_path, &plan, &workdir),
            self.transcript_stage(fingerprint, &media_path),
            self.slides_stage(request, fingerprint, &workdir, sink),
        );
        let (parts, transcript, slides) = (parts?, transcript?, slides?);

        // Stage 4: one summary per part, strictly in order, each
        // persisted as it completes.
        let summaries = self
            .segment_stage(fingerprint, &plan, &parts, &transcript)
            .await?;

        // Stage 5: merge into one document.
        let document = self.merge_stage(fingerprint, &summaries).await?;

        // Stage 6: weave in slide references when slides are present.
        let document = match &slides {
            Some(payload) if !payload.images.is_empty() => {
                self.slide_match_stage(fingerprint, &document, &payload.images)
                    .await?
            }
            _ => document,
        };

        let media_url = match &request.media {
            AssetRef::Url(url) => Some(url.as_str()),
            AssetRef::Local { .. } => None,
        };
        let document = rewrite_timestamp_markers(&document, media_url);

        let mut message = String::new();
        if let Some(title) = &request.title {
            message.push_str(&format!("# {title}\n\n"));
        }
        message.push_str(&document);

        sink.send_text(&message).await.map_err(|e| PipelineError::Stage {
            stage: "deliver",
            fingerprint: fingerprint.clone(),
            source: e,
        })?;

        let slide_images = slides.map(|s| s.images).unwrap_or_default();
        for image in &slide_images {
            if let Err(e) = sink.send_file(image).await {
                tracing::warn!(error = %e, path = %image.display(), "Failed to deliver slide image");
            }
        }

        // The job is delivered; its cache has served its purpose.
        self.store
            .delete(fingerprint)
            .await
            .map_err(|e| PipelineError::Stage {
                stage: "cleanup",
                fingerprint: fingerprint.clone(),
                source: e,
            })?;
        if let Err(e) = tokio::fs::remove_dir_all(&workdir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(error = %e, path = %workdir.display(), "Failed to clean up workdir");
            }
        }

        tracing::info!(%fingerprint, "Job completed");
        Ok(JobOutcome {
            fingerprint: fingerprint.clone(),
            document,
            slide_images,
        })
    }

    #[tracing::instrument(skip_all)]
    async fn media_stage(
        &self,
        request: &JobRequest,
        fingerprint: &JobFingerprint,
        workdir: &std::path::Path,
    ) -> Result<PathBuf, PipelineError> {
        if let Some(cached) = self
            .load_stage::<MediaStagePayload>(fingerprint, STAGE_MEDIA)
            .await?
        {
            // The cache can outlive the workdir; trust the stage only
            // if its artifact is still on disk.
            if tokio::fs::try_exists(&cached.path).await.unwrap_or(false) {
                tracing::info!(path = %cached.path.display(), "Reusing downloaded media");
                return Ok(cached.path);
            }
            tracing::warn!("Cached media artifact is gone, re-downloading");
            self.store
                .clear_stage(fingerprint, STAGE_MEDIA)
                .await
                .map_err(|e| self.stage_err(STAGE_MEDIA, fingerprint, e))?;
        }

        let path = self
            .media
            .download(&request.media, workdir, "media")
            .await
            .map_err(|e| PipelineError::from_step(STAGE_MEDIA, fingerprint, e))?;

        self.save_stage(fingerprint, STAGE_MEDIA, &MediaStagePayload { path: path.clone() })
            .await?;
        Ok(path)
    }

    async fn plan_stage(
        &self,
        fingerprint: &JobFingerprint,
        media_path: &std::path::Path,
    ) -> Result<(MediaInfo, SegmentPlan), PipelineError> {
        if let Some(cached) = self
            .load_stage::<PlanStagePayload>(fingerprint, STAGE_PLAN)
            .await?
        {
            return Ok((cached.info, cached.plan));
        }

        let info = self
            .media
            .probe(media_path)
            .await
            .map_err(|e| PipelineError::from_step(STAGE_PLAN, fingerprint, e))?;
        let plan = SegmentPlan::plan(
            info.duration_seconds,
            info.size_bytes,
            self.config.part_size_limit_bytes,
        );

        self.save_stage(
            fingerprint,
            STAGE_PLAN,
            &PlanStagePayload {
                info,
                plan: plan.clone(),
            },
        )
        .await?;
        Ok((info, plan))
    }

    async fn parts_stage(
        &self,
        fingerprint: &JobFingerprint,
        media_path: &std::path::Path,
        plan: &SegmentPlan,
        workdir: &std::path::Path,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        if let Some(cached) = self
            .load_stage::<PartsStagePayload>(fingerprint, STAGE_PARTS)
            .await?
        {
            let mut all_present = true;
            for path in &cached.paths {
                if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                    all_present = false;
                    break;
                }
            }
            if all_present {
                return Ok(cached.paths);
            }
            self.store
                .clear_stage(fingerprint, STAGE_PARTS)
                .await
                .map_err(|e| self.stage_err(STAGE_PARTS, fingerprint, e))?;
        }

        let paths = self
            .media
            .split(media_path, plan, &workdir.join("parts"))
            .await
            .map_err(|e| PipelineError::from_step(STAGE_PARTS, fingerprint, e))?;

        self.save_stage(fingerprint, STAGE_PARTS, &PartsStagePayload { paths: paths.clone() })
            .await?;
        Ok(paths)
    }

    async fn transcript_stage(
        &self,
        fingerprint: &JobFingerprint,
        media_path: &std::path::Path,
    ) -> Result<Transcript, PipelineError> {
        if let Some(cached) = self
            .load_stage::<TranscriptStagePayload>(fingerprint, STAGE_TRANSCRIPT)
            .await?
        {
            tracing::info!("Reusing cached transcript");
            return Ok(cached.transcript);
        }

        let transcript = self
            .transcriber
            .transcribe(media_path)
            .await
            .map_err(|e| PipelineError::from_step(STAGE_TRANSCRIPT, fingerprint, e))?;

        self.save_stage(
            fingerprint,
            STAGE_TRANSCRIPT,
            &TranscriptStagePayload {
                transcript: transcript.clone(),
            },
        )
        .await?;
        Ok(transcript)
    }

    /// Render the slide document, degrading to a summary-only job on
    /// failure when configured to. The requester always hears about a
    /// degrade.
    async fn slides_stage<K>(
        &self,
        request: &JobRequest,
        fingerprint: &JobFingerprint,
        workdir: &std::path::Path,
        sink: &K,
    ) -> Result<Option<SlidesStagePayload>, PipelineError>
    where
        K: ProgressSink + Send + Sync,
    {
        let Some(slides) = &request.slides else {
            return Ok(None);
        };

        if let Some(cached) = self
            .load_stage::<SlidesStagePayload>(fingerprint, STAGE_SLIDES)
            .await?
        {
            return Ok(Some(cached));
        }

        let payload = match self
            .slides
            .render_to_images(slides, &workdir.join("slides"))
            .await
        {
            Ok(images) => SlidesStagePayload {
                images,
                degraded: false,
            },
            Err(e) if self.config.degrade_without_slides => {
                tracing::warn!(error = %e, "Slide rendering failed, continuing without slides");
                if let Err(send_err) = sink
                    .send_text("Could not process the slide document; the summary will not reference slides.")
                    .await
                {
                    tracing::warn!(error = %send_err, "Failed to report slide degrade");
                }
                SlidesStagePayload {
                    images: Vec::new(),
                    degraded: true,
                }
            }
            Err(e) => return Err(PipelineError::from_step(STAGE_SLIDES, fingerprint, e)),
        };

        self.save_stage(fingerprint, STAGE_SLIDES, &payload).await?;
        Ok(Some(payload))
    }

    /// Summarize each part in order. Completed segments load from the
    /// cache and cost nothing; only fresh provider calls are separated
    /// by the configured cool-off.
    #[tracing::instrument(skip_all)]
    async fn segment_stage(
        &self,
        fingerprint: &JobFingerprint,
        plan: &SegmentPlan,
        parts: &[PathBuf],
        transcript: &Transcript,
    ) -> Result<Vec<String>, PipelineError> {
        let existing = self
            .store
            .get_segments(fingerprint)
            .await
            .map_err(|e| self.stage_err("segment", fingerprint, e))?;

        let mut summaries: Vec<String> = Vec::with_capacity(plan.len());
        let mut fresh_calls = 0u32;

        for (idx, window) in plan.parts.iter().enumerate() {
            if let Some(cached) = existing.get(&window.part_index) {
                tracing::info!(part = window.part_index, "Reusing cached segment summary");
                summaries.push(cached.summary_text.clone());
                continue;
            }

            if fresh_calls > 0 {
                tokio::time::sleep(self.config.segment_cooloff).await;
            }

            let slice = transcript.slice(window.start_seconds, window.end_seconds());
            let prompt = if window.part_index == 1 {
                self.config
                    .prompts
                    .segment_first
                    .replace("{transcript}", &slice)
                    .replace("{start_time}", &format_timestamp(window.start_seconds))
            } else {
                let digest = condense_context(&summaries, self.config.context_budget_chars);
                self.config
                    .prompts
                    .segment_continuation
                    .replace("{previous_context}", &digest)
                    .replace("{transcript}", &slice)
                    .replace("{start_time}", &format_timestamp(window.start_seconds))
            };

            let attachments = match parts.get(idx) {
                Some(path) => std::slice::from_ref(path),
                None => &[],
            };

            tracing::info!(part = window.part_index, "Summarizing segment");
            let summary = self
                .generator
                .generate(&prompt, attachments, None)
                .await
                .map_err(|e| PipelineError::from_step("segment", fingerprint, e))?;

            self.store
                .save_segment(
                    fingerprint,
                    &SegmentResult {
                        segment_number: window.part_index,
                        summary_text: summary.clone(),
                        start_offset_seconds: window.start_seconds,
                    },
                )
                .await
                .map_err(|e| self.stage_err("segment", fingerprint, e))?;

            summaries.push(summary);
            fresh_calls += 1;
        }

        Ok(summaries)
    }

    /// Merge the per-segment summaries into one document. A single
    /// segment needs no provider call; its summary is the document.
    async fn merge_stage(
        &self,
        fingerprint: &JobFingerprint,
        summaries: &[String],
    ) -> Result<String, PipelineError> {
        if let Some(cached) = self
            .load_stage::<MergeStagePayload>(fingerprint, STAGE_MERGE)
            .await?
        {
            return Ok(cached.document);
        }

        let document = match summaries {
            [single] => single.clone(),
            many => {
                let prompt = self
                    .config
                    .prompts
                    .merge
                    .replace("{parts_summary}", &label_parts(many));
                self.generator
                    .generate(&prompt, &[], None)
                    .await
                    .map_err(|e| PipelineError::from_step(STAGE_MERGE, fingerprint, e))?
            }
        };

        self.save_stage(
            fingerprint,
            STAGE_MERGE,
            &MergeStagePayload {
                document: document.clone(),
            },
        )
        .await?;
        Ok(document)
    }

    async fn slide_match_stage(
        &self,
        fingerprint: &JobFingerprint,
        document: &str,
        images: &[PathBuf],
    ) -> Result<String, PipelineError> {
        if let Some(cached) = self
            .load_stage::<SlideMatchStagePayload>(fingerprint, STAGE_SLIDE_MATCH)
            .await?
        {
            return Ok(cached.document);
        }

        let prompt = self
            .config
            .prompts
            .slide_match
            .replace("{summary}", document);

        let document = self
            .generator
            .generate(&prompt, images, None)
            .await
            .map_err(|e| PipelineError::from_step(STAGE_SLIDE_MATCH, fingerprint, e))?;

        self.save_stage(
            fingerprint,
            STAGE_SLIDE_MATCH,
            &SlideMatchStagePayload {
                document: document.clone(),
            },
        )
        .await?;
        Ok(document)
    }

    async fn load_stage<P: DeserializeOwned>(
        &self,
        fingerprint: &JobFingerprint,
        stage: &'static str,
    ) -> Result<Option<P>, PipelineError> {
        let record = self
            .store
            .get_stage(fingerprint, stage)
            .await
            .map_err(|e| self.stage_err(stage, fingerprint, e))?;

        // A payload this code can no longer parse is stale, not fatal;
        // the stage just recomputes.
        Ok(record.and_then(|r| match serde_json::from_value(r.payload) {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::warn!(error = %e, stage, "Discarding unparseable stage payload");
                None
            }
        }))
    }

    async fn save_stage<P: Serialize>(
        &self,
        fingerprint: &JobFingerprint,
        stage: &'static str,
        payload: &P,
    ) -> Result<(), PipelineError> {
        let value =
            serde_json::to_value(payload).map_err(|e| self.stage_err(stage, fingerprint, e.into()))?;
        self.store
            .save_stage(fingerprint, stage, value, Some(self.config_snapshot()))
            .await
            .map_err(|e| self.stage_err(stage, fingerprint, e))
    }

    /// Settings the cached payloads were produced under, recorded with
    /// the record on its first write.
    fn config_snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "part_size_limit_bytes": self.config.part_size_limit_bytes,
            "segment_cooloff_seconds": self.config.segment_cooloff.as_secs(),
            "context_budget_chars": self.config.context_budget_chars,
            "degrade_without_slides": self.config.degrade_without_slides,
        })
    }

    fn stage_err(
        &self,
        stage: &'static str,
        fingerprint: &JobFingerprint,
        source: anyhow::Error,
    ) -> PipelineError {
        PipelineError::Stage {
            stage,
            fingerprint: fingerprint.clone(),
            source,
        }
    }
}
