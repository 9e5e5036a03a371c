use std::{path::PathBuf, time::Duration};

use crate::retry::RetryPolicy;

/// Everything the orchestrator needs to run a job, passed explicitly
/// at construction time. No component reads ambient global state.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Working directory for downloaded and split media; each job gets
    /// a subdirectory named after its fingerprint.
    pub workdir: PathBuf,
    /// Largest media file the generative provider accepts in one call;
    /// anything bigger gets split.
    pub part_size_limit_bytes: u64,
    /// Cool-off between consecutive freshly computed segments, to
    /// respect the provider's implicit rate limit. Skipped for cached
    /// segments, which need no remote call.
    pub segment_cooloff: Duration,
    /// Character budget for the condensed prior-segment digest carried
    /// into each continuation prompt.
    pub context_budget_chars: usize,
    pub retry: RetryPolicy,
    /// Admission gate: jobs running concurrently beyond this count
    /// wait for a slot before starting.
    pub max_concurrent_jobs: usize,
    /// When slide extraction fails, continue with a summary-only job
    /// (the requester is always told) instead of failing the job.
    pub degrade_without_slides: bool,
    pub prompts: PromptSet,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            workdir: PathBuf::from("/var/tmp/recap-pulse"),
            // Leave headroom under the provider's 400MB upload limit.
            part_size_limit_bytes: 380 * 1024 * 1024,
            segment_cooloff: Duration::from_secs(60),
            context_budget_chars: 2000,
            retry: RetryPolicy::default(),
            max_concurrent_jobs: 2,
            degrade_without_slides: true,
            prompts: PromptSet::default(),
        }
    }
}

/// Prompt templates for the generative calls. Placeholders are
/// substituted by the orchestrator: `{transcript}`, `{start_time}`,
/// `{previous_context}`, `{parts_summary}`, `{summary}`.
#[derive(Debug, Clone)]
pub struct PromptSet {
    pub segment_first: String,
    pub segment_continuation: String,
    pub merge: String,
    pub slide_match: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        PromptSet {
            segment_first: include_str!("./prompts/segment_first.txt").to_string(),
            segment_continuation: include_str!("./prompts/segment_continuation.txt").to_string(),
            merge: include_str!("./prompts/merge.txt").to_string(),
            slide_match: include_str!("./prompts/slide_match.txt").to_string(),
        }
    }
}
