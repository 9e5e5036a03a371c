mod config;
mod error;
mod keypool;
pub mod llm;
pub mod media;
mod merge;
mod pipeline;
pub mod progress;
mod retry;
mod segment;
pub mod tracing;

pub use config::{PipelineConfig, PromptSet};
pub use error::{PipelineError, StepError};
pub use keypool::{KeyPool, KeyPoolConfig, KeyPoolError, KeyStatus};
pub use merge::{condense_context, format_timestamp, label_parts, rewrite_timestamp_markers};
pub use pipeline::{
    builder::SummaryPipelineBuilder, JobOutcome, JobRequest, SummaryPipeline, STAGE_MEDIA,
    STAGE_MERGE, STAGE_PARTS, STAGE_PLAN, STAGE_SLIDES, STAGE_SLIDE_MATCH, STAGE_TRANSCRIPT,
};
pub use retry::{call_with_retry, NoSecondary, Resilient, RetryPolicy};
pub use segment::{SegmentPlan, SegmentWindow, MAX_PARTS};
