use std::{path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use anyhow::Context;
use apalis::{
    layers::{retry::RetryPolicy, sentry::SentryLayer},
    prelude::*,
};
use apalis_cron::{CronStream, Tick};
use clap::{Parser, Subcommand};
use cron::Schedule;
use recap_datastore::{AssetRef, CacheStore, FileCacheStore, JobFingerprint};
use recap_pulse::{
    llm::{AssemblyAiClient, GeminiClient, GlmClient},
    media::{FfmpegMedia, PdftoppmRenderer},
    progress::TracingSink,
    tracing::init_tracing_subscriber,
    JobRequest, KeyPool, KeyPoolConfig, PipelineConfig, Resilient, SummaryPipelineBuilder,
};

#[derive(Parser)]
#[command(name = "recap-pulse", about = "Resumable media summarization pipeline")]
struct Cli {
    /// Directory holding per-job cache records
    #[arg(long, env = "CACHE_DIR", default_value = "/var/lib/recap-pulse/cache")]
    cache_dir: PathBuf,

    /// Working directory for downloaded and split media
    #[arg(long, env = "WORKDIR", default_value = "/var/tmp/recap-pulse")]
    workdir: PathBuf,

    /// Comma-separated Gemini API keys; rotated when rate limited
    #[arg(long, env = "GEMINI_API_KEYS", value_delimiter = ',')]
    gemini_keys: Vec<String>,

    /// GLM API key for the fallback provider
    #[arg(long, env = "GLM_API_KEY")]
    glm_key: Option<String>,

    /// AssemblyAI API key
    #[arg(long, env = "ASSEMBLYAI_API_KEY")]
    assemblyai_key: String,

    /// Largest media size in bytes sent to the provider in one call
    #[arg(long, env = "PART_SIZE_LIMIT_BYTES", default_value = "398458880")]
    part_size_limit: u64,

    /// Seconds to wait between freshly summarized segments
    #[arg(long, env = "SEGMENT_COOLOFF_SECONDS", default_value = "60")]
    segment_cooloff: u64,

    /// Maximum jobs processed concurrently
    #[arg(long, env = "MAX_CONCURRENT_JOBS", default_value = "2")]
    max_concurrent_jobs: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize one media asset, resuming from cache when possible
    Summarize {
        /// URL of the media to summarize
        #[arg(long)]
        media_url: String,

        /// URL of the accompanying slide document
        #[arg(long)]
        slides_url: Option<String>,

        /// Requesting user ID, part of the job identity
        #[arg(long, default_value = "0")]
        user: u64,

        /// Title to head the delivered summary
        #[arg(long)]
        title: Option<String>,
    },
    /// Drop the cached record for one (media, slides, user) triple
    ClearCache {
        #[arg(long)]
        media_url: String,

        #[arg(long)]
        slides_url: Option<String>,

        #[arg(long, default_value = "0")]
        user: u64,
    },
    /// Delete expired cache records once and exit
    Sweep,
    /// Run the expiry sweep on a cron schedule
    Cron {
        /// Cron schedule expression
        #[arg(long, env = "CRON_SCHEDULE", default_value = "0 0 * * * *")]
        schedule: String,
    },
}

#[derive(Clone)]
struct SweepContext {
    cache_dir: PathBuf,
}

async fn run_sweep(cache_dir: &std::path::Path) -> anyhow::Result<()> {
    let store = FileCacheStore::new(cache_dir);
    let removed = store.sweep_expired().await?;
    tracing::info!(removed, "Swept expired cache records");
    Ok(())
}

async fn handle_tick(_tick: Tick, ctx: Data<SweepContext>) -> anyhow::Result<()> {
    run_sweep(&ctx.cache_dir).await
}

async fn run_summarize(cli: &Cli, request: JobRequest) -> anyhow::Result<()> {
    let first_key = cli
        .gemini_keys
        .first()
        .context("at least one Gemini API key is required")?;
    let pool = KeyPool::from_keys(cli.gemini_keys.iter().cloned(), KeyPoolConfig::default())
        .map_err(|e| anyhow::anyhow!("bad credential pool: {e}"))?;

    let config = PipelineConfig {
        workdir: cli.workdir.clone(),
        part_size_limit_bytes: cli.part_size_limit,
        segment_cooloff: Duration::from_secs(cli.segment_cooloff),
        max_concurrent_jobs: cli.max_concurrent_jobs,
        ..Default::default()
    };

    let generator = Resilient::new(GeminiClient::new(first_key))
        .with_pool(Arc::new(pool))
        .with_policy(config.retry.clone())
        .with_optional_fallback(cli.glm_key.clone().map(GlmClient::new));

    let pipeline = SummaryPipelineBuilder::new(config)
        .store(FileCacheStore::new(&cli.cache_dir))
        .transcriber(AssemblyAiClient::new(&cli.assemblyai_key))
        .generator(generator)
        .media_handler(FfmpegMedia::new())
        .slide_renderer(PdftoppmRenderer::new())
        .build();

    pipeline.run(request, &TracingSink).await?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let _guard = sentry::init((
        std::env::var("SENTRY_DSN").unwrap_or_default(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some("production".into()),
            ..Default::default()
        },
    ));

    let cli = Cli::parse();
    init_tracing_subscriber()?;

    match &cli.command {
        Command::Summarize {
            media_url,
            slides_url,
            user,
            title,
        } => {
            let request = JobRequest {
                media: AssetRef::Url(media_url.clone()),
                slides: slides_url.clone().map(AssetRef::Url),
                user_id: *user,
                title: title.clone(),
            };
            run_summarize(&cli, request).await?;
        }
        Command::ClearCache {
            media_url,
            slides_url,
            user,
        } => {
            let media = AssetRef::Url(media_url.clone());
            let slides = slides_url.clone().map(AssetRef::Url);
            let fingerprint = JobFingerprint::compute(&media, slides.as_ref(), *user);

            let store = FileCacheStore::new(&cli.cache_dir);
            store.delete(&fingerprint).await?;
            tracing::info!(%fingerprint, "Cleared cache record");
        }
        Command::Sweep => {
            run_sweep(&cli.cache_dir).await?;
        }
        Command::Cron { schedule } => {
            tracing::info!(%schedule, "Starting sweep scheduler...");
            let schedule = Schedule::from_str(schedule)?;

            let worker = WorkerBuilder::new("recap-pulse-sweep")
                .backend(CronStream::new(schedule))
                .retry(RetryPolicy::retries(3))
                .layer(SentryLayer::new())
                .data(SweepContext {
                    cache_dir: cli.cache_dir.clone(),
                })
                .build(handle_tick);

            worker.run().await?;
        }
    }

    Ok(())
}
