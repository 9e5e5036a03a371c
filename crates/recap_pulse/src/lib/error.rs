use recap_datastore::JobFingerprint;

/// Maximum length of an error message shown to the requester.
const DISPLAY_TRUNCATE_CHARS: usize = 200;

/// Classification of a failed remote call. The retry/fallback wrapper
/// acts on this; nothing else in the pipeline interprets provider
/// errors.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// Network blip or timeout. Retried in place with backoff.
    #[error("transient error: {0}")]
    Transient(anyhow::Error),
    /// Provider quota or 429. Triggers credential rotation, then
    /// provider fallback once rotation is exhausted.
    #[error("rate limited: {0}")]
    RateLimited(anyhow::Error),
    /// Malformed input or unsupported format. Never retried.
    #[error("invalid input: {0}")]
    Invalid(anyhow::Error),
}

impl StepError {
    pub fn transient(e: impl Into<anyhow::Error>) -> Self {
        StepError::Transient(e.into())
    }

    pub fn rate_limited(e: impl Into<anyhow::Error>) -> Self {
        StepError::RateLimited(e.into())
    }

    pub fn invalid(e: impl Into<anyhow::Error>) -> Self {
        StepError::Invalid(e.into())
    }

    /// Classify an HTTP error response by status code.
    pub fn from_status(status: u16, message: String) -> Self {
        let err = anyhow::anyhow!("API error: {status} - {message}");
        match status {
            429 => StepError::RateLimited(err),
            s if s >= 500 => StepError::Transient(err),
            _ => StepError::Invalid(err),
        }
    }

    pub fn into_inner(self) -> anyhow::Error {
        match self {
            StepError::Transient(e) | StepError::RateLimited(e) | StepError::Invalid(e) => e,
        }
    }
}

impl From<reqwest::Error> for StepError {
    fn from(e: reqwest::Error) -> Self {
        // Transport-level failures (connect, timeout, body read) are
        // worth retrying; everything status-shaped goes through
        // `from_status` at the call site instead.
        StepError::Transient(e.into())
    }
}

/// Job-level failure surfaced to the caller. Carries the fingerprint
/// so the operator can resume by resubmitting the same inputs.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("stage '{stage}' failed for job {fingerprint}: {source}")]
    Stage {
        stage: &'static str,
        fingerprint: JobFingerprint,
        source: anyhow::Error,
    },
    #[error("invalid input for job {fingerprint}: {source}")]
    Invalid {
        fingerprint: JobFingerprint,
        source: anyhow::Error,
    },
}

impl PipelineError {
    pub fn from_step(stage: &'static str, fingerprint: &JobFingerprint, err: StepError) -> Self {
        match err {
            StepError::Invalid(source) => PipelineError::Invalid {
                fingerprint: fingerprint.clone(),
                source,
            },
            other => PipelineError::Stage {
                stage,
                fingerprint: fingerprint.clone(),
                source: other.into_inner(),
            },
        }
    }

    pub fn stage(&self) -> Option<&'static str> {
        match self {
            PipelineError::Stage { stage, .. } => Some(stage),
            PipelineError::Invalid { .. } => None,
        }
    }

    pub fn fingerprint(&self) -> &JobFingerprint {
        match self {
            PipelineError::Stage { fingerprint, .. } | PipelineError::Invalid { fingerprint, .. } => {
                fingerprint
            }
        }
    }

    /// Resubmitting the same inputs resumes a failed job from its
    /// cached stages. Invalid input fails the same way every time, so
    /// it is not worth resubmitting unchanged.
    pub fn is_resumable(&self) -> bool {
        matches!(self, PipelineError::Stage { .. })
    }

    /// The message shown to the requester: which stage failed, the
    /// underlying error truncated to a safe display length, and
    /// whether resubmitting will resume.
    pub fn user_message(&self) -> String {
        let detail = truncate_chars(&self.to_string(), DISPLAY_TRUNCATE_CHARS);
        if self.is_resumable() {
            format!("{detail}\nResubmit the same inputs to resume from the last completed stage.")
        } else {
            detail
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
