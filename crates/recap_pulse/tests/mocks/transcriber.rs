use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use recap_pulse::{
    llm::{Transcriber, Transcript, TranscriptParagraph},
    StepError,
};

#[derive(Clone)]
pub struct MockTranscriber {
    pub transcript: Transcript,
    pub calls: Arc<Mutex<Vec<PathBuf>>>,
    pub fail_with: Option<String>,
}

impl MockTranscriber {
    /// A transcript with one paragraph per 600-second block, so
    /// segment slicing has something to select from.
    pub fn new(duration_seconds: f64) -> Self {
        let blocks = (duration_seconds / 600.0).ceil() as usize;
        let paragraphs = (0..blocks)
            .map(|i| TranscriptParagraph {
                text: format!("paragraph {i}"),
                start_seconds: i as f64 * 600.0,
                end_seconds: ((i + 1) as f64 * 600.0).min(duration_seconds),
            })
            .collect::<Vec<_>>();
        let text = paragraphs
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            transcript: Transcript {
                duration_seconds,
                text,
                paragraphs,
            },
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_with: None,
        }
    }

    pub fn failing(msg: &str) -> Self {
        Self {
            fail_with: Some(msg.to_string()),
            ..Self::new(600.0)
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Transcriber for MockTranscriber {
    const TRANSCRIPTION_MODEL: &'static str = "mock-stt";

    async fn transcribe(&self, media_path: &Path) -> Result<Transcript, StepError> {
        self.calls.lock().unwrap().push(media_path.to_path_buf());
        if let Some(ref msg) = self.fail_with {
            return Err(StepError::transient(anyhow::anyhow!("{msg}")));
        }
        Ok(self.transcript.clone())
    }
}
