use std::{future::Future, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::StepError;

/// A transcription provider: hand it a local media file, get back the
/// full text with paragraph-level timings.
pub trait Transcriber {
    const TRANSCRIPTION_MODEL: &'static str;

    fn transcribe(
        &self,
        media_path: &Path,
    ) -> impl Future<Output = Result<Transcript, StepError>> + Send;
}

impl<T: Transcriber + Send + Sync> Transcriber for &T {
    const TRANSCRIPTION_MODEL: &'static str = T::TRANSCRIPTION_MODEL;

    async fn transcribe(&self, media_path: &Path) -> Result<Transcript, StepError> {
        (**self).transcribe(media_path).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub duration_seconds: f64,
    pub text: String,
    pub paragraphs: Vec<TranscriptParagraph>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptParagraph {
    pub text: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
}

impl Transcript {
    /// Text of every paragraph overlapping the given time range, in
    /// order. Used to hand each segment its slice of the full
    /// transcript.
    pub fn slice(&self, start_seconds: f64, end_seconds: f64) -> String {
        let mut out = String::new();
        for paragraph in &self.paragraphs {
            if paragraph.end_seconds > start_seconds && paragraph.start_seconds < end_seconds {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(&paragraph.text);
            }
        }
        out
    }
}
