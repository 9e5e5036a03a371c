use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use recap_pulse::progress::ProgressSink;

#[derive(Clone, Default)]
pub struct RecordingSink {
    pub texts: Arc<Mutex<Vec<String>>>,
    pub files: Arc<Mutex<Vec<PathBuf>>>,
    /// Number of upcoming send_text calls that should fail, to
    /// simulate an unreachable delivery transport.
    pub fail_text_times: Arc<Mutex<usize>>,
}

impl RecordingSink {
    pub fn failing_texts(times: usize) -> Self {
        let sink = Self::default();
        *sink.fail_text_times.lock().unwrap() = times;
        sink
    }

    pub fn last_text(&self) -> Option<String> {
        self.texts.lock().unwrap().last().cloned()
    }

    pub fn text_count(&self) -> usize {
        self.texts.lock().unwrap().len()
    }
}

impl ProgressSink for RecordingSink {
    async fn send_text(&self, text: &str) -> anyhow::Result<()> {
        let mut remaining = self.fail_text_times.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            anyhow::bail!("delivery transport unavailable");
        }
        self.texts.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn send_file(&self, path: &Path) -> anyhow::Result<()> {
        self.files.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}
