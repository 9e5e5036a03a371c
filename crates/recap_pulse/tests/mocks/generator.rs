use std::{
    collections::VecDeque,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use recap_pulse::{llm::Generator, StepError};

#[derive(Debug, Clone)]
pub struct GenCall {
    pub prompt: String,
    pub attachments: Vec<PathBuf>,
    pub api_key: Option<String>,
}

#[derive(Clone)]
pub enum MockFailure {
    /// Every call fails as invalid input.
    Invalid(String),
    /// Calls from this zero-based index onward fail transiently.
    TransientAfter(usize, String),
    /// Calls made with this api key fail as rate limited.
    RateLimitedWhenKey(String),
}

#[derive(Clone)]
pub struct MockGenerator {
    pub responses: Arc<Mutex<VecDeque<String>>>,
    pub calls: Arc<Mutex<Vec<GenCall>>>,
    pub fail: Option<MockFailure>,
}

impl MockGenerator {
    pub fn new(responses: &[&str]) -> Self {
        Self {
            responses: Arc::new(Mutex::new(
                responses.iter().map(|s| s.to_string()).collect(),
            )),
            calls: Arc::new(Mutex::new(Vec::new())),
            fail: None,
        }
    }

    pub fn failing(fail: MockFailure) -> Self {
        Self {
            fail: Some(fail),
            ..Self::new(&[])
        }
    }

    pub fn with_failure(mut self, fail: MockFailure) -> Self {
        self.fail = Some(fail);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Generator for MockGenerator {
    const GENERATION_MODEL: &'static str = "mock-gen";

    async fn generate(
        &self,
        prompt: &str,
        attachments: &[PathBuf],
        api_key: Option<&str>,
    ) -> Result<String, StepError> {
        let call_index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(GenCall {
                prompt: prompt.to_string(),
                attachments: attachments.to_vec(),
                api_key: api_key.map(str::to_string),
            });
            calls.len() - 1
        };

        match &self.fail {
            Some(MockFailure::Invalid(msg)) => {
                return Err(StepError::invalid(anyhow::anyhow!("{msg}")));
            }
            Some(MockFailure::TransientAfter(n, msg)) if call_index >= *n => {
                return Err(StepError::transient(anyhow::anyhow!("{msg}")));
            }
            Some(MockFailure::RateLimitedWhenKey(key)) if api_key == Some(key.as_str()) => {
                return Err(StepError::rate_limited(anyhow::anyhow!("quota exceeded")));
            }
            _ => {}
        }

        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "## Summary\n- **Default point**".to_string());
        Ok(response)
    }
}
