use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{InferenceError, LlmClient};

/// Scripted backend for tests.
///
/// Responses are served from a queue; once it runs dry the fallback
/// response is repeated. Every call is counted and its prompt kept.
pub struct MockLlmClient {
    queue: Mutex<VecDeque<Result<String, InferenceError>>>,
    fallback: String,
    available_models: Vec<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockLlmClient {
    pub fn new(response: &str) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: response.to_string(),
            available_models: vec!["llama3.1:8b".to_string()],
            delay: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// A backend that always answers "no evidence".
    pub fn empty() -> Self {
        Self::new(r#"{"evidence": []}"#)
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.available_models = models;
        self
    }

    /// Queue a response served before the fallback.
    pub fn then(self, response: &str) -> Self {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(Ok(response.to_string()));
        }
        self
    }

    /// Queue a failure served before the fallback.
    pub fn then_fail(self, error: InferenceError) -> Self {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(Err(error));
        }
        self
    }

    /// Sleep this long inside every `generate` call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of `generate` calls observed running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl LlmClient for MockLlmClient {
    fn generate(&self, _model: &str, prompt: &str, _system: &str) -> Result<String, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let queued = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        match queued {
            Some(result) => result,
            None => Ok(self.fallback.clone()),
        }
    }

    fn is_model_available(&self, model: &str) -> Result<bool, InferenceError> {
        Ok(self.available_models.iter().any(|m| m.starts_with(model)))
    }

    fn list_models(&self) -> Result<Vec<String>, InferenceError> {
        Ok(self.available_models.clone())
    }
}
