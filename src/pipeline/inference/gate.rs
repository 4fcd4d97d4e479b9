use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use super::{InferenceError, LlmClient};
use crate::pipeline::usage::UsageAccumulator;

/// Async front for a blocking [`LlmClient`].
///
/// Every call holds one permit of the run-wide semaphore until the blocking
/// backend call returns, even when the caller has already timed out. Calls
/// carry a timeout and are retried on transient failures. Heuristic work
/// never touches the semaphore.
#[derive(Clone)]
pub struct InferenceGate {
    client: Arc<dyn LlmClient>,
    permits: Arc<Semaphore>,
    model: String,
    timeout: Duration,
    max_retries: u32,
}

impl InferenceGate {
    pub fn new(
        client: Arc<dyn LlmClient>,
        model: &str,
        max_concurrent: usize,
        timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            client,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            model: model.to_string(),
            timeout,
            max_retries,
        }
    }

    /// Permits currently free; equals the ceiling when the gate is idle.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn generate(
        &self,
        prompt: &str,
        system: &str,
        usage: &UsageAccumulator,
    ) -> Result<String, InferenceError> {
        let mut attempt = 0;
        loop {
            match self.attempt(prompt, system, usage).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    usage.record_retry();
                    tracing::debug!(attempt, error = %e, "Retrying inference call");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(
        &self,
        prompt: &str,
        system: &str,
        usage: &UsageAccumulator,
    ) -> Result<String, InferenceError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| InferenceError::Task(e.to_string()))?;

        usage.record_call(prompt.len());

        let client = Arc::clone(&self.client);
        let model = self.model.clone();
        let prompt = prompt.to_string();
        let system = system.to_string();
        let call = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            client.generate(&model, &prompt, &system)
        });

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(Ok(response))) => {
                usage.record_response(response.len());
                Ok(response)
            }
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(join_error)) => Err(InferenceError::Task(join_error.to_string())),
            Err(_) => {
                usage.record_timeout();
                Err(InferenceError::Timeout(self.timeout.as_secs()))
            }
        }
    }
}
