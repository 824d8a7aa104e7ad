//! Scripted completion clients for tests, behind the `mock` feature elsewhere.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::types::{Completion, CompletionApi, CompletionRequest, TokenUsage};
use super::LlmError;

/// Returns the same text for every request.
pub struct MockLlmClient {
    response: String,
    calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmClient {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl CompletionApi for MockLlmClient {
    fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        Ok(mock_completion(request, &self.response))
    }
}

/// Plays back a fixed sequence of results, one per call. Calls past the end of
/// the script fail with a non-retryable error.
pub struct SequenceLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl SequenceLlmClient {
    pub fn new(script: Vec<Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Convenience for scripts made only of successful responses.
    pub fn with_responses(responses: &[&str]) -> Self {
        Self::new(responses.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl CompletionApi for SequenceLlmClient {
    fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::InvalidRequest {
                status: 400,
                body: "script exhausted".into(),
            }));
        next.map(|text| mock_completion(request, &text))
    }
}

fn mock_completion(request: &CompletionRequest, text: &str) -> Completion {
    Completion {
        text: text.to_string(),
        model: request.model.clone(),
        usage: TokenUsage {
            input_tokens: request.messages.iter().map(|m| m.content.len() as u64 / 4).sum(),
            output_tokens: text.len() as u64 / 4,
        },
        cost_usd: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::Operation;

    #[test]
    fn sequence_plays_in_order_then_fails() {
        let client = SequenceLlmClient::new(vec![
            Err(LlmError::Timeout(1)),
            Ok("second".into()),
        ]);
        let request = CompletionRequest::new(Operation::Extract, "m", "s", "u");
        assert!(client.complete(&request).is_err());
        assert_eq!(client.complete(&request).unwrap().text, "second");
        assert!(client.complete(&request).is_err());
        assert_eq!(client.call_count(), 3);
    }

    #[test]
    fn mock_records_requests() {
        let client = MockLlmClient::new("{}");
        let request = CompletionRequest::new(Operation::Classify, "m", "s", "how many?");
        client.complete(&request).unwrap();
        assert_eq!(client.requests()[0].last_user_message(), Some("how many?"));
    }
}
