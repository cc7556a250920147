//! Completion provider abstraction.
//!
//! The engine talks to any chat-completion backend through [`LlmProvider`].
//! [`MockLlmProvider`] is the scripted stand-in used across the test suites.

use crate::error::LlmError;
use crate::types::{
    CompletionRequest, CompletionResponse, FinishReason, Message, TokenUsage,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// Trait for chat-completion providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    ///
    /// Implementations must return [`LlmError::Cancelled`] promptly once
    /// `cancel` fires.
    async fn complete(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;

    /// Whether the backend enforces `response_schema` natively.
    fn supports_structured_output(&self) -> bool {
        false
    }
}

/// Parse a structured reply, tolerating a surrounding markdown code fence.
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(strip_code_fence(text))
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

type Responder =
    Box<dyn Fn(&CompletionRequest) -> Result<CompletionResponse, LlmError> + Send + Sync>;

/// A mock LLM provider for testing.
///
/// Queued responses are served first-in first-out. Once the queue is empty
/// the optional responder is consulted, and failing that a fixed text reply.
pub struct MockLlmProvider {
    model: String,
    responses: Mutex<Vec<Result<CompletionResponse, LlmError>>>,
    responder: Option<Responder>,
    requests: Mutex<Vec<CompletionRequest>>,
    structured_output: bool,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: Mutex::new(Vec::new()),
            responder: None,
            requests: Mutex::new(Vec::new()),
            structured_output: true,
        }
    }

    /// Create a mock that computes every unqueued reply from the request.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<CompletionResponse, LlmError> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::new()
        }
    }

    /// Behave like a backend that ignores `response_schema`.
    pub fn without_structured_output(mut self) -> Self {
        self.structured_output = false;
        self
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn queue_response(&self, response: CompletionResponse) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Ok(response));
    }

    /// Queue an error to be returned by the next `complete` call.
    pub fn queue_error(&self, error: LlmError) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Err(error));
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(text),
            finish_reason: FinishReason::Stop,
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
        }
    }

    /// Create a response whose text is the serialized JSON value.
    pub fn json_response(value: serde_json::Value) -> CompletionResponse {
        Self::text_response(&value.to_string())
    }

    /// Create a response cut off by the token limit.
    pub fn truncated_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            finish_reason: FinishReason::Length,
            ..Self::text_response(text)
        }
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, LlmError> {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let queued = {
            let mut responses = self.responses.lock().unwrap_or_else(PoisonError::into_inner);
            if responses.is_empty() {
                None
            } else {
                Some(responses.remove(0))
            }
        };
        match (queued, &self.responder) {
            (Some(result), _) => result,
            (None, Some(responder)) => responder(&request),
            (None, None) => Ok(MockLlmProvider::text_response(
                "I'm a mock LLM. No queued responses available.",
            )),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn supports_structured_output(&self) -> bool {
        self.structured_output
    }
}
