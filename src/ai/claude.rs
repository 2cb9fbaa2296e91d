use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};

use super::backend::{LanguageModel, ModelSession, Readiness, SnapshotStream, UnavailableReason};
use super::diagnostics::BackendError;
use super::partial_json;
use crate::config::Config;

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

const SYSTEM_PROMPT: &str = r#"You are a helpful assistant that summarizes and discusses news articles.
Focus on the key facts, main arguments, and important conclusions.
Use clear, accessible language."#;

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message>,
    system: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

impl Message {
    fn user(content: &str) -> Self {
        Self {
            role: "user",
            content: content.to_string(),
        }
    }

    fn assistant(content: &str) -> Self {
        Self {
            role: "assistant",
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta { delta: Delta },
    MessageStop,
    Error { error: ApiError },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

/// Anthropic Messages API as a [`LanguageModel`].
#[derive(Clone)]
pub struct ClaudeBackend {
    client: Client,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    history_turns: usize,
}

impl ClaudeBackend {
    pub fn new(config: &Config) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            api_key: config.claude_api_key.clone().filter(|k| !k.trim().is_empty()),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            history_turns: config.session_history_turns,
        }
    }

    pub fn model_version(&self) -> &str {
        &self.model
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("x-api-key", self.api_key.as_deref().unwrap_or_default())
            .header("anthropic-version", ANTHROPIC_VERSION)
    }

    async fn send(&self, request: &MessageRequest<'_>) -> Result<reqwest::Response, BackendError> {
        let response = self
            .authorized(self.client.post(format!("{}/messages", CLAUDE_API_URL)))
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status, &body));
        }
        Ok(response)
    }
}

#[async_trait]
impl LanguageModel for ClaudeBackend {
    async fn readiness(&self) -> Readiness {
        if self.api_key.is_none() {
            return Readiness::Unavailable(UnavailableReason::NotEnabled);
        }

        let request = self
            .authorized(self.client.get(format!("{}/models/{}", CLAUDE_API_URL, self.model)));
        match request.send().await {
            Ok(response) => readiness_for(response.status()),
            Err(e) => {
                tracing::debug!("Readiness check failed: {}", e);
                Readiness::Unavailable(UnavailableReason::Other(e.to_string()))
            }
        }
    }

    fn open_session(&self) -> Box<dyn ModelSession> {
        Box::new(ClaudeSession {
            backend: self.clone(),
            history: Vec::new(),
        })
    }
}

fn readiness_for(status: StatusCode) -> Readiness {
    match status {
        s if s.is_success() => Readiness::Available,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Readiness::Unavailable(UnavailableReason::NotEnabled)
        }
        StatusCode::NOT_FOUND => Readiness::Unavailable(UnavailableReason::ModelNotReady),
        s => Readiness::Unavailable(UnavailableReason::Other(format!("HTTP {}", s))),
    }
}

/// One conversation. The HTTP API is stateless, so the session replays its own bounded
/// history of completed turns with every request.
struct ClaudeSession {
    backend: ClaudeBackend,
    history: Vec<Message>,
}

impl ClaudeSession {
    fn messages_with(&self, prompt: &str) -> Vec<Message> {
        let mut messages = self.history.clone();
        messages.push(Message::user(prompt));
        messages
    }

    fn record_turn(&mut self, prompt: &str, reply: &str) {
        self.history.push(Message::user(prompt));
        self.history.push(Message::assistant(reply));
        let keep = self.backend.history_turns * 2;
        if self.history.len() > keep {
            let excess = self.history.len() - keep;
            self.history.drain(..excess);
        }
    }
}

#[async_trait]
impl ModelSession for ClaudeSession {
    async fn respond(&mut self, prompt: &str) -> Result<String, BackendError> {
        let request = MessageRequest {
            model: &self.backend.model,
            max_tokens: self.backend.max_tokens,
            messages: self.messages_with(prompt),
            system: SYSTEM_PROMPT.to_string(),
            stream: false,
        };

        let response = self.backend.send(&request).await?;
        let message: MessageResponse = response.json().await.map_err(|e| transport_error(&e))?;

        let text = message
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");

        self.record_turn(prompt, &text);
        Ok(text)
    }

    async fn stream_structured(
        &mut self,
        prompt: &str,
        schema: &serde_json::Value,
    ) -> Result<SnapshotStream, BackendError> {
        let system = format!(
            "{}\n\nRespond only with a JSON object that matches this JSON schema:\n{}",
            SYSTEM_PROMPT, schema
        );
        // Prefilling the opening brace keeps the reply a bare JSON object.
        let mut messages = self.messages_with(prompt);
        messages.push(Message::assistant("{"));

        let request = MessageRequest {
            model: &self.backend.model,
            max_tokens: self.backend.max_tokens,
            messages,
            system,
            stream: true,
        };

        let response = self.backend.send(&request).await?;
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(|e| transport_error(&e)))
            .boxed();

        Ok(snapshots(bytes, "{".to_string()))
    }
}

struct SseState {
    bytes: BoxStream<'static, Result<Vec<u8>, BackendError>>,
    pending: Vec<u8>,
    text: String,
    last: Option<serde_json::Value>,
    finished: bool,
}

/// Turns an SSE byte stream into JSON snapshots of the accumulated text. A snapshot is
/// only emitted when it differs from the previous one.
fn snapshots(
    bytes: BoxStream<'static, Result<Vec<u8>, BackendError>>,
    seed: String,
) -> SnapshotStream {
    let state = SseState {
        bytes,
        pending: Vec::new(),
        text: seed,
        last: None,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }

            while let Some(pos) = state.pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = state.pending.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                let Some(data) = line.trim_end().strip_prefix("data:") else {
                    continue;
                };

                match serde_json::from_str::<StreamEvent>(data.trim()) {
                    Ok(StreamEvent::ContentBlockDelta {
                        delta: Delta::TextDelta { text },
                    }) => {
                        state.text.push_str(&text);
                        if let Some(value) = decode_snapshot(&state.text) {
                            if state.last.as_ref() != Some(&value) {
                                state.last = Some(value.clone());
                                return Some((Ok(value), state));
                            }
                        }
                    }
                    Ok(StreamEvent::MessageStop) => return None,
                    Ok(StreamEvent::Error { error }) => {
                        state.finished = true;
                        let cause = BackendError::new(error.kind, -1, error.message);
                        let err = BackendError::new("stream", -1, "Stream reported an error")
                            .with_cause(cause);
                        return Some((Err(err), state));
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!("Skipping unparseable stream event: {}", e),
                }
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => state.pending.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
                None => return None,
            }
        }
    })
    .boxed()
}

fn decode_snapshot(text: &str) -> Option<serde_json::Value> {
    let doc = partial_json::complete(text)?;
    serde_json::from_str(&doc).ok()
}

fn api_error(status: StatusCode, body: &str) -> BackendError {
    let top = BackendError::new(
        "http",
        i64::from(status.as_u16()),
        format!("API error: HTTP {}", status),
    );
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => top.with_cause(BackendError::new(
            envelope.error.kind,
            i64::from(status.as_u16()),
            envelope.error.message,
        )),
        Err(_) if !body.trim().is_empty() => top.with_cause(BackendError::new(
            "http",
            i64::from(status.as_u16()),
            body.trim(),
        )),
        Err(_) => top,
    }
}

/// Mirrors a transport error's source chain as nested causes.
fn transport_error(error: &reqwest::Error) -> BackendError {
    let code = error.status().map(|s| i64::from(s.as_u16())).unwrap_or(-1);
    let mut top = BackendError::new("transport", code, error.to_string());
    if let Some(source) = std::error::Error::source(error) {
        top = top.with_cause(chain(source));
    }
    top
}

fn chain(error: &(dyn std::error::Error + 'static)) -> BackendError {
    let node = BackendError {
        domain: Some("transport".to_string()),
        description: Some(error.to_string()),
        ..BackendError::default()
    };
    match error.source() {
        Some(next) => node.with_cause(chain(next)),
        None => node,
    }
}
