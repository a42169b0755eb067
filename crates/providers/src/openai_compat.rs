//! OpenAI-compatible client implementation.
//!
//! Works with: OpenAI, OpenRouter, Groq, Ollama, vLLM, LM Studio,
//! and any endpoint exposing `/chat/completions` with SSE streaming.
//!
//! Code reaches us one of two ways:
//! - through an `execute` function call, when the model supports functions;
//! - as a fenced markdown block inside the prose, otherwise.

use std::collections::BTreeMap;

use async_trait::async_trait;
use codeloop_config::LlmConfig;
use codeloop_core::error::ProviderError;
use codeloop_core::message::{Role, Turn, TurnType, FORMAT_OUTPUT};
use codeloop_core::provider::{ChunkStream, LlmChunk, LlmClient, Usage};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::fence::FenceSplitter;

/// Name of the single function offered to function-calling models.
pub const EXECUTE_FUNCTION: &str = "execute";

/// An OpenAI-compatible streaming chat client.
pub struct OpenAiCompatClient {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    supports_vision: bool,
    supports_functions: bool,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    /// Create a new client for `model` at `base_url`.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_default();

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.0,
            max_tokens: None,
            supports_vision: false,
            supports_functions: true,
            client,
        }
    }

    /// Build a client from the `[llm]` config section.
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut client = Self::new(
            backend_name(&config.api_base),
            &config.api_base,
            config.api_key.clone().unwrap_or_default(),
            &config.model,
        );
        client.temperature = config.temperature;
        client.max_tokens = config.max_tokens;
        client.supports_vision = config.supports_vision;
        client.supports_functions = config.supports_functions;
        client
    }

    pub fn with_functions(mut self, enabled: bool) -> Self {
        self.supports_functions = enabled;
        self
    }

    /// Convert turns to OpenAI API messages.
    ///
    /// Code turns are rendered as fenced blocks in assistant messages and
    /// console output goes back as a user message, which every backend
    /// accepts regardless of its function-calling support.
    fn to_api_messages(turns: &[Turn]) -> Vec<ApiMessage> {
        let mut messages: Vec<ApiMessage> = Vec::with_capacity(turns.len());

        for turn in turns {
            let (role, content) = match (turn.role, turn.kind) {
                (Role::System, _) => ("system", turn.text().to_string()),
                (Role::User, _) => ("user", turn.text().to_string()),
                (Role::Assistant, TurnType::Code) => (
                    "assistant",
                    format!("```{}\n{}\n```", turn.format().unwrap_or_default(), turn.text()),
                ),
                (Role::Assistant, _) => ("assistant", turn.text().to_string()),
                (Role::Computer, TurnType::Console) if turn.format() == Some(FORMAT_OUTPUT) => {
                    ("user", turn.text().to_string())
                }
                // Confirmations and active-line markers are presentation only
                (Role::Computer, _) => continue,
            };

            // Streamed console output arrives as many turns; fold it into one
            if role == "user" && turn.role == Role::Computer {
                if let Some(prev) = messages.last_mut().filter(|m| m.is_console) {
                    prev.content.get_or_insert_with(String::new).push_str(&content);
                    continue;
                }
                messages.push(ApiMessage {
                    role: role.into(),
                    content: Some(content),
                    is_console: true,
                });
                continue;
            }

            messages.push(ApiMessage {
                role: role.into(),
                content: Some(content),
                is_console: false,
            });
        }

        for message in messages.iter_mut().filter(|m| m.is_console) {
            let output = message.content.take().unwrap_or_default();
            message.content = Some(if output.trim().is_empty() {
                "The code above was executed on my machine. It produced no text output.".into()
            } else {
                format!("The code above was executed on my machine. It produced this output:\n\n{output}")
            });
        }

        messages
    }

    /// The `execute` function definition.
    fn execute_tool() -> ApiToolDefinition {
        ApiToolDefinition {
            r#type: "function".into(),
            function: ApiToolFunction {
                name: EXECUTE_FUNCTION.into(),
                description: "Executes code on the user's machine in the users local environment and returns the output".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "language": {
                            "type": "string",
                            "description": "The programming language (required parameter to the `execute` function)"
                        },
                        "code": {
                            "type": "string",
                            "description": "The code to execute (required)"
                        }
                    },
                    "required": ["language", "code"]
                }),
            },
        }
    }

    fn request_body(&self, turns: &[Turn]) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": Self::to_api_messages(turns),
            "temperature": self.temperature,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if self.supports_functions {
            body["tools"] = serde_json::json!([Self::execute_tool()]);
        }

        body
    }
}

/// A short backend label derived from the API base URL.
fn backend_name(api_base: &str) -> &'static str {
    if api_base.contains("openrouter.ai") {
        "openrouter"
    } else if api_base.contains("groq.com") {
        "groq"
    } else if api_base.contains("localhost") || api_base.contains("127.0.0.1") {
        "local"
    } else {
        "openai"
    }
}

/// Map a non-success HTTP status to a provider error.
fn status_error(status: u16, body: String) -> ProviderError {
    match status {
        401 => ProviderError::AuthenticationFailed(body),
        403 => ProviderError::AccessDenied(body),
        404 => ProviderError::ModelNotFound(body),
        429 => ProviderError::RateLimited { message: body },
        _ => ProviderError::ApiError {
            status_code: status,
            message: body,
        },
    }
}

fn estimate_tokens(text_len: usize) -> u32 {
    u32::try_from(text_len / 4).unwrap_or(u32::MAX)
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn set_model(&mut self, model: &str) {
        self.model = model.to_string();
    }

    fn supports_vision(&self) -> bool {
        self.supports_vision
    }

    async fn run(&self, turns: &[Turn]) -> std::result::Result<ChunkStream, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(turns);

        debug!(provider = %self.name, model = %self.model, turns = turns.len(), "Sending streaming request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider streaming error");
            return Err(status_error(status, error_body));
        }

        let prompt_len: usize = turns.iter().map(|t| t.text().len()).sum();
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Spawn task to read the SSE byte stream and parse chunks
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut state = StreamState::new(prompt_len);

            'read: while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer.drain(..=line_end);

                    // Skip empty lines and SSE comments
                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        break 'read;
                    }

                    match serde_json::from_str::<StreamResponse>(data) {
                        Ok(event) => {
                            for chunk in state.on_event(event) {
                                if tx.send(Ok(chunk)).await.is_err() {
                                    return; // receiver dropped
                                }
                            }
                            // A closed code block ends the reply; it is about to be run
                            if state.finished_block() {
                                debug!("Code block closed, ending stream early");
                                break 'read;
                            }
                        }
                        Err(e) => {
                            trace!(
                                provider = %provider_name,
                                data = %data,
                                error = %e,
                                "Ignoring unparseable SSE chunk"
                            );
                        }
                    }
                }
            }

            for chunk in state.finish() {
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }
}

/// Accumulates one streamed reply and turns it into chunks.
struct StreamState {
    splitter: FenceSplitter,
    calls: BTreeMap<u32, ToolCallAccumulator>,
    usage: Option<Usage>,
    prompt_len: usize,
    completion_len: usize,
}

impl StreamState {
    fn new(prompt_len: usize) -> Self {
        Self {
            splitter: FenceSplitter::new(),
            calls: BTreeMap::new(),
            usage: None,
            prompt_len,
            completion_len: 0,
        }
    }

    fn finished_block(&self) -> bool {
        self.splitter.finished_block()
    }

    fn on_event(&mut self, event: StreamResponse) -> Vec<LlmChunk> {
        let mut chunks = Vec::new();

        if let Some(usage) = event.usage {
            self.usage = Some(Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            });
        }

        let Some(choice) = event.choices.into_iter().next() else {
            return chunks;
        };

        for delta in choice.delta.tool_calls.unwrap_or_default() {
            let acc = self.calls.entry(delta.index).or_default();
            if let Some(function) = delta.function {
                if let Some(name) = function.name {
                    acc.name = name;
                }
                if let Some(args) = function.arguments {
                    self.completion_len += args.len();
                    acc.arguments.push_str(&args);
                }
            }
        }

        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            self.completion_len += content.len();
            chunks.extend(self.splitter.feed(&content));
        }

        chunks
    }

    fn finish(&mut self) -> Vec<LlmChunk> {
        let mut chunks = self.splitter.finish();

        // Only the first call is run; the loop executes one block per turn
        if let Some(call) = self.calls.values().next() {
            chunks.push(call.to_code_chunk());
        }

        let usage = self.usage.unwrap_or_else(|| {
            let prompt_tokens = estimate_tokens(self.prompt_len);
            let completion_tokens = estimate_tokens(self.completion_len);
            Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens.saturating_add(completion_tokens),
            }
        });
        chunks.push(LlmChunk::Usage { usage });
        chunks
    }
}

/// Accumulates incremental tool call deltas into a complete call.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    /// The code chunk this call asks for.
    ///
    /// Well-formed `{language, code}` arguments are unpacked. A call named
    /// after a language carries raw code. Anything else is passed through
    /// untouched for the normalizer to repair.
    fn to_code_chunk(&self) -> LlmChunk {
        if let Ok(args) = serde_json::from_str::<ExecuteArgs>(&self.arguments) {
            return LlmChunk::code(args.language, args.code);
        }
        if !self.name.is_empty() && self.name != EXECUTE_FUNCTION {
            return LlmChunk::code(&self.name, &self.arguments);
        }
        LlmChunk::code("", &self.arguments)
    }
}

#[derive(Debug, Deserialize)]
struct ExecuteArgs {
    language: String,
    code: String,
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip)]
    is_console: bool,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta; arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
