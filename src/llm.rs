use crate::config::{ApiDialect, Config};
use crate::error::{ChatError, Result};
use crate::thread::Role;
use anyhow::anyhow;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, error};

const EVENT_BUFFER: usize = 1000;
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Events emitted during LLM streaming
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmEvent {
    /// Text fragment from the streaming response
    TextDelta(String),
    /// Stream finished without error
    StreamComplete,
    /// Stream failed; nothing else follows
    Error(String),
}

/// One prior turn of context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    pub text: String,
}

/// Request to send to LLM
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system_instruction: String,
    /// Earlier messages of the thread, oldest first
    pub history: Vec<ChatTurn>,
    /// The newly submitted user text
    pub prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl LlmRequest {
    pub fn new(system_instruction: impl Into<String>, history: Vec<ChatTurn>, prompt: impl Into<String>) -> Self {
        Self {
            system_instruction: system_instruction.into(),
            history,
            prompt: prompt.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, tokens: Option<u32>) -> Self {
        self.max_tokens = tokens;
        self
    }

    /// History followed by the prompt as a final user turn
    pub fn turns(&self) -> impl Iterator<Item = (Role, &str)> {
        self.history
            .iter()
            .map(|turn| (turn.role, turn.text.as_str()))
            .chain(std::iter::once((Role::User, self.prompt.as_str())))
    }
}

/// A model that turns prior turns into a lazy, ordered sequence of text fragments.
///
/// The returned channel yields any number of [`LlmEvent::TextDelta`] followed by exactly
/// one [`LlmEvent::StreamComplete`] or [`LlmEvent::Error`].
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn stream_chat(&self, request: LlmRequest) -> Result<mpsc::Receiver<LlmEvent>>;
}

/// Environment lookup used to find an API key that is not in the config file
pub type EnvLookup = fn(&str) -> Option<String>;

fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// LLM client for streaming responses over HTTP
#[derive(Clone)]
pub struct LlmClient {
    config: Config,
    client: reqwest::Client,
    env_lookup: EnvLookup,
}

impl LlmClient {
    /// `request_timeout_secs` bounds connecting and each silent gap in the stream,
    /// never the length of a reply that keeps arriving
    pub fn new(config: Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(|e| ChatError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            env_lookup: process_env,
        })
    }

    /// Replace the process environment as the fallback source of API keys
    pub fn with_env_lookup(mut self, lookup: EnvLookup) -> Self {
        self.env_lookup = lookup;
        self
    }

    fn api_key(&self) -> Option<String> {
        self.config.resolve_api_key(self.env_lookup)
    }

    /// Stream from the configured provider
    async fn stream_from_provider(
        client: reqwest::Client,
        config: Config,
        api_key: String,
        request: LlmRequest,
        tx: mpsc::Sender<LlmEvent>,
    ) -> anyhow::Result<()> {
        let dialect = config.provider.dialect();
        let builder = match dialect {
            ApiDialect::Gemini => {
                let url = format!(
                    "{}/models/{}:streamGenerateContent?alt=sse",
                    config.base_url(),
                    config.model()
                );
                client
                    .post(url)
                    .header("x-goog-api-key", api_key)
                    .json(&gemini_payload(&request))
            }
            ApiDialect::OpenAiCompatible => {
                let url = format!("{}/chat/completions", config.base_url());
                client
                    .post(url)
                    .header("Authorization", format!("Bearer {}", api_key))
                    .header("HTTP-Referer", "https://github.com/lumina-ai/lumina")
                    .header("X-Title", "Lumina")
                    .json(&openai_payload(config.model(), &request))
            }
            ApiDialect::Anthropic => {
                let url = format!("{}/messages", config.base_url());
                client
                    .post(url)
                    .header("x-api-key", api_key)
                    .header("anthropic-version", "2023-06-01")
                    .json(&anthropic_payload(config.model(), &request))
            }
        };

        let idle = config.request_timeout();
        let response = tokio::time::timeout(idle, builder.send())
            .await
            .map_err(|_| anyhow!("no response within {}s", idle.as_secs()))??;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "{} API error ({}): {}",
                config.provider,
                status,
                error_text
            ));
        }

        let extract: fn(&Value) -> std::result::Result<Option<String>, String> = match dialect {
            ApiDialect::Gemini => extract_gemini,
            ApiDialect::OpenAiCompatible => extract_openai,
            ApiDialect::Anthropic => extract_anthropic,
        };
        Self::process_sse_stream(response, extract, idle, tx).await
    }

    /// Forward every text fragment of a Server-Sent Events body.
    ///
    /// Fails when no bytes arrive for `idle`.
    async fn process_sse_stream(
        response: reqwest::Response,
        extract: fn(&Value) -> std::result::Result<Option<String>, String>,
        idle: Duration,
        tx: mpsc::Sender<LlmEvent>,
    ) -> anyhow::Result<()> {
        let mut stream = response.bytes_stream();
        let mut buffer = SseBuffer::default();

        loop {
            let next = tokio::time::timeout(idle, stream.next())
                .await
                .map_err(|_| anyhow!("stream stalled: no data for {}s", idle.as_secs()))?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;
            for data in buffer.push(&chunk) {
                if forward_payload(&data, extract, &tx).await? {
                    return Ok(());
                }
            }
        }

        // Flush any remaining buffer line (without newline)
        if let Some(data) = buffer.finish() {
            if forward_payload(&data, extract, &tx).await? {
                return Ok(());
            }
        }

        let _ = tx.send(LlmEvent::StreamComplete).await;
        Ok(())
    }
}

#[async_trait]
impl ChatBackend for LlmClient {
    async fn stream_chat(&self, request: LlmRequest) -> Result<mpsc::Receiver<LlmEvent>> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        // Check if we have an API key configured
        let Some(api_key) = self.api_key() else {
            let _ = tx
                .send(LlmEvent::Error(
                    "No API key configured. Set api_key in config.toml or LUMINA_API_KEY.".to_string(),
                ))
                .await;
            return Ok(rx);
        };

        debug!(
            provider = %self.config.provider,
            model = self.config.model(),
            turns = request.history.len() + 1,
            "starting model stream"
        );

        let client = self.client.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            let tx_err = tx.clone();
            if let Err(e) = Self::stream_from_provider(client, config, api_key, request, tx).await {
                error!(error = %e, "model stream failed");
                let _ = tx_err.send(LlmEvent::Error(e.to_string())).await;
            }
        });

        Ok(rx)
    }
}

/// Handle one SSE data payload; returns true once the stream has reached its end marker
async fn forward_payload(
    data: &str,
    extract: fn(&Value) -> std::result::Result<Option<String>, String>,
    tx: &mpsc::Sender<LlmEvent>,
) -> anyhow::Result<bool> {
    if data == "[DONE]" {
        let _ = tx.send(LlmEvent::StreamComplete).await;
        return Ok(true);
    }

    let Ok(chunk) = serde_json::from_str::<Value>(data) else {
        debug!(data, "skipping non-JSON stream payload");
        return Ok(false);
    };

    match extract(&chunk) {
        Ok(Some(text)) if !text.is_empty() => {
            if tx.send(LlmEvent::TextDelta(text)).await.is_err() {
                // Receiver gone; nobody is listening any more.
                return Ok(true);
            }
            Ok(false)
        }
        Ok(_) => Ok(false),
        Err(message) => Err(anyhow!(message)),
    }
}

/// Splits a byte stream into SSE `data:` payloads.
///
/// Bytes are buffered until a full line arrives, so multi-byte characters split
/// across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    /// Feed a chunk, returning the payloads of all lines it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(newline_pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline_pos).collect();
            if let Some(data) = data_payload(&line) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Payload of a trailing line that never got its newline
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.pending);
        data_payload(&line)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    line.strip_prefix("data:").map(|data| data.trim_start().to_string())
}

fn gemini_payload(request: &LlmRequest) -> Value {
    let contents: Vec<Value> = request
        .turns()
        .map(|(role, text)| {
            json!({
                "role": gemini_role(role),
                "parts": [{ "text": text }]
            })
        })
        .collect();

    let mut payload = json!({ "contents": contents });
    if !request.system_instruction.is_empty() {
        payload["systemInstruction"] = json!({
            "parts": [{ "text": request.system_instruction }]
        });
    }

    let mut generation = serde_json::Map::new();
    if let Some(temperature) = request.temperature {
        generation.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(max_tokens) = request.max_tokens {
        generation.insert("maxOutputTokens".to_string(), json!(max_tokens));
    }
    if !generation.is_empty() {
        payload["generationConfig"] = Value::Object(generation);
    }
    payload
}

fn openai_payload(model: &str, request: &LlmRequest) -> Value {
    let mut messages = Vec::new();
    if !request.system_instruction.is_empty() {
        messages.push(json!({ "role": "system", "content": request.system_instruction }));
    }
    messages.extend(
        request
            .turns()
            .map(|(role, text)| json!({ "role": role.as_str(), "content": text })),
    );

    let mut payload = json!({
        "model": model,
        "messages": messages,
        "stream": true,
    });
    if let Some(temperature) = request.temperature {
        payload["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = request.max_tokens {
        payload["max_tokens"] = json!(max_tokens);
    }
    payload
}

fn anthropic_payload(model: &str, request: &LlmRequest) -> Value {
    let messages: Vec<Value> = request
        .turns()
        .map(|(role, text)| json!({ "role": role.as_str(), "content": text }))
        .collect();

    let mut payload = json!({
        "model": model,
        "messages": messages,
        "stream": true,
        "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
    });
    if !request.system_instruction.is_empty() {
        payload["system"] = json!(request.system_instruction);
    }
    if let Some(temperature) = request.temperature {
        payload["temperature"] = json!(temperature);
    }
    payload
}

/// Gemini calls the assistant side "model"
fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

fn error_message(chunk: &Value) -> Option<String> {
    let error = chunk.get("error")?;
    Some(
        error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
    )
}

fn extract_gemini(chunk: &Value) -> std::result::Result<Option<String>, String> {
    if let Some(message) = error_message(chunk) {
        return Err(message);
    }

    let parts = chunk
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array());

    Ok(parts.map(|parts| {
        parts
            .iter()
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .collect::<String>()
    }))
}

fn extract_openai(chunk: &Value) -> std::result::Result<Option<String>, String> {
    if let Some(message) = error_message(chunk) {
        return Err(message);
    }

    Ok(chunk
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string))
}

fn extract_anthropic(chunk: &Value) -> std::result::Result<Option<String>, String> {
    match chunk.get("type").and_then(|t| t.as_str()) {
        Some("error") => Err(error_message(chunk).unwrap_or_else(|| "unknown error".to_string())),
        Some("content_block_delta") => Ok(chunk
            .get("delta")
            .and_then(|d| d.get("text"))
            .and_then(|t| t.as_str())
            .map(str::to_string)),
        _ => Ok(None),
    }
}
