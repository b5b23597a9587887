//! OpenAI-compatible chat completion client.
//!
//! Answers and summaries stream from `POST /v1/chat/completions` with
//! `stream: true`. The response body is server-sent events: each
//! `data: {json}` line carries a `choices[0].delta.content` fragment and
//! `data: [DONE]` ends the stream. Malformed event lines are logged and
//! skipped; a body that ends with a partial line is an upstream error.

use std::time::Duration;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use base64::Engine;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use docrag_core::llm::{ImageCaptioner, LanguageModel, TokenStream};
use docrag_core::{RagError, Result};

use crate::config::{CaptioningConfig, LlmConfig};
use crate::http::RetryingClient;
use crate::retry::RetryPolicy;

const SERVICE: &str = "llm";

/// One parsed server-sent event line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    Token(String),
    Done,
    /// Blank, comment, non-data or content-free line.
    Skip,
}

/// Parse one line of a chat-completions event stream.
pub fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<Value>(data) {
        Ok(json) => match json["choices"][0]["delta"]["content"].as_str() {
            Some(text) if !text.is_empty() => SseLine::Token(text.to_string()),
            _ => SseLine::Skip,
        },
        Err(e) => {
            warn!(error = %e, data = %data, "skipping malformed stream event");
            SseLine::Skip
        }
    }
}

/// Keep at most `max_chars` characters of `prompt`.
pub fn truncate_prompt(prompt: &str, max_chars: usize) -> &str {
    match prompt.char_indices().nth(max_chars) {
        Some((i, _)) => &prompt[..i],
        None => prompt,
    }
}

pub struct OpenAiChatClient {
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: f32,
    max_prompt_chars: usize,
    http: RetryingClient,
}

impl OpenAiChatClient {
    pub fn new(config: &LlmConfig) -> AnyResult<Self> {
        let http = RetryingClient::new(
            SERVICE,
            Duration::from_secs(config.timeout_secs),
            RetryPolicy::new(config.max_retries),
        )?;
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty()),
            max_tokens: config.max_tokens,
            temperature: config.temperature.unwrap_or(0.0),
            max_prompt_chars: config.max_prompt_chars,
            http,
        })
    }

    fn request(&self, client: &reqwest::Client, path: &str) -> reqwest::RequestBuilder {
        let req = client.post(format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    fn chat_body(&self, prompt: &str, stream: bool) -> Value {
        json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": truncate_prompt(prompt, self.max_prompt_chars) }],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "top_p": 1.0,
            "stream": stream,
        })
    }

    /// `GET /v1/models` reachability check.
    pub async fn health(&self) -> Result<()> {
        let url = format!("{}/v1/models", self.base_url);
        self.http
            .send_ok(|c| match &self.api_key {
                Some(key) => c.get(&url).bearer_auth(key),
                None => c.get(&url),
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatClient {
    async fn stream(&self, prompt: &str) -> Result<TokenStream> {
        let body = self.chat_body(prompt, true);
        debug!(prompt_chars = prompt.chars().count(), "calling chat completions");
        let response = self
            .http
            .send(|c| self.request(c, "/v1/chat/completions").json(&body))
            .await
            .map_err(|e| RagError::UpstreamLlm(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RagError::UpstreamLlm(format!(
                "API returned status {}: {}",
                status, text
            )));
        }
        Ok(sse_tokens(response.bytes_stream()))
    }
}

/// Turn a raw SSE byte stream into content tokens.
pub fn sse_tokens<S, B, E>(bytes: S) -> TokenStream
where
    S: futures::Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut bytes = Box::pin(bytes);
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    yield Err(RagError::UpstreamLlm(format!("stream interrupted: {}", e)));
                    return;
                }
            };
            buffer.extend_from_slice(chunk.as_ref());
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                match parse_sse_line(&String::from_utf8_lossy(&line)) {
                    SseLine::Token(t) => yield Ok(t),
                    SseLine::Done => return,
                    SseLine::Skip => {}
                }
            }
        }
        let rest = String::from_utf8_lossy(&buffer);
        if !rest.trim().is_empty() {
            yield Err(RagError::UpstreamLlm(format!("incomplete response data: {}", rest.trim())));
        }
    })
}

/// Vision captioning through the same chat completions endpoint.
pub struct OpenAiCaptioner {
    client: OpenAiChatClient,
    model: String,
    prompt: String,
    max_tokens: u32,
}

impl OpenAiCaptioner {
    pub fn new(llm: &LlmConfig, captioning: &CaptioningConfig) -> AnyResult<Self> {
        Ok(Self {
            client: OpenAiChatClient::new(llm)?,
            model: captioning.model.clone().unwrap_or_else(|| llm.model.clone()),
            prompt: captioning.prompt.clone(),
            max_tokens: captioning.max_tokens,
        })
    }
}

pub fn data_uri(bytes: &[u8], mime: &str) -> String {
    format!(
        "data:{};base64,{}",
        mime,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

#[async_trait]
impl ImageCaptioner for OpenAiCaptioner {
    async fn caption(&self, bytes: &[u8], mime: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": self.prompt },
                    { "type": "image_url", "image_url": { "url": data_uri(bytes, mime) } }
                ]
            }],
            "max_tokens": self.max_tokens,
            "temperature": 0,
            "stream": false,
        });
        let response = self
            .client
            .http
            .json(|c| self.client.request(c, "/v1/chat/completions").json(&body))
            .await
            .map_err(|e| RagError::UpstreamLlm(format!("captioning failed: {}", e)))?;
        let caption = response["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .trim()
            .to_string();
        if caption.is_empty() {
            return Err(RagError::UpstreamLlm("empty caption".into()));
        }
        Ok(caption)
    }
}
