//! Concrete `TextProvider`s: OpenAI-compatible chat completions, Anthropic messages,
//! and a deterministic mock for tests and offline runs.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ai::{Generation, GenerationRequest, TextProvider, TokenUsage};
use crate::error::ProviderError;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Keep at most this much of an error body in `ProviderError::Status`.
const MAX_ERROR_BODY: usize = 300;

async fn error_status(resp: reqwest::Response) -> ProviderError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    ProviderError::Status {
        status,
        body: body.chars().take(MAX_ERROR_BODY).collect(),
    }
}

fn non_empty(text: String) -> Result<String, ProviderError> {
    if text.trim().is_empty() {
        Err(ProviderError::Empty)
    } else {
        Ok(text)
    }
}

// ------------------------------------------------------------
// OpenAI-compatible
// ------------------------------------------------------------

/// Any `/chat/completions` endpoint: OpenAI, OpenRouter, Groq, local gateways.
pub struct OpenAiCompatProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiCompatProvider {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            base_url: OPENAI_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }
}

#[derive(Serialize)]
struct ChatMsg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatReq<'a> {
    model: &'a str,
    messages: Vec<ChatMsg<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResp {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMsg,
}

#[derive(Deserialize)]
struct ChatChoiceMsg {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

fn parse_chat_response(body: &str) -> Result<Generation, ProviderError> {
    let resp: ChatResp =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;
    let text = resp
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();
    let usage = resp
        .usage
        .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
        .unwrap_or_default();
    Ok(Generation {
        text: non_empty(text)?,
        usage,
    })
}

#[async_trait]
impl TextProvider for OpenAiCompatProvider {
    async fn generate(
        &self,
        model: &str,
        req: &GenerationRequest,
    ) -> Result<Generation, ProviderError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(sys) = req.preamble.as_deref() {
            messages.push(ChatMsg {
                role: "system",
                content: sys,
            });
        }
        messages.push(ChatMsg {
            role: "user",
            content: &req.prompt,
        });
        let body = ChatReq {
            model,
            messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url);
        debug!(%model, %url, "chat completion request");
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(error_status(resp).await);
        }
        let text = resp.text().await?;
        parse_chat_response(&text)
    }

    fn kind(&self) -> &'static str {
        "openai"
    }
}

// ------------------------------------------------------------
// Anthropic
// ------------------------------------------------------------

pub struct AnthropicProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            base_url: ANTHROPIC_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    fn headers(&self) -> Result<HeaderMap, ProviderError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&self.api_key)
            .map_err(|e| ProviderError::Malformed(format!("api key header: {e}")))?;
        headers.insert("x-api-key", key);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[derive(Serialize)]
struct MessagesReq<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<ChatMsg<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct MessagesResp {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

fn parse_messages_response(body: &str) -> Result<Generation, ProviderError> {
    let resp: MessagesResp =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;
    let text: String = resp
        .content
        .into_iter()
        .filter(|b| b.kind == "text")
        .filter_map(|b| b.text)
        .collect::<Vec<_>>()
        .join("");
    let usage = resp
        .usage
        .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens))
        .unwrap_or_default();
    Ok(Generation {
        text: non_empty(text)?,
        usage,
    })
}

#[async_trait]
impl TextProvider for AnthropicProvider {
    async fn generate(
        &self,
        model: &str,
        req: &GenerationRequest,
    ) -> Result<Generation, ProviderError> {
        let body = MessagesReq {
            model,
            system: req.preamble.as_deref(),
            messages: vec![ChatMsg {
                role: "user",
                content: &req.prompt,
            }],
            temperature: req.temperature,
            max_tokens: req.max_tokens,
        };
        let url = format!("{}/messages", self.base_url);
        debug!(%model, %url, "messages request");
        let resp = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(error_status(resp).await);
        }
        let text = resp.text().await?;
        parse_messages_response(&text)
    }

    fn kind(&self) -> &'static str {
        "anthropic"
    }
}

// ------------------------------------------------------------
// Mock
// ------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum MockReply {
    /// `"[mock] "` followed by the first line of the prompt.
    Echo,
    Fixed(String),
    /// Answer every call with this HTTP status.
    Fail(u16),
    Empty,
}

/// Deterministic provider; counts calls so tests can tell whether the network was hit.
pub struct MockProvider {
    reply: MockReply,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(reply: MockReply) -> Self {
        Self {
            reply,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn echo() -> Self {
        Self::new(MockReply::Echo)
    }

    pub fn fixed(text: impl Into<String>) -> Self {
        Self::new(MockReply::Fixed(text.into()))
    }

    pub fn failing(status: u16) -> Self {
        Self::new(MockReply::Fail(status))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextProvider for MockProvider {
    async fn generate(
        &self,
        _model: &str,
        req: &GenerationRequest,
    ) -> Result<Generation, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = match &self.reply {
            MockReply::Echo => {
                let first = req.prompt.lines().next().unwrap_or_default();
                format!("[mock] {first}")
            }
            MockReply::Fixed(t) => t.clone(),
            MockReply::Fail(status) => {
                return Err(ProviderError::Status {
                    status: *status,
                    body: "mock failure".into(),
                })
            }
            MockReply::Empty => String::new(),
        };
        let text = non_empty(text)?;
        let output = u32::try_from(text.chars().count().div_ceil(4)).unwrap_or(u32::MAX);
        Ok(Generation {
            text,
            usage: TokenUsage::new(req.estimated_input_tokens(), output),
        })
    }

    fn kind(&self) -> &'static str {
        "mock"
    }
}
