//! Document summarization through an OpenAI-compatible chat endpoint

use crate::config::SummarizerConfig;
use crate::error::{ModelError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Produces a short natural-language summary of a whole document.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `text`. Implementations return the cleaned summary; an
    /// empty summary is reported as [`ModelError::EmptyOutput`].
    async fn summarize(&self, text: &str) -> Result<String>;

    fn summarizer_name(&self) -> &str;
}

/// Build the summarization prompt for one document.
pub fn summary_prompt(text: &str) -> String {
    format!(
        "You are a financial analyst. Summarize the following document in a few \
         sentences. Mention the companies, tickers, periods and figures it covers \
         so the summary can be used to find this document later.\n\n\
         Document:\n{text}\n\nSummary:"
    )
}

/// Strip reasoning output and flatten the completion to a single line.
///
/// Anything up to and including the last `</think>` tag is dropped, newlines
/// become spaces and surrounding whitespace is trimmed.
pub fn clean_summary(raw: &str) -> String {
    let answer = match raw.rfind("</think>") {
        Some(pos) => &raw[pos + "</think>".len()..],
        None => raw,
    };
    answer
        .replace("\r\n", " ")
        .replace('\n', " ")
        .trim()
        .to_string()
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Summarizer backed by a chat-completions HTTP endpoint (llama.cpp, vLLM,
/// OpenAI and similar servers).
#[derive(Debug, Clone)]
pub struct ChatCompletionSummarizer {
    client: reqwest::Client,
    config: SummarizerConfig,
    api_key: Option<String>,
}

impl ChatCompletionSummarizer {
    pub fn new(config: SummarizerConfig) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(ModelError::invalid_config("summarizer endpoint is empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()?;
        let api_key = config.api_key();
        if config.api_key_env.is_some() && api_key.is_none() {
            tracing::warn!(
                "Summarizer API key variable {:?} is not set; sending unauthenticated requests",
                config.api_key_env
            );
        }

        Ok(Self {
            client,
            config,
            api_key,
        })
    }
}

#[async_trait]
impl Summarizer for ChatCompletionSummarizer {
    async fn summarize(&self, text: &str) -> Result<String> {
        let prompt = summary_prompt(text);
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: false,
        };

        let mut builder = self.client.post(&self.config.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Endpoint {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await?;
        let parsed: ChatResponse = serde_json::from_slice(&body)?;
        let raw = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        let summary = clean_summary(&raw);
        if summary.is_empty() {
            return Err(ModelError::EmptyOutput { what: "summary" });
        }

        tracing::debug!(
            "Summarized {} chars into {} chars",
            text.chars().count(),
            summary.chars().count()
        );
        Ok(summary)
    }

    fn summarizer_name(&self) -> &str {
        &self.config.model
    }
}
