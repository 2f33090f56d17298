//! Listing fetcher — asks a chat-completion service for today's index
//! constituents and returns the generated text verbatim.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sp500_core::config::OpenAiConfig;

use crate::error::FetchError;

/// Fixed instruction sent to the generation service.
pub const LISTING_PROMPT: &str =
    "List all current S&P 500 companies with their ticker symbols and market cap as of today.";

/// Source of the current constituent listing.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// One bounded call to the external service. Never retried here.
    async fn fetch_current_listing(&self) -> Result<String, FetchError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// [`Fetcher`] backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiFetcher {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
}

impl OpenAiFetcher {
    /// Build a fetcher. A missing API key is reported on the first fetch so
    /// the read-only surfaces can run without one.
    pub fn new(config: &OpenAiConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout: config.timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else if err.is_decode() {
            FetchError::MalformedResponse(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl Fetcher for OpenAiFetcher {
    async fn fetch_current_listing(&self) -> Result<String, FetchError> {
        let api_key = self.api_key.as_deref().ok_or(FetchError::MissingApiKey)?;

        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: LISTING_PROMPT,
            }],
        };

        tracing::debug!(endpoint = %self.endpoint, model = %self.model, "requesting listing");
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                status = status.as_u16(),
                body = %body_excerpt(&body),
                "listing request rejected"
            );
            return Err(FetchError::Upstream {
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| self.classify(e))?;
        let parsed: ChatResponse = serde_json::from_slice(&bytes)
            .map_err(|e| FetchError::MalformedResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::MalformedResponse("response has no choices".into()))?
            .message
            .content
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| FetchError::MalformedResponse("response has no content".into()))?;

        tracing::debug!(bytes = content.len(), "listing received");
        Ok(content)
    }
}

/// First [`BODY_EXCERPT_LEN`] characters of an error body, for logs only.
fn body_excerpt(body: &str) -> &str {
    match body.char_indices().nth(BODY_EXCERPT_LEN) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

const BODY_EXCERPT_LEN: usize = 200;
