use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use super::{ChatMessage, ChatModel, ChatOutput, ResponseMetadata, TokenUsage};
use crate::config::LlmConfig;
use crate::errors::{Error, Result};

/// OpenAI-compatible `chat/completions` client.
pub struct OpenAiChatModel {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

/// Makes sure a url has a trailing slash so `join` appends instead of replacing the last segment.
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let path = format!("{}/", new_url.path());
        new_url.set_path(&path);
        new_url
    }
}

impl OpenAiChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let endpoint = ensure_slash(&config.base_url)
            .join("chat/completions")
            .map_err(|e| Error::Internal {
                operation: format!("build chat completions URL from {}: {e}", config.base_url),
            })?;

        Ok(Self {
            client: crate::http::client(config.request_timeout)?,
            endpoint,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<i64>,
    completion_tokens: Option<i64>,
}

impl From<CompletionResponse> for ChatOutput {
    fn from(response: CompletionResponse) -> Self {
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        ChatOutput {
            content,
            response_metadata: ResponseMetadata {
                token_usage: response.usage.map(|usage| TokenUsage {
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: usage.completion_tokens,
                }),
                model_name: response.model.filter(|name| !name.is_empty()),
            },
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    #[instrument(skip(self, messages), fields(model = %self.model), err)]
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<ChatOutput> {
        let body = CompletionRequest {
            model: &self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            messages,
        };

        let mut request = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| Error::Llm {
            message: e.to_string(),
            status: e.status().map(|s| s.as_u16()),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Llm {
                message: format!("{status}: {body}"),
                status: Some(status.as_u16()),
            });
        }

        let body_text = response.text().await.map_err(|e| Error::Llm {
            message: format!("reading response body: {e}"),
            status: Some(status.as_u16()),
        })?;
        debug!(bytes = body_text.len(), "Chat completion received");

        let parsed: CompletionResponse = serde_json::from_str(&body_text).map_err(|e| Error::Llm {
            message: format!("decoding completion response: {e}"),
            status: Some(status.as_u16()),
        })?;

        Ok(parsed.into())
    }
}
