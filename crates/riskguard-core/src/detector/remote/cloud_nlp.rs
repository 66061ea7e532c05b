//! OpenAI-compatible chat completion provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::analysis::{user_input, LlmAnalysis, ANALYSIS_PROMPT};
use super::SignalProvider;
use crate::config::RemoteServiceConfig;
use crate::error::RemoteError;
use crate::model::{CheckContext, RiskItem};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: String,
}

/// Hosted LLM provider using the chat completions API.
///
/// `url` is the API base (defaults to the OpenAI endpoint); the probe lists
/// models.
#[derive(Debug, Clone)]
pub struct CloudNlpProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    threshold: f32,
    probe_timeout: std::time::Duration,
}

impl CloudNlpProvider {
    pub fn new(config: &RemoteServiceConfig) -> Result<Self, RemoteError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| RemoteError::Config("cloud NLP API key cannot be empty".into()))?;

        let base_url = if config.url.is_empty() {
            DEFAULT_BASE_URL.to_string()
        } else {
            config.url.trim_end_matches('/').to_string()
        };

        let client = reqwest::Client::builder()
            .user_agent(concat!("riskguard/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key,
            model: config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            threshold: config.threshold,
            probe_timeout: config.probe_timeout(),
        })
    }
}

#[async_trait]
impl SignalProvider for CloudNlpProvider {
    async fn probe(&self) -> Result<(), RemoteError> {
        self.client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.probe_timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn analyze(&self, ctx: &CheckContext) -> Result<Vec<RiskItem>, RemoteError> {
        let input = user_input(ctx);
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: ANALYSIS_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &input,
                },
            ],
            temperature: 0.1,
            max_tokens: 500,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| RemoteError::InvalidResponse("no choices in completion".into()))?;

        Ok(LlmAnalysis::parse(&content)?.into_risks(self.threshold, ctx))
    }

    fn name(&self) -> &'static str {
        "cloud_nlp"
    }
}
