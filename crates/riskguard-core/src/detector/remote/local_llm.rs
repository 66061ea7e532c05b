//! Locally hosted LLM provider (Ollama chat API).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::analysis::{user_input, LlmAnalysis, ANALYSIS_PROMPT};
use super::SignalProvider;
use crate::config::RemoteServiceConfig;
use crate::error::RemoteError;
use crate::model::{CheckContext, RiskItem};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ReplyMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: String,
}

/// Provider for a local model server.
///
/// `url` is the server base; a trailing `/api/chat` is tolerated.
#[derive(Debug, Clone)]
pub struct LocalLlmProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    threshold: f32,
    probe_timeout: std::time::Duration,
}

impl LocalLlmProvider {
    pub fn new(config: &RemoteServiceConfig) -> Result<Self, RemoteError> {
        let base_url = match config.url.trim_end_matches('/') {
            "" => DEFAULT_BASE_URL.to_string(),
            url => url.trim_end_matches("/api/chat").to_string(),
        };

        let client = reqwest::Client::builder()
            .user_agent(concat!("riskguard/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url,
            model: config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            threshold: config.threshold,
            probe_timeout: config.probe_timeout(),
        })
    }
}

#[async_trait]
impl SignalProvider for LocalLlmProvider {
    async fn probe(&self) -> Result<(), RemoteError> {
        self.client
            .get(format!("{}/api/tags", self.base_url))
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
            stream: false,
            options: ChatOptions {
                temperature: 0.1,
                num_predict: 2048,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
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

        if let Some(error) = reply.error.filter(|e| !e.is_empty()) {
            return Err(RemoteError::Service(error));
        }

        let content = reply
            .message
            .map(|m| m.content)
            .ok_or_else(|| RemoteError::InvalidResponse("reply carried no message".into()))?;

        Ok(LlmAnalysis::parse(&content)?.into_risks(self.threshold, ctx))
    }

    fn name(&self) -> &'static str {
        "local_llm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::remote::RemoteSignalDetector;
    use crate::detector::Detector;
    use crate::model::RiskType;
    use axum::{routing::get, routing::post, Json, Router};
    use serde_json::json;

    #[test]
    fn chat_suffix_stripped() {
        let provider =
            LocalLlmProvider::new(&RemoteServiceConfig::new("http://10.0.0.5:11434/api/chat"))
                .unwrap();
        assert_eq!(provider.base_url, "http://10.0.0.5:11434");

        let provider = LocalLlmProvider::new(&RemoteServiceConfig::default()).unwrap();
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
        assert_eq!(provider.model, DEFAULT_MODEL);
    }

    #[tokio::test]
    async fn fenced_reply_parsed() {
        let app = Router::new()
            .route("/api/tags", get(|| async { Json(json!({"models": []})) }))
            .route(
                "/api/chat",
                post(|| async {
                    Json(json!({
                        "model": "llama3",
                        "done": true,
                        "message": {
                            "role": "assistant",
                            "content": "```json\n{\"is_toxic\": true, \"risk_score\": 0.7, \"explanation\": \"rude\"}\n```"
                        }
                    }))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let provider =
            LocalLlmProvider::new(&RemoteServiceConfig::new(format!("http://{}", addr))).unwrap();
        let detector = RemoteSignalDetector::connect(provider, None).await;
        assert!(!detector.in_fallback());

        let risks = detector.detect(&CheckContext::new("rude text")).await.unwrap();
        assert_eq!(risks.len(), 1);
        assert_eq!(risks[0].risk_type, RiskType::Harassment);
        assert_eq!(risks[0].description, "rude");
    }

    #[tokio::test]
    async fn model_error_is_service_error() {
        let app = Router::new().route(
            "/api/chat",
            post(|| async { Json(json!({"error": "model not found"})) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let provider =
            LocalLlmProvider::new(&RemoteServiceConfig::new(format!("http://{}", addr))).unwrap();
        assert!(matches!(
            provider.analyze(&CheckContext::new("x")).await,
            Err(RemoteError::Service(_))
        ));
    }
}
