//! Generic AI analysis service speaking the riskguard JSON contract.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use super::SignalProvider;
use crate::config::RemoteServiceConfig;
use crate::error::RemoteError;
use crate::model::{CheckContext, RiskItem, RiskType};

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    user_id: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    context: Vec<AnalyzeContextItem<'a>>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    extra_params: &'a HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct AnalyzeContextItem<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    user_id: &'a str,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    success: bool,
    #[serde(default)]
    risks: Vec<RemoteRisk>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteRisk {
    #[serde(rename = "type")]
    kind: String,
    score: f32,
    #[serde(default)]
    description: String,
    #[serde(default)]
    details: HashMap<String, String>,
}

/// Provider for a self-hosted analysis service.
///
/// Analysis is a POST to the configured URL; the probe is
/// `GET <origin>/health`.
#[derive(Debug, Clone)]
pub struct AiServiceProvider {
    client: reqwest::Client,
    endpoint: Url,
    health: Url,
    api_key: Option<String>,
    probe_timeout: std::time::Duration,
}

impl AiServiceProvider {
    pub fn new(config: &RemoteServiceConfig) -> Result<Self, RemoteError> {
        if config.url.is_empty() {
            return Err(RemoteError::Config("AI service URL cannot be empty".into()));
        }

        let endpoint =
            Url::parse(&config.url).map_err(|e| RemoteError::Config(e.to_string()))?;
        let health = endpoint
            .join("/health")
            .map_err(|e| RemoteError::Config(e.to_string()))?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("riskguard/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            endpoint,
            health,
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            probe_timeout: config.probe_timeout(),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl SignalProvider for AiServiceProvider {
    async fn probe(&self) -> Result<(), RemoteError> {
        self.authorize(self.client.get(self.health.clone()))
            .timeout(self.probe_timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn analyze(&self, ctx: &CheckContext) -> Result<Vec<RiskItem>, RemoteError> {
        let body = AnalyzeRequest {
            content: &ctx.content,
            user_id: &ctx.user_id,
            context: ctx
                .context_items
                .iter()
                .map(|item| AnalyzeContextItem {
                    content: &item.content,
                    user_id: &item.user_id,
                    timestamp: item.timestamp,
                })
                .collect(),
            extra_params: &ctx.extra_data,
        };

        let response = self
            .authorize(self.client.post(self.endpoint.clone()))
            .json(&body)
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

        let parsed: AnalyzeResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;

        if !parsed.success {
            return Err(RemoteError::Service(
                parsed
                    .error
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| "service failed without a specific error".into()),
            ));
        }

        Ok(parsed
            .risks
            .into_iter()
            .map(|risk| RiskItem {
                risk_type: RiskType::from_label(&risk.kind),
                score: risk.score,
                description: risk.description,
                details: risk.details,
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "ai_service"
    }
}
