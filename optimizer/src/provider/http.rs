//! HTTP adapters for model invocation and catalog listing (reqwest).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::wire::{build_request_body, extract_text};
use super::{InvocationRequest, InvocationResponse, ModelInvoker, ProviderError, ProviderFamily};
use crate::catalog::{CatalogSource, ModelSummary};

/// Connection settings for the model gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL, e.g. `https://bedrock-runtime.us-east-1.amazonaws.com`
    pub base_url: String,
    /// Optional bearer token
    pub api_key: Option<String>,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: None,
            timeout_ms: 30_000,
        }
    }
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

fn build_client(config: &GatewayConfig) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(config.timeout())
        .build()
        .map_err(|e| ProviderError::Request(format!("failed to create HTTP client: {}", e)))
}

fn map_send_error(e: reqwest::Error, timeout: Duration) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        ProviderError::Request(e.to_string())
    }
}

fn is_throttling_body(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("throttlingexception") || lower.contains("too many requests")
}

/// Invokes models through `POST {base}/model/{id}/invoke`.
#[derive(Debug, Clone)]
pub struct HttpInvoker {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl HttpInvoker {
    pub fn new(config: GatewayConfig) -> Result<Self, ProviderError> {
        let client = build_client(&config)?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl ModelInvoker for HttpInvoker {
    async fn invoke(
        &self,
        model_id: &str,
        request: &InvocationRequest,
    ) -> Result<InvocationResponse, ProviderError> {
        let family = ProviderFamily::detect(model_id)
            .ok_or_else(|| ProviderError::UnknownFamily(model_id.to_string()))?;
        let start = Instant::now();

        let mut call = self
            .client
            .post(self.config.url(&format!("model/{}/invoke", model_id)))
            .json(&build_request_body(family, request));
        if let Some(key) = &self.config.api_key {
            call = call.bearer_auth(key);
        }

        let response = call
            .send()
            .await
            .map_err(|e| map_send_error(e, self.config.timeout()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || is_throttling_body(&body) {
                return Err(ProviderError::Throttled(body));
            }
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        Ok(InvocationResponse {
            model_id: model_id.to_string(),
            text: extract_text(family, &json)?,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListingBody {
    Envelope {
        #[serde(rename = "modelSummaries")]
        model_summaries: Vec<ModelSummary>,
    },
    Bare(Vec<ModelSummary>),
}

impl ListingBody {
    fn into_summaries(self) -> Vec<ModelSummary> {
        match self {
            Self::Envelope { model_summaries } => model_summaries,
            Self::Bare(summaries) => summaries,
        }
    }
}

/// Parse a listing body, either `{"modelSummaries": [...]}` or a bare array.
pub fn parse_listing(body: &str) -> Result<Vec<ModelSummary>, ProviderError> {
    serde_json::from_str::<ListingBody>(body)
        .map(ListingBody::into_summaries)
        .map_err(|e| ProviderError::Decode(e.to_string()))
}

/// Reads the live model listing from `GET {base}/foundation-models`.
#[derive(Debug, Clone)]
pub struct HttpCatalogSource {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl HttpCatalogSource {
    pub fn new(config: GatewayConfig) -> Result<Self, ProviderError> {
        let client = build_client(&config)?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl CatalogSource for HttpCatalogSource {
    async fn list_models(&self) -> Result<Vec<ModelSummary>, ProviderError> {
        let mut call = self.client.get(self.config.url("foundation-models"));
        if let Some(key) = &self.config.api_key {
            call = call.bearer_auth(key);
        }
        let response = call
            .send()
            .await
            .map_err(|e| map_send_error(e, self.config.timeout()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }
        parse_listing(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let config = GatewayConfig {
            base_url: "https://gateway.local/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.url("model/amazon.nova-lite-v1:0/invoke"),
            "https://gateway.local/model/amazon.nova-lite-v1:0/invoke"
        );
    }

    #[test]
    fn test_parse_envelope_listing() {
        let body = r#"{"modelSummaries":[{"modelId":"amazon.nova-pro-v1:0","modelName":"Nova Pro","providerName":"Amazon","outputModalities":["TEXT"],"responseStreamingSupported":true}]}"#;
        let summaries = parse_listing(body).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].model_id, "amazon.nova-pro-v1:0");
        assert_eq!(summaries[0].provider, "Amazon");
    }

    #[test]
    fn test_parse_bare_listing() {
        let body = r#"[{"modelId":"meta.llama3-1-8b-instruct-v1:0","provider":"Meta","modalities":["TEXT"],"streamingSupported":false}]"#;
        let summaries = parse_listing(body).unwrap();
        assert_eq!(summaries[0].provider, "Meta");
        assert!(!summaries[0].streaming_supported);
    }

    #[test]
    fn test_parse_garbage_listing() {
        assert!(matches!(parse_listing("{\"oops\": 1}"), Err(ProviderError::Decode(_))));
    }

    #[test]
    fn test_throttling_body_detection() {
        assert!(is_throttling_body("{\"__type\":\"ThrottlingException\"}"));
        assert!(!is_throttling_body("{\"message\":\"access denied\"}"));
    }

    #[tokio::test]
    async fn test_unknown_family_is_rejected_before_sending() {
        let invoker = HttpInvoker::new(GatewayConfig::default()).unwrap();
        let err = invoker
            .invoke("stability.sd3-large-v1:0", &InvocationRequest::probe())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownFamily(_)));
    }
}
