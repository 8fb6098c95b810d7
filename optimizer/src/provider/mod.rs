//! Provider model invocation: families, wire formats and HTTP adapters.
//!
//! Each provider family speaks its own request/response JSON. The
//! optimizer never performs real inference for callers; it only needs the
//! wire formats to send minimal availability probes and to hand the
//! execution layer a correctly shaped body.
//!
//! ```text
//! Family   | Request highlights                                   | Response text
//! ---------|------------------------------------------------------|---------------------------
//! Claude   | anthropic_version, max_tokens, temperature, system?  | content[0].text
//! Nova     | inferenceConfig{maxTokens,temperature,topP?}         | output.message.content[0].text
//! Titan    | inputText, textGenerationConfig{maxTokenCount,...}   | results[0].outputText
//! Llama    | prompt, max_gen_len, temperature, top_p?             | generation
//! Mistral  | prompt, max_tokens, temperature, top_p?              | outputs[0].text
//! Cohere   | prompt, max_tokens, temperature, p?                  | generations[0].text
//! AI21     | prompt, maxTokens, temperature, topP?                | completions[0].data.text
//! ```

pub mod http;
pub mod wire;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use http::{GatewayConfig, HttpCatalogSource, HttpInvoker};
pub use wire::{build_request_body, extract_text};

/// Errors from provider calls.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Throttled by provider: {0}")]
    Throttled(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Response has no text at {path}")]
    MissingField { path: &'static str },

    #[error("Response decode error: {0}")]
    Decode(String),

    #[error("Unknown provider family for model {0}")]
    UnknownFamily(String),
}

/// Provider families with distinct wire formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFamily {
    Claude,
    Nova,
    Titan,
    Llama,
    Mistral,
    Cohere,
    Ai21,
}

impl ProviderFamily {
    /// Detect the family from a model id such as `anthropic.claude-3-haiku-20240307-v1:0`
    /// or a cross-region id such as `us.meta.llama3-2-3b-instruct-v1:0`.
    pub fn detect(model_id: &str) -> Option<Self> {
        let id = model_id.to_ascii_lowercase();
        let id = ["us.", "eu.", "apac.", "global."]
            .iter()
            .find_map(|prefix| id.strip_prefix(prefix))
            .unwrap_or(&id);

        if id.starts_with("anthropic.") || id.starts_with("claude") {
            Some(Self::Claude)
        } else if id.starts_with("amazon.nova") {
            Some(Self::Nova)
        } else if id.starts_with("amazon.titan") {
            Some(Self::Titan)
        } else if id.starts_with("meta.") || id.starts_with("llama") {
            Some(Self::Llama)
        } else if id.starts_with("mistral.") {
            Some(Self::Mistral)
        } else if id.starts_with("cohere.") {
            Some(Self::Cohere)
        } else if id.starts_with("ai21.") {
            Some(Self::Ai21)
        } else {
            None
        }
    }

    /// Provider name as it appears in catalog listings.
    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::Claude => "Anthropic",
            Self::Nova | Self::Titan => "Amazon",
            Self::Llama => "Meta",
            Self::Mistral => "Mistral AI",
            Self::Cohere => "Cohere",
            Self::Ai21 => "AI21 Labs",
        }
    }
}

impl std::fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Claude => write!(f, "claude"),
            Self::Nova => write!(f, "nova"),
            Self::Titan => write!(f, "titan"),
            Self::Llama => write!(f, "llama"),
            Self::Mistral => write!(f, "mistral"),
            Self::Cohere => write!(f, "cohere"),
            Self::Ai21 => write!(f, "ai21"),
        }
    }
}

/// Family-neutral invocation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: Option<f64>,
}

impl InvocationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            max_tokens: 512,
            temperature: 0.7,
            top_p: None,
        }
    }

    /// The smallest request that proves an endpoint answers.
    pub fn probe() -> Self {
        Self {
            prompt: "ping".to_string(),
            system: None,
            max_tokens: 1,
            temperature: 0.0,
            top_p: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }
}

/// Text produced by a model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub model_id: String,
    pub text: String,
    pub latency_ms: u64,
}

/// Anything that can run a model by id.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(
        &self,
        model_id: &str,
        request: &InvocationRequest,
    ) -> Result<InvocationResponse, ProviderError>;
}
