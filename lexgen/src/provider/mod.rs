//! Provider client adapter.
//!
//! A [`ProviderClient`] turns a model id and a [`PromptContext`] into a [`GeneratedSample`], or a
//! [`ProviderError`] whose [`ErrorKind`] tells the fallback policy what to do next. Each client
//! speaks one wire protocol; [`ProviderSet`] routes a model to the client that serves it.

pub mod classify;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod prompt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;

use crate::config::{Config, ProviderKind};
use crate::types::{GeneratedSample, TokenUsage};

pub use mock::{MockProviderClient, MockResponse};
pub use ollama::OllamaClient;
pub use openai::OpenAiCompatibleClient;
pub use prompt::PromptContext;

/// Normalized classification of a failed generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Quota or 429-style throttling
    RateLimited,
    /// The model is retired, unknown, or not served by any provider
    ModelUnavailable,
    /// Network trouble, 5xx, or a completion that did not contain a usable sample
    Transient,
    /// Auth failure or a response that is not a valid API envelope
    Fatal,
}

/// A classified provider failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn model_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ModelUnavailable, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }
}

/// A successful generation call.
#[derive(Debug, Clone)]
pub struct Generation {
    pub sample: GeneratedSample,
    /// Token usage, when the provider reports it
    pub usage: Option<TokenUsage>,
}

/// Uniform call interface over heterogeneous LLM providers.
///
/// Implementations make one network call per `generate` and never touch batch state.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Provider name, used as the sample id prefix
    fn name(&self) -> &str;

    /// Model identifiers this client accepts
    fn models(&self) -> &[String];

    /// Generate one sample with `model`.
    async fn generate(&self, model: &str, context: &PromptContext) -> Result<Generation, ProviderError>;
}

/// Build a reqwest client with the process-wide rustls provider installed.
pub(crate) fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    // Already installed is fine
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    Ok(reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout)
        .build()?)
}

/// Routes each model id to the client that serves it.
#[derive(Clone, Default)]
pub struct ProviderSet {
    clients: Vec<Arc<dyn ProviderClient>>,
}

impl ProviderSet {
    pub fn new(clients: Vec<Arc<dyn ProviderClient>>) -> Self {
        Self { clients }
    }

    /// Build one client per configured provider.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut clients: Vec<Arc<dyn ProviderClient>> = Vec::with_capacity(config.providers.len());
        for (name, provider) in &config.providers {
            let client: Arc<dyn ProviderClient> = match provider.kind {
                ProviderKind::OpenaiCompatible => Arc::new(OpenAiCompatibleClient::new(name, provider)?),
                ProviderKind::Ollama => Arc::new(OllamaClient::new(name, provider)?),
            };
            tracing::info!(provider = %name, models = provider.models.len(), kind = ?provider.kind, "Registered provider");
            clients.push(client);
        }
        Ok(Self { clients })
    }

    pub fn client_for(&self, model: &str) -> Option<&Arc<dyn ProviderClient>> {
        self.clients.iter().find(|c| c.models().iter().any(|m| m == model))
    }

    pub fn serves(&self, model: &str) -> bool {
        self.client_for(model).is_some()
    }

    pub fn clients(&self) -> &[Arc<dyn ProviderClient>] {
        &self.clients
    }

    /// Generate with whichever client serves `model`; an unserved model is `ModelUnavailable`.
    pub async fn generate(&self, model: &str, context: &PromptContext) -> Result<Generation, ProviderError> {
        match self.client_for(model) {
            Some(client) => client.generate(model, context).await,
            None => Err(ProviderError::model_unavailable(format!("no provider serves model '{model}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{SAMPLE_TYPES, TOPICS};

    fn context() -> PromptContext {
        PromptContext::new(TOPICS[0], &SAMPLE_TYPES[0], None, None)
    }

    #[tokio::test]
    async fn routes_to_serving_client() {
        let groq = MockProviderClient::new("groq", &["llama-3.3-70b-versatile"]);
        let ollama = MockProviderClient::new("ollama", &["gpt-oss:120b"]);
        let set = ProviderSet::new(vec![Arc::new(groq.clone()), Arc::new(ollama.clone())]);

        let generation = set.generate("gpt-oss:120b", &context()).await.unwrap();
        assert_eq!(generation.sample.provider, "ollama");
        assert!(generation.sample.id.starts_with("ollama_"));
        assert_eq!(ollama.calls().len(), 1);
        assert!(groq.calls().is_empty());
    }

    #[tokio::test]
    async fn unserved_model_is_unavailable() {
        let set = ProviderSet::new(vec![Arc::new(MockProviderClient::new("groq", &["a"]))]);
        let err = set.generate("b", &context()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ModelUnavailable);
    }
}
