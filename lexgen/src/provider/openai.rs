//! Client for OpenAI-compatible chat completion APIs (Groq, Cerebras, Mistral, ...).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use super::{Generation, PromptContext, ProviderClient, ProviderError, classify, prompt};
use crate::config::ProviderConfig;
use crate::types::TokenUsage;

pub struct OpenAiCompatibleClient {
    name: String,
    base_url: Url,
    api_key: Option<String>,
    models: Vec<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl OpenAiCompatibleClient {
    pub fn new(name: &str, config: &ProviderConfig) -> anyhow::Result<Self> {
        Ok(Self {
            name: name.to_string(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            models: config.models.clone(),
            client: super::http_client(config.timeout)?,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.as_str().trim_end_matches('/'))
    }
}

#[async_trait]
impl ProviderClient for OpenAiCompatibleClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> &[String] {
        &self.models
    }

    #[tracing::instrument(skip(self, context), fields(provider = %self.name, topic = %context.topic.topic))]
    async fn generate(&self, model: &str, context: &PromptContext) -> Result<Generation, ProviderError> {
        let payload = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": context.system_prompt()},
                {"role": "user", "content": context.user_prompt()},
            ],
            "temperature": 0.7,
        });

        let mut request = self.client.post(self.endpoint()).json(&payload);
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify::transport_error(&self.name, &e))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| classify::transport_error(&self.name, &e))?;

        if !(200..300).contains(&status) {
            let err = classify::http_error(&self.name, status, &body);
            tracing::warn!(status, kind = ?err.kind, "Provider call failed");
            return Err(err);
        }

        let completion: ChatCompletion = serde_json::from_str(&body)
            .map_err(|e| ProviderError::fatal(format!("{} returned an unreadable chat completion: {e}", self.name)))?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::fatal(format!("{} returned a completion without content", self.name)))?;

        let sample = prompt::parse_sample(&content, context, &self.name, model)?;
        let usage = completion.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens.max(u.prompt_tokens.saturating_add(u.completion_tokens)),
        });

        tracing::debug!(sample_id = %sample.id, tokens = ?usage.map(|u| u.total_tokens), "Generated sample");
        Ok(Generation { sample, usage })
    }
}
