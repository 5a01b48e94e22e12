//! Client for the Ollama chat API (local daemon or ollama.com).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use super::{Generation, PromptContext, ProviderClient, ProviderError, classify, prompt};
use crate::config::ProviderConfig;
use crate::types::TokenUsage;

pub struct OllamaClient {
    name: String,
    base_url: Url,
    api_key: Option<String>,
    models: Vec<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

impl OllamaClient {
    pub fn new(name: &str, config: &ProviderConfig) -> anyhow::Result<Self> {
        Ok(Self {
            name: name.to_string(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            models: config.models.clone(),
            client: super::http_client(config.timeout)?,
        })
    }
}

#[async_trait]
impl ProviderClient for OllamaClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> &[String] {
        &self.models
    }

    #[tracing::instrument(skip(self, context), fields(provider = %self.name, topic = %context.topic.topic))]
    async fn generate(&self, model: &str, context: &PromptContext) -> Result<Generation, ProviderError> {
        let url = format!("{}/chat", self.base_url.as_str().trim_end_matches('/'));
        let payload = json!({
            "model": model,
            "stream": false,
            "messages": [
                {"role": "system", "content": context.system_prompt()},
                {"role": "user", "content": context.user_prompt()},
            ],
            "options": {"temperature": 0.7},
        });

        let mut request = self.client.post(url).json(&payload);
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

        let chat: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::fatal(format!("{} returned an unreadable chat response: {e}", self.name)))?;
        let sample = prompt::parse_sample(&chat.message.content, context, &self.name, model)?;

        let usage = match (chat.prompt_eval_count, chat.eval_count) {
            (None, None) => None,
            (prompt_tokens, completion_tokens) => {
                let prompt_tokens = prompt_tokens.unwrap_or(0);
                let completion_tokens = completion_tokens.unwrap_or(0);
                Some(TokenUsage {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens: prompt_tokens.saturating_add(completion_tokens),
                })
            }
        };

        Ok(Generation { sample, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{SAMPLE_TYPES, TOPICS};
    use crate::config::ProviderKind;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn sums_eval_counts_into_usage() {
        let server = MockServer::start().await;
        let content = r#"{"question": "Q?", "answer": "A.", "reasoning": "R.", "case_citation": "Donoghue v Stevenson [1932]"}"#;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({"model": "gpt-oss:120b", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {"role": "assistant", "content": content},
                "prompt_eval_count": 150,
                "eval_count": 650,
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = ProviderConfig {
            kind: ProviderKind::Ollama,
            base_url: Url::parse(&format!("{}/api", server.uri())).unwrap(),
            api_key: None,
            timeout: Duration::from_secs(5),
            models: vec!["gpt-oss:120b".to_string()],
        };
        let client = OllamaClient::new("ollama", &config).unwrap();
        let context = PromptContext::new(TOPICS[5], &SAMPLE_TYPES[2], None, None);

        let generation = client.generate("gpt-oss:120b", &context).await.unwrap();

        assert!(generation.sample.id.starts_with("ollama_"));
        assert_eq!(generation.sample.sample_type, "client_interaction");
        assert_eq!(generation.usage.map(|u| u.total_tokens), Some(800));
    }
}
