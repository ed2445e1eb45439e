//! Generative inference collaborator.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;
use variantflow_shared::{InferenceConfig, Result, VariantFlowError};

/// A text-in, text-out inference service asked for JSON output.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// OpenAI-compatible chat completions client (OpenRouter by default).
#[derive(Debug, Clone)]
pub struct ChatCompletionsClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_output_tokens: u32,
}

impl ChatCompletionsClient {
    /// `None` when no API key is configured; synthesis then uses the
    /// deterministic fallback.
    pub fn from_config(config: &InferenceConfig) -> Result<Option<Self>> {
        let Some(api_key) = config.api_key() else {
            return Ok(None);
        };
        Self::new(config, api_key).map(Some)
    }

    pub fn new(config: &InferenceConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VariantFlowError::config(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        })
    }
}

#[async_trait]
impl InferenceClient for ChatCompletionsClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let payload = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.temperature,
            "max_tokens": self.max_output_tokens,
            "response_format": {"type": "json_object"},
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| VariantFlowError::Inference(format!("request failed: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| VariantFlowError::Inference(format!("reading response: {e}")))?;
        if !status.is_success() {
            return Err(VariantFlowError::Inference(format!(
                "inference service returned {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| VariantFlowError::parse(format!("inference response: {e}")))?;
        let text = completion_text(&value).ok_or_else(|| {
            VariantFlowError::Inference("response had no choices[0].message.content".into())
        })?;

        debug!(chars = text.len(), "inference response");
        Ok(text)
    }
}

fn completion_text(value: &Value) -> Option<String> {
    let message = value.get("choices")?.as_array()?.first()?.get("message")?;
    match message.get("content")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Array(blocks) => {
            let joined = blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            (!joined.is_empty()).then_some(joined)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: String) -> InferenceConfig {
        InferenceConfig {
            base_url,
            model: "test/model".into(),
            ..InferenceConfig::default()
        }
    }

    #[tokio::test]
    async fn posts_chat_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "test/model",
                "response_format": {"type": "json_object"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "  {\"ok\": true}  "}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            ChatCompletionsClient::new(&config(format!("{}/api/v1/", server.uri())), "sk-test")
                .unwrap();
        assert_eq!(client.generate("hi").await.unwrap(), "{\"ok\": true}");
    }

    #[tokio::test]
    async fn http_error_is_inference_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let client = ChatCompletionsClient::new(&config(server.uri()), "k").unwrap();
        let err = client.generate("hi").await.unwrap_err();
        assert!(matches!(err, VariantFlowError::Inference(ref m) if m.contains("429")));
        assert!(err.is_transient());
    }

    #[test]
    fn content_blocks_are_joined() {
        let v = json!({"choices": [{"message": {"content": [{"text": "a"}, {"text": " b "}]}}]});
        assert_eq!(completion_text(&v).as_deref(), Some("a\nb"));
        assert_eq!(completion_text(&json!({"choices": []})), None);
    }

    #[test]
    fn missing_key_means_no_client() {
        let cfg = InferenceConfig {
            api_key_env: "VF_TEST_UNSET_INFERENCE_KEY".into(),
            ..InferenceConfig::default()
        };
        assert!(ChatCompletionsClient::from_config(&cfg).unwrap().is_none());
    }
}
