//! Plan generators.
//!
//! `PlanGenerator` is the seam between the orchestrator and whatever produces
//! plan text. `OpenAiGenerator` talks to any OpenAI-compatible chat endpoint;
//! `StubGenerator` replays canned responses for tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ForgeError;

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub timeout_seconds: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            model: "gpt-4o-mini".to_string(),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            base_url: None,
            max_tokens: Some(4096),
            timeout_seconds: Some(60),
        }
    }
}

/// Produces plan text for a prompt at a given sampling temperature.
#[async_trait]
pub trait PlanGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, temperature: f64) -> Result<String, ForgeError>;
}

/// OpenAI-compatible provider (works with OpenAI and OpenRouter).
pub struct OpenAiGenerator {
    config: GeneratorConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f64,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl OpenAiGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self, ForgeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.unwrap_or(60)))
            .build()
            .map_err(|e| ForgeError::Generator(format!("failed to create HTTP client: {e}")))?;
        Ok(OpenAiGenerator { config, client })
    }
}

#[async_trait]
impl PlanGenerator for OpenAiGenerator {
    async fn generate(&self, prompt: &str, temperature: f64) -> Result<String, ForgeError> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| ForgeError::Generator("API key required".to_string()))?;
        let base_url = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1");
        let url = format!("{base_url}/chat/completions");

        let body = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: self.config.max_tokens,
            temperature,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ForgeError::Generator(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ForgeError::Generator(format!(
                "API request failed: {error_text}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ForgeError::Generator(format!("failed to parse response: {e}")))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ForgeError::Generator("response had no choices".to_string()))?;
        Ok(choice.message.content)
    }
}

/// Replays a fixed sequence of responses. Each call consumes one; running out
/// is an error so tests notice unexpected extra attempts.
pub struct StubGenerator {
    responses: Mutex<VecDeque<String>>,
}

impl StubGenerator {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StubGenerator {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl PlanGenerator for StubGenerator {
    async fn generate(&self, _prompt: &str, _temperature: f64) -> Result<String, ForgeError> {
        let mut queue = self
            .responses
            .lock()
            .map_err(|_| ForgeError::Generator("stub lock poisoned".to_string()))?;
        queue
            .pop_front()
            .ok_or_else(|| ForgeError::Generator("stub generator exhausted".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_replays_in_order_then_errors() {
        let stub = StubGenerator::new(["one", "two"]);
        assert_eq!(stub.generate("p", 0.7).await.unwrap(), "one");
        assert_eq!(stub.generate("p", 0.4).await.unwrap(), "two");
        assert!(stub.generate("p", 0.15).await.is_err());
    }
}
