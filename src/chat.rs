//! Chat relay to a local LLM server.
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint (llama.cpp's
//! server by default). The reply text is what gets spoken.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::ChatConfig;
use crate::error::TtsError;

#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Send one user message, return the assistant's reply.
    async fn chat(&self, message: &str) -> Result<String, TtsError>;
}

pub struct LlamaChatClient {
    config: ChatConfig,
    client: Client,
}

impl LlamaChatClient {
    pub fn new(config: &ChatConfig) -> Result<Self, TtsError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TtsError::Chat(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            config: config.clone(),
            client,
        })
    }
}

#[async_trait]
impl ChatCompletion for LlamaChatClient {
    async fn chat(&self, message: &str) -> Result<String, TtsError> {
        let t_start = Instant::now();

        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": self.config.system_prompt},
                {"role": "user", "content": message}
            ]
        });

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        debug!("Sending chat request to {url}");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    TtsError::Chat(format!("Cannot connect to chat server at {}", self.config.base_url))
                } else if e.is_timeout() {
                    TtsError::Chat("Chat request timed out".into())
                } else {
                    TtsError::Chat(format!("Chat request failed: {e}"))
                }
            })?;

        if !resp.status().is_success() {
            return Err(TtsError::Chat(format!("Chat server returned status {}", resp.status())));
        }

        let data: Value = resp
            .json()
            .await
            .map_err(|e| TtsError::Chat(format!("Failed to parse chat response: {e}")))?;
        let reply = extract_reply(&data)?;

        let latency_ms = t_start.elapsed().as_secs_f64() * 1000.0;
        info!("Chat reply: {} chars ({latency_ms:.0}ms)", reply.len());
        Ok(reply)
    }
}

/// Pull `choices[0].message.content` out of a completion response.
fn extract_reply(data: &Value) -> Result<String, TtsError> {
    let reply = data["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or("")
        .trim()
        .to_string();
    if reply.is_empty() {
        Err(TtsError::Chat("Chat server returned an empty reply".into()))
    } else {
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_reply() {
        let data = json!({
            "choices": [{"message": {"role": "assistant", "content": "  Why did the neutron... \n"}}]
        });
        assert_eq!(extract_reply(&data).unwrap(), "Why did the neutron...");
    }

    #[test]
    fn test_extract_reply_empty() {
        assert!(extract_reply(&json!({"choices": []})).is_err());
        assert!(extract_reply(&json!({"choices": [{"message": {"content": "   "}}]})).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let config = ChatConfig {
            base_url: "http://127.0.0.1:9/v1".into(),
            timeout_secs: 2,
            ..Default::default()
        };
        let client = LlamaChatClient::new(&config).unwrap();
        assert!(matches!(client.chat("hello").await, Err(TtsError::Chat(_))));
    }
}
