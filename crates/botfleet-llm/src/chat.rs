// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chat-completions client (OpenAI-compatible wire format).
//!
//! Handles authentication, per-request timeout, transient retry on
//! 429/5xx, and usage extraction including cached prompt tokens.

use std::time::Duration;

use botfleet_core::{FleetError, TokenUsage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One turn in the request payload.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// Token accounting reported by the provider.
pub type Usage = TokenUsage;

/// Completion text plus measured usage.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub text: String,
    pub usage: Usage,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    content: String,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Deserialize, Default)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u32,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Chat-completions HTTP client.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_retries: u32,
}

impl ChatClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout_secs: u64,
    ) -> Result<Self, FleetError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| FleetError::Config(format!("failed to build LLM http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_retries: 1,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Sends a completion request and returns text plus usage.
    ///
    /// Retries once after a 1-second pause on 429/5xx.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f64,
        max_tokens: u32,
    ) -> Result<ChatOutcome, FleetError> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature,
            max_tokens,
        };
        let url = format!("{}/chat/completions", self.base_url);

        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                warn!(attempt, "retrying chat completion after transient error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }

            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        FleetError::Timeout {
                            duration: Duration::from_secs(0),
                        }
                    } else {
                        FleetError::TransientExternal {
                            service: "llm",
                            message: format!("http request failed: {e}"),
                        }
                    }
                })?;

            let status = response.status();
            debug!(status = %status, attempt, "chat completion response");

            if status.is_success() {
                let body = response.text().await.map_err(|e| FleetError::TransientExternal {
                    service: "llm",
                    message: format!("failed to read response body: {e}"),
                })?;
                let parsed: ChatResponse =
                    serde_json::from_str(&body).map_err(|e| FleetError::PermanentExternal {
                        service: "llm",
                        message: format!("malformed completion response: {e}"),
                    })?;
                let text = parsed
                    .choices
                    .into_iter()
                    .next()
                    .map(|c| c.message.content)
                    .ok_or_else(|| FleetError::PermanentExternal {
                        service: "llm",
                        message: "completion response had no choices".into(),
                    })?;
                let usage = parsed.usage.unwrap_or_default();
                return Ok(ChatOutcome {
                    text,
                    usage: Usage {
                        prompt_tokens: usage.prompt_tokens,
                        completion_tokens: usage.completion_tokens,
                        cached_tokens: usage
                            .prompt_tokens_details
                            .map(|d| d.cached_tokens)
                            .unwrap_or(0),
                    },
                });
            }

            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or_else(|_| format!("status {status}: {body}"));

            if is_transient(status.as_u16()) {
                if attempt < self.max_retries {
                    last_error = Some(FleetError::TransientExternal {
                        service: "llm",
                        message: message.clone(),
                    });
                    continue;
                }
                return Err(FleetError::TransientExternal {
                    service: "llm",
                    message,
                });
            }
            return Err(FleetError::PermanentExternal {
                service: "llm",
                message,
            });
        }

        Err(last_error.unwrap_or_else(|| FleetError::TransientExternal {
            service: "llm",
            message: "completion failed after retries".into(),
        }))
    }
}

fn is_transient(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base: &str) -> ChatClient {
        ChatClient::new(base, "test-key", "grok-4-fast-non-reasoning", 30).unwrap()
    }

    fn success_body(text: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "cmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": text}}],
            "usage": {
                "prompt_tokens": 120,
                "completion_tokens": 45,
                "prompt_tokens_details": {"cached_tokens": 80}
            }
        })
    }

    #[tokio::test]
    async fn complete_returns_text_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(success_body("Olá!")))
            .mount(&server)
            .await;

        let outcome = client(&server.uri())
            .complete(&[ChatMessage::user("oi")], 0.7, 2000)
            .await
            .unwrap();
        assert_eq!(outcome.text, "Olá!");
        assert_eq!(outcome.usage.prompt_tokens, 120);
        assert_eq!(outcome.usage.completion_tokens, 45);
        assert_eq!(outcome.usage.cached_tokens, 80);
    }

    #[tokio::test]
    async fn retries_once_on_429_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_json(serde_json::json!({"error": {"message": "rate limited"}})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(success_body("depois")))
            .mount(&server)
            .await;

        let outcome = client(&server.uri())
            .complete(&[ChatMessage::user("oi")], 0.7, 2000)
            .await
            .unwrap();
        assert_eq!(outcome.text, "depois");
    }

    #[tokio::test]
    async fn permanent_error_on_400() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"error": {"message": "bad model"}})),
            )
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .complete(&[ChatMessage::user("oi")], 0.7, 2000)
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::PermanentExternal { .. }), "got {err:?}");
        assert!(err.to_string().contains("bad model"));
    }

    #[tokio::test]
    async fn transient_error_after_exhausted_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(503)
                    .set_body_json(serde_json::json!({"error": {"message": "overloaded"}})),
            )
            .expect(2)
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .complete(&[ChatMessage::user("oi")], 0.7, 2000)
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::TransientExternal { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn missing_usage_defaults_to_zero() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "ok"}}]
            })))
            .mount(&server)
            .await;

        let outcome = client(&server.uri())
            .complete(&[ChatMessage::user("oi")], 0.7, 2000)
            .await
            .unwrap();
        assert_eq!(outcome.usage.prompt_tokens, 0);
        assert_eq!(outcome.usage.cached_tokens, 0);
    }
}
