// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Whisper transcription client (multipart audio upload -> text).
//!
//! Size and duration caps are enforced before any upload so oversized
//! voice notes never reach the provider.

use std::time::Duration;

use botfleet_core::FleetError;
use serde::Deserialize;
use tracing::debug;

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Whisper HTTP client.
#[derive(Debug, Clone)]
pub struct WhisperClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_duration_secs: u32,
    max_size_bytes: usize,
}

impl WhisperClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout_secs: u64,
        max_duration_secs: u32,
        max_size_mb: u32,
    ) -> Result<Self, FleetError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| FleetError::Config(format!("failed to build whisper http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_duration_secs,
            max_size_bytes: max_size_mb as usize * 1024 * 1024,
        })
    }

    /// Validates the caps without uploading. Used by the audio task to
    /// reject oversized notes with a typed error.
    pub fn check_limits(&self, duration_secs: u32, size_bytes: usize) -> Result<(), FleetError> {
        if duration_secs > self.max_duration_secs {
            return Err(FleetError::Validation(format!(
                "audio duration {duration_secs}s above limit {}s",
                self.max_duration_secs
            )));
        }
        if size_bytes > self.max_size_bytes {
            return Err(FleetError::Validation(format!(
                "audio size {size_bytes}B above limit {}B",
                self.max_size_bytes
            )));
        }
        Ok(())
    }

    /// Uploads audio bytes and returns the transcription text.
    pub async fn transcribe(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
    ) -> Result<String, FleetError> {
        let size = bytes.len();
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("audio/ogg")
            .map_err(|e| FleetError::Internal(format!("multipart build failed: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .part("file", part);

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FleetError::Timeout {
                        duration: Duration::from_secs(0),
                    }
                } else {
                    FleetError::TransientExternal {
                        service: "whisper",
                        message: format!("http request failed: {e}"),
                    }
                }
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        debug!(status = %status, size, "whisper response");

        if status.is_success() {
            let parsed: TranscriptionResponse =
                serde_json::from_str(&body).map_err(|e| FleetError::PermanentExternal {
                    service: "whisper",
                    message: format!("malformed transcription response: {e}"),
                })?;
            return Ok(parsed.text);
        }
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(FleetError::TransientExternal {
                service: "whisper",
                message: format!("status {status}: {body}"),
            });
        }
        Err(FleetError::PermanentExternal {
            service: "whisper",
            message: format!("status {status}: {body}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base: &str) -> WhisperClient {
        WhisperClient::new(base, "wh-key", "whisper-1", 30, 300, 20).unwrap()
    }

    #[tokio::test]
    async fn transcribe_returns_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"text": "quero o curso premium"})),
            )
            .mount(&server)
            .await;

        let text = client(&server.uri())
            .transcribe(vec![0u8; 128], "voice.ogg")
            .await
            .unwrap();
        assert_eq!(text, "quero o curso premium");
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .transcribe(vec![0u8; 128], "voice.ogg")
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::TransientExternal { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn client_errors_are_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .transcribe(vec![0u8; 128], "voice.ogg")
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::PermanentExternal { .. }), "got {err:?}");
    }

    #[test]
    fn limits_are_enforced_before_upload() {
        let c = client("http://unused");
        assert!(c.check_limits(300, 1024).is_ok());
        assert!(c.check_limits(301, 1024).is_err());
        assert!(c.check_limits(10, 21 * 1024 * 1024).is_err());
    }
}
