use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::Config;
use crate::StageError;

/// Thin client for an OpenAI-compatible hosted API, shared by the hosted
/// summarize, blog, and podcast backends.
pub struct HostedClient {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    timeout_secs: u64,
    pub model: String,
    pub speech_model: String,
    pub speech_voice: String,
}

impl HostedClient {
    pub fn new(config: &Config, timeout: Duration) -> crate::Result<Self> {
        let api_key = config
            .hosted_api_key()
            .ok_or_else(|| anyhow::anyhow!("{} is not set", config.hosted.api_key_env))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            api_base: config.hosted.api_base.trim_end_matches('/').to_string(),
            api_key,
            timeout_secs: timeout.as_secs(),
            model: config.hosted.model.clone(),
            speech_model: config.hosted.speech_model.clone(),
            speech_voice: config.hosted.speech_voice.clone(),
        })
    }

    /// One chat-completion round trip, returning the assistant text.
    pub async fn chat(
        &self,
        system: &str,
        user: &str,
        max_tokens: usize,
    ) -> Result<String, StageError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "max_tokens": max_tokens,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout_secs))?;

        let response = check_status(response)?;

        let value: Value = response
            .json()
            .await
            .map_err(|e| StageError::DecodeError(format!("malformed API response: {}", e)))?;

        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                StageError::DecodeError("API response contains no completion text".to_string())
            })?;

        Ok(content)
    }

    /// Synthesize speech for `input`, returning raw audio bytes.
    pub async fn speech(&self, input: &str) -> Result<Vec<u8>, StageError> {
        let body = json!({
            "model": self.speech_model,
            "voice": self.speech_voice,
            "input": input,
            "response_format": "wav",
        });

        let response = self
            .client
            .post(format!("{}/audio/speech", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(e, self.timeout_secs))?;

        let response = check_status(response)?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| StageError::NetworkError(format!("failed reading audio body: {}", e)))?;

        if bytes.is_empty() {
            return Err(StageError::SynthesisError(
                "API returned empty audio".to_string(),
            ));
        }

        Ok(bytes.to_vec())
    }
}

fn request_error(err: reqwest::Error, timeout_secs: u64) -> StageError {
    if err.is_timeout() {
        StageError::Timeout(timeout_secs)
    } else if err.is_connect() {
        StageError::BackendUnavailable(format!("cannot reach API: {}", err))
    } else {
        StageError::NetworkError(err.to_string())
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = format!("API returned HTTP {}", status);
    match status {
        StatusCode::TOO_MANY_REQUESTS => Err(StageError::QuotaExceeded(message)),
        s if s.is_server_error() => Err(StageError::BackendUnavailable(message)),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(StageError::BackendUnavailable(message))
        }
        _ => Err(StageError::NetworkError(message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FailureKind;

    #[tokio::test]
    async fn test_client_timeout_maps_to_timeout_kind() {
        // A server that accepts connections but never responds, so the
        // request stalls until the client-side timer fires.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut open = Vec::new();
            loop {
                if let Ok((socket, _)) = listener.accept().await {
                    open.push(socket);
                }
            }
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        let err = client
            .get(format!("http://{}/", addr))
            .send()
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        let mapped = request_error(err, 50);
        assert_eq!(mapped.kind(), FailureKind::Timeout);
    }

    #[tokio::test]
    async fn test_connection_refused_maps_to_backend_unavailable() {
        // Bind then drop to get a port nothing is listening on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = reqwest::Client::new();
        let err = client
            .get(format!("http://{}/", addr))
            .send()
            .await
            .unwrap_err();

        let mapped = request_error(err, 600);
        assert_eq!(mapped.kind(), FailureKind::BackendUnavailable);
    }
}
