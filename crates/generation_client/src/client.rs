//! HTTP implementation of the generation backend.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::backend::{ChunkStream, GenerationBackend};
use crate::error::{GenerationError, Result};
use crate::request::GenerationRequest;

/// Streaming endpoint path, relative to the base URL.
const STREAM_PATH: &str = "/chat/stream";

pub struct HttpGenerationClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpGenerationClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

/// Structured error body: `{"error": {"code", "message", "details"}}`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: String,
    message: String,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

fn is_auth_expired(status: StatusCode) -> bool {
    // 419 is the non-standard "session expired" status the gateway uses
    status == StatusCode::UNAUTHORIZED || status.as_u16() == 419
}

#[async_trait]
impl GenerationBackend for HttpGenerationClient {
    async fn start_generation(&self, request: &GenerationRequest) -> Result<ChunkStream> {
        let url = format!("{}{}", self.base_url, STREAM_PATH);
        log::debug!(
            "Starting generation: mode={}, messages={}",
            request.mode,
            request.messages.len()
        );

        let mut builder = self.client.post(&url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        let response = builder.send().await?;

        let status = response.status();
        if is_auth_expired(status) {
            log::warn!("Generation request rejected: session expired (HTTP {status})");
            return Err(GenerationError::AuthExpired);
        }
        if !status.is_success() {
            let body = response.text().await?;
            if let Ok(parsed) = serde_json::from_str::<ErrorBody>(&body) {
                log::warn!(
                    "Generation API error {}: {}",
                    parsed.error.code,
                    parsed.error.message
                );
                return Err(GenerationError::Api {
                    code: parsed.error.code,
                    message: parsed.error.message,
                    details: parsed.error.details,
                });
            }
            log::warn!("Generation request failed: HTTP {status}");
            return Err(GenerationError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(GenerationError::from));
        Ok(Box::pin(stream))
    }
}
