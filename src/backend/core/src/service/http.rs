//! Conversion over HTTP.
//!
//! `POST {endpoint}` with a JSON body `{file_name, content, options}`; a 2xx
//! answer carries `{content, metadata}`. Status codes map onto the
//! transient/fatal split:
//!
//! | Answer                               | Error                        |
//! |--------------------------------------|------------------------------|
//! | connect failure, timeout             | `Network` / `Timeout`        |
//! | 429                                  | `RateLimited`                |
//! | 408, 5xx                             | `Unavailable`                |
//! | 400, 422                             | `MalformedInput`             |
//! | other 4xx                            | `Rejected`                   |
//! | 2xx with a body we cannot decode     | `InvalidResponse`            |

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::batch::{ConversionInput, ConversionOutput};
use crate::config::ConversionConfig;
use crate::error::Result;
use crate::service::{ConversionError, ConversionService};

/// Longest error body quoted in an error message.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone)]
pub struct HttpConversionConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
}

impl From<&ConversionConfig> for HttpConversionConfig {
    fn from(config: &ConversionConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            request_timeout: config.request_timeout,
        }
    }
}

#[derive(Serialize)]
struct ConvertRequest<'a> {
    file_name: &'a str,
    content: &'a str,
    options: &'a serde_json::Value,
}

/// Remote conversion service client.
pub struct HttpConversionService {
    client: reqwest::Client,
    config: HttpConversionConfig,
}

impl HttpConversionService {
    pub fn new(config: HttpConversionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("transmute/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, config })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    fn classify_send_error(&self, error: reqwest::Error) -> ConversionError {
        if error.is_timeout() {
            ConversionError::Timeout(self.config.request_timeout)
        } else {
            ConversionError::Network(error.to_string())
        }
    }
}

fn classify_status(status: StatusCode, body: String) -> ConversionError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, truncate(&body))
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS => ConversionError::RateLimited(detail),
        StatusCode::REQUEST_TIMEOUT => ConversionError::Unavailable(detail),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            ConversionError::MalformedInput(detail)
        }
        s if s.is_server_error() => ConversionError::Unavailable(detail),
        _ => ConversionError::Rejected(detail),
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[async_trait]
impl ConversionService for HttpConversionService {
    async fn convert(
        &self,
        input: &ConversionInput,
    ) -> std::result::Result<ConversionOutput, ConversionError> {
        let mut request = self.client.post(&self.config.endpoint).json(&ConvertRequest {
            file_name: &input.file_name,
            content: &input.content,
            options: &input.options,
        });
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.classify_send_error(e))?;

        let status = response.status();
        debug!(file_name = %input.file_name, status = status.as_u16(), "Conversion service answered");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.classify_send_error(e))?;
        serde_json::from_slice::<ConversionOutput>(&bytes)
            .map_err(|e| ConversionError::InvalidResponse(e.to_string()))
    }
}
