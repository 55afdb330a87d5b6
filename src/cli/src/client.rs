//! HTTP client for the Transmute API server.

use anyhow::{Context, Result};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The server's response envelope. Errors carry `error` and `error_code`.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub error_code: Option<String>,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> Result<T> {
        if self.success {
            return self
                .data
                .ok_or_else(|| anyhow::anyhow!("API returned success but no data"));
        }

        let message = self.error.unwrap_or_else(|| "Unknown error".into());
        match self.error_code {
            Some(code) => Err(anyhow::anyhow!("API error [{}]: {}", code, message)),
            None => Err(anyhow::anyhow!("API error: {}", message)),
        }
    }
}

/// HTTP client for the Transmute API.
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client pointing at the given base URL.
    pub fn new(base_url: &str) -> Result<Self> {
        // Summary requests block until a batch finishes
        let client = Client::builder()
            .timeout(Duration::from_secs(60 * 60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Return the configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request::<(), T>(Method::GET, path, None).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request::<(), T>(Method::DELETE, path, None).await
    }

    async fn request<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let resp = request
            .send()
            .await
            .with_context(|| format!("{} {} failed", method, url))?;

        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .with_context(|| format!("Failed to read response from {}", url))?;

        // Error bodies use the same envelope; fall back to raw text otherwise
        match serde_json::from_slice::<ApiResponse<T>>(&bytes) {
            Ok(api_resp) => api_resp.into_result(),
            Err(_) if !status.is_success() => {
                anyhow::bail!("API error ({}): {}", status, String::from_utf8_lossy(&bytes))
            }
            Err(e) => Err(e).with_context(|| format!("Failed to parse response from {}", url)),
        }
    }

    /// Perform a raw GET request and return the full JSON value (for health endpoint).
    pub async fn get_raw(&self, path: &str) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        resp.json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }
}
