//! API client for communicating with the monitor API

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

/// API client for the monitor API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

/// Raw response of a request whose status the caller interprets
#[derive(Debug)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    /// Make a GET request and return the text body
    pub async fn get_text(&self, path: &str) -> Result<String> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response.text().await.context("Failed to read response")?;
        if !status.is_success() {
            anyhow::bail!("API error ({}): {}", status, body);
        }

        Ok(body)
    }

    /// Make an empty POST request; non-success statuses are returned, not raised
    pub async fn post(&self, path: &str) -> Result<ApiResponse> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response.text().await.context("Failed to read response")?;

        Ok(ApiResponse { status, body })
    }
}

// API response types

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: i64,
    pub heap_size: u64,
    pub heap_used: u64,
    pub heap_objects: u64,
    pub gc_pauses: Vec<u64>,
    pub next_gc: u64,
    pub allocation_rate: f64,
    pub threat_level: String,
}

impl Sample {
    /// Heap in use as a percentage of the reservation
    pub fn utilization(&self) -> f64 {
        if self.heap_size == 0 {
            0.0
        } else {
            self.heap_used as f64 / self.heap_size as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTestStatus {
    pub active: bool,
    pub phase: LoadPhase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadPhase {
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}
