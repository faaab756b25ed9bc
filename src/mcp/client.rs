//! HTTP client for a running RocketPhasegate API.
//!
//! Used by the `status` and `feature` CLI commands. Configuration is via
//! environment variables:
//! - `ROCKET_PHASEGATE_URL` - Base URL (default: `http://localhost:17010/api/v1`)
//! - `ROCKET_PHASEGATE_API_KEY` - API key for authentication (optional for local)

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::models::*;

/// Default URL for local development.
const DEFAULT_URL: &str = "http://localhost:17010/api/v1";

/// HTTP client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Refused: {0}")]
    Refused(String),

    #[error("Unauthorized: API key required or invalid")]
    Unauthorized,

    #[error("Server error: {0}")]
    Server(String),
}

/// Error body returned by the API.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Clone)]
pub struct EngineClient {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl EngineClient {
    /// Create client from environment variables.
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("ROCKET_PHASEGATE_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        let api_key = std::env::var("ROCKET_PHASEGATE_API_KEY").ok();
        Self::new(base_url, api_key)
    }

    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` with the optional auth header and decode the JSON body.
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.get(&url);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req.send().await?;
        Self::handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or(body);
        match status {
            StatusCode::NOT_FOUND => Err(ClientError::NotFound(message)),
            StatusCode::BAD_REQUEST => Err(ClientError::BadRequest(message)),
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
                Err(ClientError::Refused(message))
            }
            StatusCode::UNAUTHORIZED => Err(ClientError::Unauthorized),
            _ => Err(ClientError::Server(format!("{}: {}", status, message))),
        }
    }

    pub async fn health(&self) -> Result<serde_json::Value, ClientError> {
        self.get("/health").await
    }

    pub async fn list_features(
        &self,
        status: Option<FeatureStatus>,
    ) -> Result<Vec<FeatureSummary>, ClientError> {
        match status {
            Some(status) => self.get(&format!("/features?status={}", status)).await,
            None => self.get("/features").await,
        }
    }

    pub async fn feature_history(&self, feature_id: &str) -> Result<FeatureHistory, ClientError> {
        self.get(&format!("/features/{}/history", feature_id)).await
    }

    pub async fn coverage(&self, feature_id: &str) -> Result<CoverageReport, ClientError> {
        self.get(&format!("/features/{}/coverage", feature_id)).await
    }

    pub async fn active_alerts(&self) -> Result<Vec<EvalAlert>, ClientError> {
        self.get("/alerts").await
    }

    pub async fn system_evals(&self, window: EvalWindow) -> Result<Vec<SystemHealthEval>, ClientError> {
        self.get(&format!("/system/evals?window={}", window.days()))
            .await
    }
}
