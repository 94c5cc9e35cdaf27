use super::SequenceApi;
use crate::config::ApiConfig;
use crate::error::Error;
use crate::models::{Detection, RemoteCamera};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const API_PREFIX: &str = "api/v1";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Thin client for the alert API
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    token: Option<String>,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl ApiClient {
    /// Create a client from configuration, without authenticating
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::with_http(config, http))
    }

    /// Create a client sharing an existing HTTP client
    pub fn with_http(config: &ApiConfig, http: reqwest::Client) -> Self {
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            http,
            token: config.token.clone(),
            retry_attempts: config.retry_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    /// Create a client and authenticate it with the configured token or credentials
    pub async fn connect(config: &ApiConfig) -> Result<Self> {
        let mut client = Self::new(config)?;

        if client.token.is_none() {
            match (&config.login, &config.password) {
                (Some(login), Some(password)) => client.login(login, password).await?,
                _ => {
                    return Err(Error::Config(
                        "API token or login/password required (API_TOKEN, API_LOGIN, API_PWD)"
                            .to_string(),
                    )
                    .into())
                }
            }
        }

        Ok(client)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Underlying HTTP client, also used for unauthenticated downloads
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Exchange credentials for an access token
    pub async fn login(&mut self, login: &str, password: &str) -> Result<()> {
        info!("Logging in to {} as {}", self.base_url, login);

        let url = self.url("login/creds");
        let response = self
            .send_with_retry(|| {
                self.http
                    .post(&url)
                    .form(&[("username", login), ("password", password)])
            })
            .await?;

        let token: TokenResponse = decode(response).await?;
        self.token = Some(token.access_token);
        Ok(())
    }

    /// Streaming token of one camera
    pub async fn camera_token(&self, camera_id: i64) -> Result<String> {
        let url = self.url(&format!("cameras/{}/token", camera_id));
        let response = self
            .send_with_retry(|| self.authorized(self.http.post(&url)))
            .await
            .context(format!("Failed to get token for camera {}", camera_id))?;

        let token: TokenResponse = decode(response).await?;
        Ok(token.access_token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, API_PREFIX, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(reqwest::header::ACCEPT, "application/json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = self.url(path);
        let response = self
            .send_with_retry(|| self.authorized(self.http.get(&url).query(query)))
            .await?;
        decode(response).await
    }

    /// Send a request, retrying timeouts, connection failures, 429 and 5xx
    /// with exponential backoff. Other statuses fail immediately.
    async fn send_with_retry<F>(&self, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut delay = self.retry_delay;
        let mut attempt = 1;

        loop {
            let err = match build().send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let url = response.url().to_string();
                    let body = response.text().await.unwrap_or_default();
                    Error::from_status(status, format!("{}: {}", url, error_detail(&body)))
                }
                Err(e) => Error::from(e),
            };

            if !err.is_retryable() || attempt >= self.retry_attempts {
                return Err(err.into());
            }

            warn!(
                "Request failed (attempt {}/{}): {}, retrying in {:?}",
                attempt, self.retry_attempts, err, delay
            );
            tokio::time::sleep(delay).await;
            delay *= 2;
            attempt += 1;
        }
    }
}

#[async_trait]
impl SequenceApi for ApiClient {
    async fn fetch_sequence_detections(
        &self,
        sequence_id: i64,
        limit: u32,
        descending: bool,
    ) -> Result<Vec<Detection>> {
        debug!(
            "Fetching up to {} detections of sequence {} (desc={})",
            limit, sequence_id, descending
        );
        self.get_json(
            &format!("sequences/{}/detections", sequence_id),
            &[("limit", limit.to_string()), ("desc", descending.to_string())],
        )
        .await
        .context(format!("Failed to fetch detections of sequence {}", sequence_id))
    }

    async fn fetch_cameras(&self) -> Result<Vec<RemoteCamera>> {
        self.get_json("cameras/", &[])
            .await
            .context("Failed to fetch cameras")
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let url = response.url().to_string();
    let bytes = response.bytes().await.map_err(Error::from)?;
    serde_json::from_slice(&bytes).map_err(|e| {
        Error::Serialization(format!("Unexpected response from {}: {}", url, e)).into()
    })
}

/// The API reports failures as `{"detail": ...}`
fn error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("detail").cloned())
        .map(|detail| match detail {
            serde_json::Value::String(text) => text,
            other => other.to_string(),
        })
        .unwrap_or_else(|| body.to_string())
}
