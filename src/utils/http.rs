//! HTTP Client
//!
//! Shared async client construction and JSON response handling for the
//! policy cosigner and remote signer adapters.

use crate::error::{TransferError, TransferResult};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

pub const USER_AGENT: &str = concat!("cosign-transfer/", env!("CARGO_PKG_VERSION"));

/// Longest error body kept in an error message
const MAX_ERROR_BODY: usize = 512;

/// Client timeouts
#[derive(Debug, Clone, Copy)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Build a pooled async client
pub fn build_client(settings: HttpSettings) -> TransferResult<Client> {
    Client::builder()
        .timeout(settings.timeout)
        .connect_timeout(settings.connect_timeout)
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(5)
        .tcp_keepalive(Duration::from_secs(60))
        .tcp_nodelay(true)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| TransferError::network(format!("Failed to create HTTP client: {}", e)))
}

/// A non-success response, body preserved for classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFailure {
    pub status: StatusCode,
    pub body: String,
}

impl HttpFailure {
    pub fn into_error(self) -> TransferError {
        TransferError::network(format!("HTTP {}: {}", self.status.as_u16(), truncate(&self.body)))
    }
}

/// Read the body of a successful response, or the failure with its body
pub async fn read_body(response: Response) -> TransferResult<Result<String, HttpFailure>> {
    let status = response.status();
    let body = response.text().await?;
    if status.is_success() {
        Ok(Ok(body))
    } else {
        Ok(Err(HttpFailure { status, body }))
    }
}

/// Decode a JSON response, mapping non-success statuses to network errors
pub async fn read_json<T: DeserializeOwned>(response: Response) -> TransferResult<T> {
    match read_body(response).await? {
        Ok(body) => parse_json(&body),
        Err(failure) => Err(failure.into_error()),
    }
}

pub fn parse_json<T: DeserializeOwned>(body: &str) -> TransferResult<T> {
    serde_json::from_str(body)
        .map_err(|e| TransferError::parse(format!("Unexpected response body ({}): {}", e, truncate(body))))
}

/// Join a path onto a base URL without doubling slashes
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

fn truncate(body: &str) -> &str {
    if body.len() <= MAX_ERROR_BODY {
        return body;
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
