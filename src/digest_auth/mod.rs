//! DigestAuthClient - one authenticated HTTP exchange with a controller
//!
//! ## Responsibilities
//!
//! - Send the request once without credentials
//! - On `401` + `WWW-Authenticate: Digest`, answer the challenge and resend once
//! - Hand status, headers and body back to the caller unchanged
//!
//! No nonce is cached between logical requests: every call pays for its
//! own challenge round trip.

mod challenge;

pub use challenge::{
    authorization_header, compute_response, generate_cnonce, Challenge, NONCE_COUNT,
};

use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Method, StatusCode};
use std::time::Duration;

/// Default per-request timeout for LAN controllers
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Credentials for one device
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// One request to send
#[derive(Debug, Clone)]
pub struct DigestRequest<'a> {
    pub method: Method,
    /// Path including query, e.g. `/ISAPI/AccessControl/AcsEvent?format=json`
    pub path: &'a str,
    pub body: Option<String>,
    pub content_type: Option<&'a str>,
}

/// Final response of the exchange
#[derive(Debug, Clone)]
pub struct DigestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
    /// Whether a challenge was answered on the way
    pub authenticated: bool,
}

impl DigestResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Failures that are not an HTTP response
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    /// Unreachable, refused, reset
    #[error("connection failed: {0}")]
    Connection(String),

    /// No response within the configured timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid device address or request
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl DigestError {
    fn from_reqwest(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            DigestError::Timeout(timeout)
        } else if e.is_builder() {
            DigestError::InvalidRequest(e.to_string())
        } else {
            DigestError::Connection(e.to_string())
        }
    }
}

/// Digest-authenticating HTTP client
#[derive(Clone)]
pub struct DigestAuthClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl DigestAuthClient {
    /// Create new client with a per-request timeout
    pub fn new(timeout: Duration) -> Self {
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(e) => {
                // Each request still carries the timeout, see `dispatch`
                tracing::error!(error = %e, "HTTP client build failed, using default client");
                reqwest::Client::new()
            }
        };
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Complete one logical authenticated request against `address`.
    ///
    /// `address` is `host`, `host:port` or a full `http(s)://` base URL.
    /// A second non-success response is returned as-is.
    pub async fn send(
        &self,
        address: &str,
        credentials: &Credentials,
        request: &DigestRequest<'_>,
    ) -> Result<DigestResponse, DigestError> {
        let url = format!("{}{}", base_url(address), request.path);

        let first = self.dispatch(&url, request, None).await?;
        if first.status() != StatusCode::UNAUTHORIZED {
            return Self::collect(first, false).await;
        }

        let challenge = first
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(Challenge::parse);

        let challenge = match challenge {
            Some(c) => c,
            None => {
                tracing::debug!(url = %url, "401 without a Digest challenge");
                return Self::collect(first, false).await;
            }
        };

        tracing::debug!(
            url = %url,
            realm = %challenge.realm,
            qop = ?challenge.qop,
            algorithm = ?challenge.algorithm,
            "Answering digest challenge"
        );

        let cnonce = generate_cnonce();
        let auth = authorization_header(
            &challenge,
            &credentials.username,
            &credentials.password,
            request.method.as_str(),
            request.path,
            &cnonce,
        );

        let second = self.dispatch(&url, request, Some(auth)).await?;
        let response = Self::collect(second, true).await?;
        if !response.is_success() {
            tracing::warn!(
                url = %url,
                status = %response.status,
                "Request rejected after digest authentication"
            );
        }
        Ok(response)
    }

    async fn dispatch(
        &self,
        url: &str,
        request: &DigestRequest<'_>,
        authorization: Option<String>,
    ) -> Result<reqwest::Response, DigestError> {
        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .timeout(self.timeout);
        if let Some(content_type) = request.content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        if let Some(auth) = authorization {
            builder = builder.header(AUTHORIZATION, auth);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        builder
            .send()
            .await
            .map_err(|e| DigestError::from_reqwest(e, self.timeout))
    }

    async fn collect(
        response: reqwest::Response,
        authenticated: bool,
    ) -> Result<DigestResponse, DigestError> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| DigestError::Connection(format!("reading body: {}", e)))?;

        Ok(DigestResponse {
            status,
            headers,
            body,
            authenticated,
        })
    }
}

impl Default for DigestAuthClient {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_TIMEOUT_MS))
    }
}

/// Normalize a device address into a base URL without trailing slash
pub fn base_url(address: &str) -> String {
    let trimmed = address.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}
