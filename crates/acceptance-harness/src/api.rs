// crates/acceptance-harness/src/api.rs
// ============================================================================
// Module: Management API Client
// Description: Authenticated JSON requests against the platform API.
// Purpose: Query and mutate platform state with typed failures and transcripts.
// Dependencies: reqwest, serde, serde_json, url
// ============================================================================

//! ## Overview
//! [`ApiClient`] issues a single HTTP request per call, authorized with the
//! bearer token of the caller's active principal, and decodes the JSON reply.
//! Failures are classified so scenario code can tell a missing login from a
//! rejected request from an unreadable body.
//!
//! Invariants:
//! - No request is sent without a token; that is [`ApiError::Unauthenticated`].
//! - Requests are never retried; callers wrap them in a poll when needed.
//! - Every exchange is appended to the transcript, including failures.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::identity::IdentityContext;

pub use reqwest::Method;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum response body bytes echoed into a status error.
const MAX_ERROR_BODY_BYTES: usize = 4 * 1024;
/// Maximum exchanges kept in the transcript; older ones are dropped first.
pub const MAX_TRANSCRIPT_ENTRIES: usize = 512;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Management API failures.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The caller has no active principal, so no token exists.
    #[error("{method} {path}: no authenticated principal")]
    Unauthenticated {
        /// HTTP method.
        method: String,
        /// Request path.
        path: String,
    },
    /// The server answered with a non-success status.
    #[error("{method} {path}: status {status}: {body}")]
    Status {
        /// HTTP method.
        method: String,
        /// Request path.
        path: String,
        /// Response status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
    /// The response body did not match the expected shape.
    #[error("{method} {path}: invalid response body: {detail}")]
    Decode {
        /// HTTP method.
        method: String,
        /// Request path.
        path: String,
        /// Decoder error.
        detail: String,
    },
    /// The request could not be sent or the response not read.
    #[error("{method} {path}: transport failure: {detail}")]
    Transport {
        /// HTTP method.
        method: String,
        /// Request path.
        path: String,
        /// Transport error.
        detail: String,
    },
    /// The client could not be constructed.
    #[error("api client config: {0}")]
    Config(String),
}

// ============================================================================
// SECTION: Response Shapes
// ============================================================================

/// Paged query response from the v2 API.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse<T> {
    /// Total matching resources across pages.
    #[serde(default)]
    pub total_results: u64,
    /// Resources on this page.
    pub resources: Vec<Resource<T>>,
}

/// A v2 resource envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Resource<T> {
    /// Resource metadata.
    pub metadata: Metadata,
    /// Resource body.
    pub entity: T,
}

impl<T> Resource<T> {
    /// Returns the resource guid.
    #[must_use]
    pub fn guid(&self) -> &str {
        &self.metadata.guid
    }
}

/// v2 resource metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct Metadata {
    /// Unique identifier.
    pub guid: String,
    /// Resource URL path.
    #[serde(default)]
    pub url: Option<String>,
}

// ============================================================================
// SECTION: Transcript
// ============================================================================

/// One recorded request/response exchange.
#[derive(Debug, Clone, Serialize)]
pub struct ApiExchange {
    /// Sequence number, starting at one.
    pub sequence: u64,
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Response status, when one was received.
    pub status: Option<u16>,
    /// Failure text, when the exchange failed.
    pub error: Option<String>,
}

/// Bounded exchange log shared by client clones.
#[derive(Debug, Default)]
struct Transcript {
    /// Sequence number of the last recorded exchange.
    last_sequence: u64,
    /// Most recent exchanges, oldest first.
    entries: VecDeque<ApiExchange>,
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// JSON client for the platform management API.
#[derive(Clone)]
pub struct ApiClient {
    /// Base URL without a trailing slash.
    base_url: String,
    /// Underlying HTTP client.
    client: Client,
    /// Recorded exchanges.
    transcript: Arc<Mutex<Transcript>>,
}

impl ApiClient {
    /// Creates a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] when the URL is invalid or the HTTP client
    /// cannot be built.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        skip_ssl_validation: bool,
    ) -> Result<Self, ApiError> {
        let parsed = Url::parse(base_url.trim())
            .map_err(|err| ApiError::Config(format!("invalid api url {base_url}: {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::Config(format!("unsupported api url scheme: {base_url}")));
        }
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(skip_ssl_validation)
            .build()
            .map_err(|err| ApiError::Config(format!("failed to build http client: {err}")))?;
        Ok(Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            client,
            transcript: Arc::new(Mutex::new(Transcript::default())),
        })
    }

    /// Returns the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns a snapshot of the transcript, oldest exchange first.
    ///
    /// At most [`MAX_TRANSCRIPT_ENTRIES`] exchanges are kept.
    #[must_use]
    pub fn transcript(&self) -> Vec<ApiExchange> {
        let transcript = self.transcript.lock().unwrap_or_else(PoisonError::into_inner);
        transcript.entries.iter().cloned().collect()
    }

    /// Sends a request as the identity's active principal and decodes JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when unauthenticated, on transport failure, on a
    /// non-success status, or when the body does not decode as `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        identity: &IdentityContext,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, ApiError> {
        let Some(token) = identity.token() else {
            let err = ApiError::Unauthenticated {
                method: method.to_string(),
                path: path.to_string(),
            };
            self.record(method.as_str(), path, None, Some(err.to_string()));
            return Err(err);
        };
        self.request_with_token(token, method, path, body).await
    }

    /// Sends a request with an explicit token and decodes JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure, on a non-success status, or
    /// when the body does not decode as `T`.
    pub async fn request_with_token<T: DeserializeOwned>(
        &self,
        token: &str,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, ApiError> {
        let (sequence, bytes) = self.send(token, &method, path, body).await?;
        serde_json::from_slice(&bytes).map_err(|err| {
            let err = ApiError::Decode {
                method: method.to_string(),
                path: path.to_string(),
                detail: err.to_string(),
            };
            self.annotate(sequence, &err);
            err
        })
    }

    /// Sends a request as the identity's active principal, ignoring the body.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when unauthenticated, on transport failure, or on
    /// a non-success status.
    pub async fn request_empty(
        &self,
        identity: &IdentityContext,
        method: Method,
        path: &str,
    ) -> Result<(), ApiError> {
        let Some(token) = identity.token() else {
            let err = ApiError::Unauthenticated {
                method: method.to_string(),
                path: path.to_string(),
            };
            self.record(method.as_str(), path, None, Some(err.to_string()));
            return Err(err);
        };
        self.send(token, &method, path, None).await.map(|_| ())
    }

    /// Sends one request and returns the body of a success response along
    /// with the transcript sequence number it was recorded under.
    async fn send(
        &self,
        token: &str,
        method: &Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<(u64, Vec<u8>), ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request =
            self.client.request(method.clone(), url).header(AUTHORIZATION, token);
        if let Some(body) = body {
            request = request.json(body);
        }
        let transport = |detail: String| ApiError::Transport {
            method: method.to_string(),
            path: path.to_string(),
            detail,
        };
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                let err = transport(err.to_string());
                self.record(method.as_str(), path, None, Some(err.to_string()));
                return Err(err);
            }
        };
        let status = response.status();
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(err) => {
                let err = transport(err.to_string());
                self.record(method.as_str(), path, Some(status.as_u16()), Some(err.to_string()));
                return Err(err);
            }
        };
        if !status.is_success() {
            let err = ApiError::Status {
                method: method.to_string(),
                path: path.to_string(),
                status: status.as_u16(),
                body: truncate_body(&bytes),
            };
            self.record(method.as_str(), path, Some(status.as_u16()), Some(err.to_string()));
            return Err(err);
        }
        let sequence = self.record(method.as_str(), path, Some(status.as_u16()), None);
        Ok((sequence, bytes))
    }

    /// Appends an exchange to the transcript and returns its sequence number.
    fn record(
        &self,
        method: &str,
        path: &str,
        status: Option<u16>,
        error: Option<String>,
    ) -> u64 {
        let mut transcript = self.transcript.lock().unwrap_or_else(PoisonError::into_inner);
        transcript.last_sequence += 1;
        let sequence = transcript.last_sequence;
        if transcript.entries.len() == MAX_TRANSCRIPT_ENTRIES {
            transcript.entries.pop_front();
        }
        transcript.entries.push_back(ApiExchange {
            sequence,
            method: method.to_string(),
            path: path.to_string(),
            status,
            error,
        });
        sequence
    }

    /// Attaches a decode failure to the exchange recorded as `sequence`.
    ///
    /// Does nothing if the exchange has already been evicted.
    fn annotate(&self, sequence: u64, err: &ApiError) {
        let mut transcript = self.transcript.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(exchange) =
            transcript.entries.iter_mut().rev().find(|exchange| exchange.sequence == sequence)
        {
            exchange.error = Some(err.to_string());
        }
    }
}

/// Renders a response body for error messages.
fn truncate_body(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= MAX_ERROR_BODY_BYTES {
        return text.into_owned();
    }
    let mut end = MAX_ERROR_BODY_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
