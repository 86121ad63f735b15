//! Outbound HTTP calls to the platform with bounded retry.
//!
//! Every call that leaves the process (key set retrieval, token exchanges,
//! user info) goes through [`RemoteCaller`]. Transport failures are retried
//! with exponential backoff; a response that made the round trip is never
//! retried, and anything outside 2xx comes back as [`RemoteError::Rejected`].
//! Backoff waits race the caller's [`CancellationToken`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Retry and timeout settings for outbound calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Overall timeout of a single attempt.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// First backoff wait.
    pub base_wait: Duration,
    /// Upper bound for any backoff wait.
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 3,
            base_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_wait
            .checked_mul(factor)
            .map_or(self.max_wait, |wait| wait.min(self.max_wait))
    }
}

/// A fully serialized request, ready to hand to a transport.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

/// Status and body of a response that completed the round trip.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

/// A failure before a response was received (connect, TLS, timeout, reset).
#[derive(Debug, Clone)]
pub struct TransportError {
    pub message: String,
    pub timed_out: bool,
}

/// Single-attempt request execution. Retry lives in [`RemoteCaller`].
pub trait HttpTransport: Send + Sync {
    fn send(
        &self,
        request: OutboundRequest,
    ) -> Pin<Box<dyn Future<Output = Result<RawResponse, TransportError>> + Send + '_>>;
}

/// Production transport backed by `reqwest`.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(
        &self,
        request: OutboundRequest,
    ) -> Pin<Box<dyn Future<Output = Result<RawResponse, TransportError>> + Send + '_>> {
        Box::pin(async move {
            let mut builder = self
                .client
                .request(request.method, &request.url)
                .headers(request.headers);
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(transport_error)?;
            let status = response.status();
            let body = response.bytes().await.map_err(transport_error)?;

            Ok(RawResponse {
                status,
                body: body.to_vec(),
            })
        })
    }
}

fn transport_error(err: reqwest::Error) -> TransportError {
    TransportError {
        timed_out: err.is_timeout(),
        message: err.to_string(),
    }
}

/// Executes outbound calls with bounded, cancellable retry.
#[derive(Clone)]
pub struct RemoteCaller {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
}

impl RemoteCaller {
    /// Create a caller using the `reqwest` transport.
    pub fn new(policy: RetryPolicy) -> Result<Self, RemoteError> {
        let transport = ReqwestTransport::new(policy.timeout)?;
        Ok(Self::with_transport(Arc::new(transport), policy))
    }

    /// Create a caller over an arbitrary transport.
    pub fn with_transport(transport: Arc<dyn HttpTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Execute a request and return the raw 2xx response body.
    ///
    /// `body` is encoded according to the `Content-Type` header: a form
    /// content type encodes a flat JSON object as
    /// `application/x-www-form-urlencoded`, anything else sends JSON (and
    /// defaults the header to `application/json`). Body-less requests get no
    /// default content type.
    pub async fn call(
        &self,
        method: Method,
        url: &str,
        mut headers: HeaderMap,
        body: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, RemoteError> {
        if !matches!(
            method,
            Method::GET | Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        ) {
            return Err(RemoteError::UnsupportedMethod(method.to_string()));
        }

        if body.is_some() && !headers.contains_key(header::CONTENT_TYPE) {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(JSON_CONTENT_TYPE),
            );
        }

        let body = body
            .map(|value| encode_body(&headers, value))
            .transpose()?;

        let request = OutboundRequest {
            method,
            url: url.to_string(),
            headers,
            body,
        };

        debug!(method = %request.method, url = %request.url, "Making HTTP request");

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RemoteError::Cancelled),
                result = self.transport.send(request.clone()) => result,
            };

            match result {
                Ok(response) => {
                    debug!(
                        status = response.status.as_u16(),
                        bytes = response.body.len(),
                        "Received HTTP response"
                    );

                    if !response.status.is_success() {
                        return Err(RemoteError::Rejected {
                            status: response.status.as_u16(),
                            body: String::from_utf8_lossy(&response.body).into_owned(),
                        });
                    }

                    return Ok(response.body);
                }
                Err(err) => {
                    if attempt > self.policy.max_retries {
                        return Err(RemoteError::TransportFailed {
                            attempts: attempt,
                            message: err.message,
                            timed_out: err.timed_out,
                        });
                    }

                    let wait = self.policy.backoff(attempt);
                    warn!(
                        error = %err.message,
                        retry = attempt,
                        wait_ms = wait.as_millis() as u64,
                        "Request failed, retrying"
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(RemoteError::Cancelled),
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }
    }

    /// Execute a request and decode the 2xx JSON response body.
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<T, RemoteError> {
        let bytes = self.call(method, url, headers, body, cancel).await?;
        serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

fn encode_body(headers: &HeaderMap, value: &Value) -> Result<Vec<u8>, RemoteError> {
    let is_form = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with(FORM_CONTENT_TYPE));

    if !is_form {
        return serde_json::to_vec(value).map_err(|e| RemoteError::InvalidBody(e.to_string()));
    }

    let fields = value.as_object().ok_or_else(|| {
        RemoteError::InvalidBody("form body must be a JSON object".to_string())
    })?;

    let mut form = url::form_urlencoded::Serializer::new(String::new());
    for (key, field) in fields {
        match field {
            Value::Null => {}
            Value::String(s) => {
                form.append_pair(key, s);
            }
            Value::Bool(_) | Value::Number(_) => {
                form.append_pair(key, &field.to_string());
            }
            Value::Array(_) | Value::Object(_) => {
                return Err(RemoteError::InvalidBody(format!(
                    "form field `{}` is not a scalar",
                    key
                )));
            }
        }
    }

    Ok(form.finish().into_bytes())
}

/// Errors surfaced by [`RemoteCaller`].
#[derive(Debug, Clone)]
pub enum RemoteError {
    /// Method outside GET/POST/PUT/PATCH/DELETE.
    UnsupportedMethod(String),
    /// Body could not be encoded for the requested content type.
    InvalidBody(String),
    /// HTTP client could not be constructed.
    Client(String),
    /// Every attempt failed before a response arrived.
    TransportFailed {
        attempts: u32,
        message: String,
        timed_out: bool,
    },
    /// The remote answered with a non-2xx status.
    Rejected { status: u16, body: String },
    /// The caller cancelled while a request or backoff wait was pending.
    Cancelled,
    /// A 2xx body was not the expected JSON.
    Decode(String),
}

impl RemoteError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TransportFailed { timed_out: true, .. })
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedMethod(method) => write!(f, "Unsupported HTTP method: {}", method),
            Self::InvalidBody(msg) => write!(f, "Failed to encode request body: {}", msg),
            Self::Client(msg) => write!(f, "Failed to create HTTP client: {}", msg),
            Self::TransportFailed {
                attempts, message, ..
            } => write!(f, "Request failed after {} attempts: {}", attempts, message),
            Self::Rejected { status, body } => {
                write!(f, "Request failed with status {}: {}", status, body)
            }
            Self::Cancelled => write!(f, "Request cancelled"),
            Self::Decode(msg) => write!(f, "Failed to decode response: {}", msg),
        }
    }
}

impl std::error::Error for RemoteError {}
