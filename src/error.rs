//! Request-scoped error rendered by the HTTP layer.
//!
//! Trust failures carry only a generic public message; the precise reason
//! is written to the audit log when the error is converted.

use std::fmt;

use axum::Json;
use axum::extract::rejection::{FormRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, warn};

use crate::http_client::RemoteError;
use crate::keys::KeyError;
use crate::lti::{LaunchError, LoginError, ServiceTokenError, VerifyError};
use crate::oauth2::OAuth2Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    BadGateway,
    GatewayTimeout,
    Internal,
    NotImplemented,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadGateway => StatusCode::BAD_GATEWAY,
            Self::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        }
    }
}

/// Uniform response body for every endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T = Value> {
    pub message: String,
    pub error_detail: String,
    pub data: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            message: message.into(),
            error_detail: String::new(),
            data,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppError {
    kind: ErrorKind,
    message: String,
    detail: String,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: String::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.message, self.detail)
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body: Envelope = Envelope {
            message: self.message,
            error_detail: self.detail,
            data: Value::Null,
        };
        (self.kind.status(), Json(body)).into_response()
    }
}

impl From<RemoteError> for AppError {
    fn from(err: RemoteError) -> Self {
        warn!("Upstream call failed: {}", err);
        match &err {
            RemoteError::UnsupportedMethod(_)
            | RemoteError::InvalidBody(_)
            | RemoteError::Client(_) => Self::internal("internal error"),
            _ if err.is_timeout() => {
                Self::new(ErrorKind::GatewayTimeout, "upstream request timed out")
            }
            RemoteError::Cancelled => {
                Self::new(ErrorKind::GatewayTimeout, "upstream request cancelled")
            }
            RemoteError::Rejected { status, .. } => {
                Self::new(ErrorKind::BadGateway, "upstream request rejected")
                    .with_detail(format!("status {}", status))
            }
            RemoteError::TransportFailed { .. } | RemoteError::Decode(_) => {
                Self::new(ErrorKind::BadGateway, "upstream request failed")
            }
        }
    }
}

impl From<FormRejection> for AppError {
    fn from(rejection: FormRejection) -> Self {
        warn!("Rejected form input: {}", rejection.body_text());
        Self::bad_request("invalid form input").with_detail(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        warn!("Rejected query string: {}", rejection.body_text());
        Self::bad_request("invalid query string").with_detail(rejection.body_text())
    }
}

impl From<KeyError> for AppError {
    fn from(err: KeyError) -> Self {
        error!("Key material error: {}", err);
        Self::internal("internal error")
    }
}

impl From<VerifyError> for AppError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::KeySetUnavailable(remote) => Self::from(remote),
            VerifyError::InvalidAssertion(reason) => {
                warn!("Launch rejected: {}", reason);
                Self::new(ErrorKind::Unauthorized, "invalid assertion")
            }
            VerifyError::MalformedClaims(reason) => {
                warn!("Launch rejected: {}", reason);
                Self::bad_request("malformed launch claims")
            }
        }
    }
}

impl From<LaunchError> for AppError {
    fn from(err: LaunchError) -> Self {
        match err {
            LaunchError::Verify(err) => Self::from(err),
            LaunchError::InvalidNonce => {
                warn!("Launch rejected: nonce unknown, expired or already used");
                Self::new(ErrorKind::Unauthorized, "invalid nonce")
            }
            LaunchError::InvalidState => {
                warn!("Launch rejected: state does not match nonce");
                Self::new(ErrorKind::Unauthorized, "invalid state")
            }
        }
    }
}

impl From<LoginError> for AppError {
    fn from(err: LoginError) -> Self {
        warn!("Login rejected: {}", err);
        Self::bad_request("invalid login request").with_detail(err.to_string())
    }
}

impl From<ServiceTokenError> for AppError {
    fn from(err: ServiceTokenError) -> Self {
        match err {
            ServiceTokenError::Signing(err) => Self::from(err),
            ServiceTokenError::Remote(err) => Self::from(err),
        }
    }
}

impl From<OAuth2Error> for AppError {
    fn from(err: OAuth2Error) -> Self {
        match err {
            OAuth2Error::AuthorizationDenied { error, description } => {
                warn!("OAuth2 authorization denied by platform: {}", error);
                Self::bad_request(error).with_detail(description)
            }
            OAuth2Error::MissingCode => Self::bad_request("missing authorization code"),
            OAuth2Error::InvalidState => Self::bad_request("invalid state"),
            OAuth2Error::InvalidAccessToken => {
                Self::new(ErrorKind::BadGateway, "invalid access token")
            }
            OAuth2Error::Login(err) => Self::from(err),
            OAuth2Error::Remote(err) => Self::from(err),
            OAuth2Error::RefreshNotSupported => {
                Self::new(ErrorKind::NotImplemented, "token refresh is not supported")
            }
        }
    }
}
