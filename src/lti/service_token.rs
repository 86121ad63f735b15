//! Service access tokens via the client-credentials grant with a signed
//! JWT client assertion (RFC 7523).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::header::{self, HeaderMap, HeaderValue};
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::Map;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::http_client::{RemoteCaller, RemoteError};
use crate::keys::{KeyError, KeyMaterial};
use crate::types::Scope;

/// Lifetime of a client assertion.
pub const CLIENT_ASSERTION_TTL: Duration = Duration::from_secs(5 * 60);

pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Token endpoint response of a client-credentials exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenGrant {
    pub access_token: String,
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

pub struct ServiceTokenIssuer {
    keys: Arc<KeyMaterial>,
    caller: Arc<RemoteCaller>,
    assertion_ttl: Duration,
}

impl ServiceTokenIssuer {
    pub fn new(keys: Arc<KeyMaterial>, caller: Arc<RemoteCaller>) -> Self {
        Self {
            keys,
            caller,
            assertion_ttl: CLIENT_ASSERTION_TTL,
        }
    }

    /// Sign a client assertion addressed to `token_endpoint`.
    pub fn client_assertion(&self, token_endpoint: &str) -> Result<String, ServiceTokenError> {
        self.keys
            .sign(token_endpoint, Map::new(), self.assertion_ttl)
            .map_err(ServiceTokenError::Signing)
    }

    /// Exchange a fresh client assertion for an access token with `scope`.
    pub async fn request_service_token(
        &self,
        token_endpoint: &str,
        scope: &Scope,
        cancel: &CancellationToken,
    ) -> Result<AccessTokenGrant, ServiceTokenError> {
        let assertion = self.client_assertion(token_endpoint)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let body = serde_json::json!({
            "grant_type": "client_credentials",
            "client_assertion_type": CLIENT_ASSERTION_TYPE,
            "client_assertion": assertion,
            "scope": scope.as_str(),
        });

        debug!("Requesting service token for scope {}", scope);

        let grant: AccessTokenGrant = self
            .caller
            .call_json(Method::POST, token_endpoint, headers, Some(&body), cancel)
            .await
            .inspect_err(|e| warn!("Service token request failed: {}", e))
            .map_err(ServiceTokenError::Remote)?;

        Ok(grant)
    }
}

#[derive(Debug, Clone)]
pub enum ServiceTokenError {
    Signing(KeyError),
    Remote(RemoteError),
}

impl fmt::Display for ServiceTokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signing(err) => write!(f, "Failed to build client assertion: {}", err),
            Self::Remote(err) => write!(f, "Token request failed: {}", err),
        }
    }
}

impl std::error::Error for ServiceTokenError {}
