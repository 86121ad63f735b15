//! Verification of inbound platform-signed assertions (`id_token`).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, Validation, decode, decode_header};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::http_client::{RemoteCaller, RemoteError};
use crate::lti::claims::LaunchClaims;
use crate::lti::jwks::{JwksError, KeySetCache};

/// Accepted clock skew between the platform and this host.
pub const CLOCK_SKEW_LEEWAY_SECS: u64 = 5;

/// Checks signature, audience, expiry (and optionally issuer) of a platform
/// assertion before any of its claims are trusted.
pub struct AssertionVerifier {
    key_sets: KeySetCache,
    expected_issuer: Option<String>,
}

impl AssertionVerifier {
    pub fn new(caller: Arc<RemoteCaller>, jwks_cache_ttl: Duration) -> Self {
        Self {
            key_sets: KeySetCache::new(caller, jwks_cache_ttl),
            expected_issuer: None,
        }
    }

    /// Additionally require `iss` to equal `issuer`.
    pub fn with_expected_issuer(mut self, issuer: Option<String>) -> Self {
        self.expected_issuer = issuer;
        self
    }

    /// Verify `raw_token` against the key set at `jwks_endpoint` and decode
    /// its claims.
    pub async fn verify(
        &self,
        raw_token: &str,
        expected_audience: &str,
        jwks_endpoint: &str,
        cancel: &CancellationToken,
    ) -> Result<LaunchClaims, VerifyError> {
        let header = decode_header(raw_token)
            .map_err(|e| VerifyError::InvalidAssertion(format!("Invalid JWT header: {}", e)))?;

        if header.alg != Algorithm::RS256 {
            return Err(VerifyError::InvalidAssertion(format!(
                "Unexpected algorithm {:?}",
                header.alg
            )));
        }

        let kid = header
            .kid
            .ok_or_else(|| VerifyError::InvalidAssertion("JWT header has no kid".to_string()))?;

        let decoding_key = self
            .key_sets
            .get_key(jwks_endpoint, &kid, cancel)
            .await
            .map_err(|e| match e {
                JwksError::Fetch(remote) => VerifyError::KeySetUnavailable(remote),
                other => VerifyError::InvalidAssertion(other.to_string()),
            })?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = CLOCK_SKEW_LEEWAY_SECS;
        validation.validate_exp = true;
        validation.set_audience(&[expected_audience]);
        validation.set_required_spec_claims(&["exp", "aud", "iss", "sub"]);
        if let Some(issuer) = &self.expected_issuer {
            validation.set_issuer(&[issuer]);
        }

        let token_data = decode::<Map<String, Value>>(raw_token, &decoding_key, &validation)
            .map_err(|e| VerifyError::InvalidAssertion(format!("Validation failed: {}", e)))?;

        let claims: LaunchClaims = serde_json::from_value(Value::Object(token_data.claims))
            .map_err(|e| VerifyError::MalformedClaims(e.to_string()))?;

        debug!("Assertion verified for subject {} from {}", claims.sub, claims.iss);

        Ok(claims)
    }
}

/// Why an assertion was not accepted.
#[derive(Debug, Clone)]
pub enum VerifyError {
    /// The platform key set could not be retrieved.
    KeySetUnavailable(RemoteError),
    /// Signature, key match, algorithm, audience, issuer or expiry check
    /// failed. The reason is for logs only.
    InvalidAssertion(String),
    /// The verified claim set lacks required LTI claims.
    MalformedClaims(String),
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeySetUnavailable(err) => write!(f, "Platform key set unavailable: {}", err),
            Self::InvalidAssertion(reason) => write!(f, "Invalid assertion: {}", reason),
            Self::MalformedClaims(msg) => write!(f, "Malformed launch claims: {}", msg),
        }
    }
}

impl std::error::Error for VerifyError {}
