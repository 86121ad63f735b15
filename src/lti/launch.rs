//! Completion of the OIDC launch handshake.
//!
//! The assertion is verified first; only a verified assertion gets to
//! touch the nonce cache. The nonce is redeemed on first presentation,
//! whether or not the supplied `state` matches, so a launch can never be
//! retried with a different state.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::lti::claims::LaunchClaims;
use crate::lti::verifier::{AssertionVerifier, VerifyError};
use crate::token_cache::TokenCache;
use crate::types::ClientId;

pub struct LaunchValidator {
    verifier: Arc<AssertionVerifier>,
    nonces: TokenCache,
    client_id: ClientId,
    jwks_endpoint: String,
}

impl LaunchValidator {
    pub fn new(
        verifier: Arc<AssertionVerifier>,
        nonces: TokenCache,
        client_id: ClientId,
        jwks_endpoint: String,
    ) -> Self {
        Self {
            verifier,
            nonces,
            client_id,
            jwks_endpoint,
        }
    }

    /// Verify the platform's `id_token` and redeem the nonce it carries
    /// against the `state` posted alongside it.
    pub async fn complete_launch(
        &self,
        raw_token: &str,
        supplied_state: &str,
        cancel: &CancellationToken,
    ) -> Result<LaunchClaims, LaunchError> {
        let claims = self
            .verifier
            .verify(
                raw_token,
                self.client_id.as_str(),
                &self.jwks_endpoint,
                cancel,
            )
            .await?;

        let Some(stored_state) = self.nonces.take(&claims.nonce).await else {
            return Err(LaunchError::InvalidNonce);
        };

        if stored_state != supplied_state {
            return Err(LaunchError::InvalidState);
        }

        Ok(claims)
    }
}

#[derive(Debug, Clone)]
pub enum LaunchError {
    /// The assertion itself did not verify.
    Verify(VerifyError),
    /// The nonce was never issued, expired, or was already redeemed.
    InvalidNonce,
    /// The nonce was valid but bound to a different state.
    InvalidState,
}

impl From<VerifyError> for LaunchError {
    fn from(err: VerifyError) -> Self {
        Self::Verify(err)
    }
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verify(err) => write!(f, "{}", err),
            Self::InvalidNonce => write!(f, "Invalid nonce"),
            Self::InvalidState => write!(f, "Invalid state"),
        }
    }
}

impl std::error::Error for LaunchError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{
        HttpTransport, OutboundRequest, RawResponse, RemoteCaller, RetryPolicy, TransportError,
    };
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
    use serde_json::Value;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    const PLATFORM_PRIVATE: &str = include_str!("../../tests/fixtures/platform_private.pem");
    const PLATFORM_PUBLIC: &str = include_str!("../../tests/fixtures/platform_public.pem");
    const ROGUE_PRIVATE: &str = include_str!("../../tests/fixtures/rogue_private.pem");

    /// Serves the platform JWKS from memory and counts fetches.
    struct JwksTransport {
        body: Vec<u8>,
        fetches: AtomicU32,
    }

    impl HttpTransport for JwksTransport {
        fn send(
            &self,
            _request: OutboundRequest,
        ) -> Pin<Box<dyn Future<Output = Result<RawResponse, TransportError>> + Send + '_>>
        {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let body = self.body.clone();
            Box::pin(async move {
                Ok(RawResponse {
                    status: http::StatusCode::OK,
                    body,
                })
            })
        }
    }

    fn validator() -> (LaunchValidator, TokenCache) {
        validator_with_nonces(TokenCache::default())
    }

    fn validator_with_nonces(nonces: TokenCache) -> (LaunchValidator, TokenCache) {
        let platform = crate::keys::KeyMaterial::from_pem(
            PLATFORM_PRIVATE,
            PLATFORM_PUBLIC,
            crate::types::KeyId::new("platform-1"),
            crate::keys::SigningIdentity {
                issuer: "https://canvas.instructure.com".to_string(),
                client_id: ClientId::new("unused"),
            },
        )
        .unwrap();
        let transport = Arc::new(JwksTransport {
            body: serde_json::to_vec(&platform.jwk_set()).unwrap(),
            fetches: AtomicU32::new(0),
        });
        let caller = Arc::new(RemoteCaller::with_transport(
            transport,
            RetryPolicy::default(),
        ));
        let verifier = Arc::new(AssertionVerifier::new(caller, Duration::from_secs(60)));
        let validator = LaunchValidator::new(
            verifier,
            nonces.clone(),
            ClientId::new("abc"),
            "https://canvas.test/api/lti/security/jwks".to_string(),
        );
        (validator, nonces)
    }

    fn id_token(pem: &str, nonce: &str) -> String {
        id_token_expiring(pem, nonce, 300)
    }

    fn launch_claims(nonce: &str, exp_offset: i64) -> Value {
        let now = chrono::Utc::now().timestamp();
        serde_json::json!({
            "iss": "https://canvas.instructure.com",
            "aud": ["abc"],
            "sub": "u1",
            "nonce": nonce,
            "iat": now,
            "exp": now + exp_offset,
            "https://purl.imsglobal.org/spec/lti/claim/message_type": "LtiResourceLinkRequest",
            "https://purl.imsglobal.org/spec/lti/claim/deployment_id": "1:abc",
        })
    }

    fn id_token_expiring(pem: &str, nonce: &str, exp_offset: i64) -> String {
        let claims = launch_claims(nonce, exp_offset);
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some("platform-1".to_string());
        encode(
            &header,
            &claims,
            &EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_launch_succeeds_once() {
        let (validator, nonces) = validator();
        let state = nonces.issue().await;
        let nonce = nonces.issue_bound(state.clone()).await;
        let token = id_token(PLATFORM_PRIVATE, &nonce);
        let cancel = CancellationToken::new();

        let claims = validator
            .complete_launch(&token, &state, &cancel)
            .await
            .unwrap();
        assert_eq!(claims.sub, "u1");

        let replay = validator.complete_launch(&token, &state, &cancel).await;
        assert!(matches!(replay, Err(LaunchError::InvalidNonce)));
    }

    #[tokio::test]
    async fn test_unknown_nonce_rejected() {
        let (validator, _nonces) = validator();
        let token = id_token(PLATFORM_PRIVATE, "never-issued");

        let result = validator
            .complete_launch(&token, "whatever", &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(LaunchError::InvalidNonce)));
    }

    #[tokio::test]
    async fn test_state_mismatch_burns_nonce() {
        let (validator, nonces) = validator();
        let nonce = nonces.issue_bound("state-good").await;
        let token = id_token(PLATFORM_PRIVATE, &nonce);
        let cancel = CancellationToken::new();

        let result = validator.complete_launch(&token, "state-bad", &cancel).await;
        assert!(matches!(result, Err(LaunchError::InvalidState)));

        let retry = validator.complete_launch(&token, "state-good", &cancel).await;
        assert!(matches!(retry, Err(LaunchError::InvalidNonce)));
    }

    #[tokio::test]
    async fn test_bad_signature_never_reaches_nonce_check() {
        let (validator, nonces) = validator();
        let nonce = nonces.issue_bound("state-good").await;
        let forged = id_token(ROGUE_PRIVATE, &nonce);

        let result = validator
            .complete_launch(&forged, "state-good", &CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(LaunchError::Verify(VerifyError::InvalidAssertion(_)))
        ));

        // The forged attempt must not have redeemed the nonce.
        assert_eq!(nonces.take(&nonce).await.as_deref(), Some("state-good"));
    }

    #[tokio::test]
    async fn test_expired_assertion_never_reaches_nonce_check() {
        let (validator, nonces) = validator();
        let nonce = nonces.issue_bound("state-good").await;
        let expired = id_token_expiring(PLATFORM_PRIVATE, &nonce, -120);

        let result = validator
            .complete_launch(&expired, "state-good", &CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(LaunchError::Verify(VerifyError::InvalidAssertion(_)))
        ));

        assert_eq!(nonces.take(&nonce).await.as_deref(), Some("state-good"));
    }

    #[tokio::test]
    async fn test_unsigned_assertion_never_reaches_nonce_check() {
        use base64::Engine;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;

        let (validator, nonces) = validator();
        let nonce = nonces.issue_bound("state-good").await;
        let header = serde_json::json!({"alg": "none", "typ": "JWT", "kid": "platform-1"});
        let unsigned = format!(
            "{}.{}.",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(launch_claims(&nonce, 300).to_string()),
        );

        let result = validator
            .complete_launch(&unsigned, "state-good", &CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(LaunchError::Verify(VerifyError::InvalidAssertion(_)))
        ));

        assert_eq!(nonces.take(&nonce).await.as_deref(), Some("state-good"));
    }

    #[tokio::test]
    async fn test_expired_nonce_rejected() {
        let (validator, nonces) = validator_with_nonces(TokenCache::new(Duration::from_millis(20)));
        let nonce = nonces.issue_bound("state-good").await;
        let token = id_token(PLATFORM_PRIVATE, &nonce);

        tokio::time::sleep(Duration::from_millis(80)).await;

        let result = validator
            .complete_launch(&token, "state-good", &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(LaunchError::InvalidNonce)));
    }
}
