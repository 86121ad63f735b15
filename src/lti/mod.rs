//! LTI 1.3 tool side of the platform handshake.
//!
//! - **Login**: answer the platform's third-party-initiated login with an
//!   OIDC authorization redirect carrying a fresh `state`/`nonce` pair
//! - **Launch**: verify the platform's signed `id_token` against its JWKS,
//!   then redeem the nonce it carries against the posted `state`
//! - **Service tokens**: sign a client assertion with our own key and
//!   exchange it for an access token
//!
//! Signature, audience and expiry checks always run before the nonce is
//! looked at, so a forged or stale assertion cannot burn a real nonce.

pub mod claims;
pub mod jwks;
mod launch;
mod login;
mod service_token;
mod verifier;

pub use claims::{Audience, LaunchClaims};
pub use jwks::{DEFAULT_JWKS_CACHE_SECONDS, JwksError, KeySetCache};
pub use launch::{LaunchError, LaunchValidator};
pub use login::{LoginError, LoginInitiator, OidcLoginRequest};
pub use service_token::{
    AccessTokenGrant, CLIENT_ASSERTION_TTL, ServiceTokenError, ServiceTokenIssuer,
};
pub use verifier::{AssertionVerifier, CLOCK_SKEW_LEEWAY_SECS, VerifyError};
