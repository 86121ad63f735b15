use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::http_client::RetryPolicy;
use crate::lti::DEFAULT_JWKS_CACHE_SECONDS;

pub const DEFAULT_SERVICE_SCOPE: &str = "https://purl.imsglobal.org/spec/lti/scope/noticehandlers";

/// Process configuration. Every flag can also be set from the environment.
#[derive(Debug, Clone, Args)]
pub struct AppConfig {
    /// Listen address
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
    pub bind: SocketAddr,

    /// LMS host; token, JWKS and user endpoints derive from it
    #[arg(long, env = "CANVAS_DOMAIN")]
    pub canvas_domain: String,

    /// `iss` of outbound client assertions
    #[arg(long, env = "CANVAS_LTI_ISSUER")]
    pub lti_issuer: String,

    /// Key id published in the JWKS
    #[arg(long, env = "CANVAS_LTI_JWK_KID")]
    pub lti_jwk_kid: String,

    /// LTI developer key id (expected launch audience)
    #[arg(long, env = "CANVAS_LTI_CLIENT_ID")]
    pub lti_client_id: String,

    /// Where the platform posts the id_token
    #[arg(long, env = "CANVAS_LTI_LAUNCH_URL")]
    pub lti_launch_url: String,

    /// If set, login and launch `iss` must equal it
    #[arg(long, env = "CANVAS_LTI_PLATFORM_ISSUER")]
    pub lti_platform_issuer: Option<String>,

    /// Scope requested for service access tokens
    #[arg(long, env = "CANVAS_LTI_SERVICE_SCOPE", default_value = DEFAULT_SERVICE_SCOPE)]
    pub lti_service_scope: String,

    /// OAuth2 developer key id
    #[arg(long, env = "CANVAS_API_KEY_CLIENT_ID")]
    pub api_key_client_id: String,

    /// OAuth2 developer key secret
    #[arg(long, env = "CANVAS_API_KEY_SECRET", hide_env_values = true)]
    pub api_key_secret: String,

    /// OAuth2 redirect URI
    #[arg(long, env = "CANVAS_API_KEY_REDIRECT_URL")]
    pub api_key_redirect_url: String,

    /// PEM private key (PKCS#8 or PKCS#1)
    #[arg(long, env = "PRIVATE_KEY_PATH")]
    pub private_key_path: PathBuf,

    /// PEM public key (SPKI or PKCS#1)
    #[arg(long, env = "PUBLIC_KEY_PATH")]
    pub public_key_path: PathBuf,

    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 10)]
    pub http_timeout_secs: u64,

    /// Retries after the first attempt
    #[arg(long, env = "HTTP_MAX_RETRIES", default_value_t = 3)]
    pub http_max_retries: u32,

    #[arg(long, env = "HTTP_RETRY_WAIT_MS", default_value_t = 1000)]
    pub http_retry_wait_ms: u64,

    #[arg(long, env = "HTTP_MAX_RETRY_WAIT_MS", default_value_t = 10_000)]
    pub http_max_retry_wait_ms: u64,

    /// Platform key set cache lifetime; 0 disables caching
    #[arg(long, env = "JWKS_CACHE_SECS", default_value_t = DEFAULT_JWKS_CACHE_SECONDS)]
    pub jwks_cache_secs: u64,
}

impl AppConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(self.http_timeout_secs),
            max_retries: self.http_max_retries,
            base_wait: Duration::from_millis(self.http_retry_wait_ms),
            max_wait: Duration::from_millis(self.http_max_retry_wait_ms),
        }
    }

    pub fn jwks_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.jwks_cache_secs)
    }

    pub fn platform_base_url(&self) -> String {
        platform_base_url(&self.canvas_domain)
    }

    /// The platform's published key set.
    pub fn platform_jwks_url(&self) -> String {
        format!("{}/api/lti/security/jwks", self.platform_base_url())
    }

    pub fn platform_token_url(&self) -> String {
        format!("{}/login/oauth2/token", self.platform_base_url())
    }
}

/// `https://{domain}` unless `domain` already carries a scheme.
pub fn platform_base_url(domain: &str) -> String {
    let domain = domain.trim().trim_end_matches('/');
    if domain.contains("://") {
        domain.to_string()
    } else {
        format!("https://{}", domain)
    }
}
