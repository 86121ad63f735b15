pub mod api;
pub mod config;
pub mod error;
pub mod http_client;
pub mod keys;
pub mod lti;
pub mod oauth2;
pub mod token_cache;
pub mod types;

pub use config::AppConfig;
pub use error::{AppError, Envelope, ErrorKind};
pub use http_client::{RemoteCaller, RemoteError, RetryPolicy};
pub use keys::{KeyMaterial, SigningIdentity};
pub use token_cache::TokenCache;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use lti::{AssertionVerifier, LaunchValidator, LoginInitiator, ServiceTokenIssuer};
use oauth2::{OAuth2Client, OAuth2Settings};
use types::{ClientId, KeyId, Scope};

/// Settings the handlers read on every request.
#[derive(Debug, Clone)]
pub struct LtiSettings {
    pub client_id: ClientId,
    pub launch_url: String,
    pub platform_issuer: Option<String>,
    pub service_scope: Scope,
    pub token_url: String,
}

/// Every long-lived component, built once and shared by all requests.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<LtiSettings>,
    pub keys: Arc<KeyMaterial>,
    pub login: LoginInitiator,
    pub launch: Arc<LaunchValidator>,
    pub service_tokens: Arc<ServiceTokenIssuer>,
    pub oauth2: Arc<OAuth2Client>,
    nonces: TokenCache,
    oauth2_states: TokenCache,
    shutdown: CancellationToken,
}

impl AppState {
    /// Composition root. Fails if the key pair cannot be loaded or the HTTP
    /// client cannot be constructed.
    pub fn build(config: &AppConfig, shutdown: CancellationToken) -> Result<Self> {
        let identity = SigningIdentity {
            issuer: config.lti_issuer.clone(),
            client_id: ClientId::new(config.lti_client_id.as_str()),
        };
        let keys = KeyMaterial::load(
            &config.private_key_path,
            &config.public_key_path,
            KeyId::new(config.lti_jwk_kid.as_str()),
            identity,
        )
        .context("Failed to load key material")?;
        info!("Loaded signing key {}", keys.key_id());

        let caller = Arc::new(
            RemoteCaller::new(config.retry_policy()).context("Failed to build HTTP client")?,
        );

        Ok(Self::from_parts(config, Arc::new(keys), caller, shutdown))
    }

    /// Assemble the state from an already loaded key pair and caller.
    pub fn from_parts(
        config: &AppConfig,
        keys: Arc<KeyMaterial>,
        caller: Arc<RemoteCaller>,
        shutdown: CancellationToken,
    ) -> Self {
        let nonces = TokenCache::default();
        let oauth2_states = TokenCache::default();
        let login = LoginInitiator::new(oauth2_states.clone(), nonces.clone());

        let verifier = Arc::new(
            AssertionVerifier::new(caller.clone(), config.jwks_cache_ttl())
                .with_expected_issuer(config.lti_platform_issuer.clone()),
        );
        let launch = Arc::new(LaunchValidator::new(
            verifier,
            nonces.clone(),
            ClientId::new(config.lti_client_id.as_str()),
            config.platform_jwks_url(),
        ));

        let service_tokens = Arc::new(ServiceTokenIssuer::new(keys.clone(), caller.clone()));

        let oauth2 = Arc::new(OAuth2Client::new(
            OAuth2Settings {
                domain: config.canvas_domain.clone(),
                client_id: ClientId::new(config.api_key_client_id.as_str()),
                client_secret: config.api_key_secret.clone(),
                redirect_url: config.api_key_redirect_url.clone(),
            },
            login.clone(),
            oauth2_states.clone(),
            caller,
        ));

        let settings = Arc::new(LtiSettings {
            client_id: ClientId::new(config.lti_client_id.as_str()),
            launch_url: config.lti_launch_url.clone(),
            platform_issuer: config.lti_platform_issuer.clone(),
            service_scope: Scope::new(config.lti_service_scope.as_str()),
            token_url: config.platform_token_url(),
        });

        Self {
            settings,
            keys,
            login,
            launch,
            service_tokens,
            oauth2,
            nonces,
            oauth2_states,
            shutdown,
        }
    }

    /// Token for one request: cancelled on shutdown, never cancels siblings.
    pub fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Start background eviction of expired nonces and states.
    pub fn spawn_sweepers(&self, interval: Duration) -> Vec<JoinHandle<()>> {
        vec![
            self.nonces.spawn_sweeper(interval, self.shutdown.clone()),
            self.oauth2_states.spawn_sweeper(interval, self.shutdown.clone()),
        ]
    }
}
