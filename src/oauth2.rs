//! OAuth2 authorization-code flow against the platform's REST API
//! (developer key credentials).

use std::fmt;
use std::sync::Arc;

use http::header::{self, HeaderMap, HeaderValue};
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::platform_base_url;
use crate::http_client::{RemoteCaller, RemoteError};
use crate::lti::{LoginError, LoginInitiator};
use crate::token_cache::TokenCache;
use crate::types::ClientId;

/// Developer key settings for the code grant.
#[derive(Debug, Clone)]
pub struct OAuth2Settings {
    pub domain: String,
    pub client_id: ClientId,
    pub client_secret: String,
    pub redirect_url: String,
}

/// Query parameters of the authorization redirect.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedirectParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformUser {
    pub id: i64,
    pub name: String,
}

/// Token endpoint response of the code exchange.
#[derive(Clone, Serialize, Deserialize)]
pub struct CodeExchange {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<PlatformUser>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub canvas_region: Option<String>,
}

impl fmt::Debug for CodeExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeExchange")
            .field("token_type", &self.token_type)
            .field("user", &self.user)
            .field("expires_in", &self.expires_in)
            .field("canvas_region", &self.canvas_region)
            .finish_non_exhaustive()
    }
}

pub struct OAuth2Client {
    settings: OAuth2Settings,
    login: LoginInitiator,
    states: TokenCache,
    caller: Arc<RemoteCaller>,
}

impl OAuth2Client {
    /// `states` must be the cache `login` issues OAuth2 states into.
    pub fn new(
        settings: OAuth2Settings,
        login: LoginInitiator,
        states: TokenCache,
        caller: Arc<RemoteCaller>,
    ) -> Self {
        Self {
            settings,
            login,
            states,
            caller,
        }
    }

    /// Where to send the user to authorize this developer key.
    pub async fn login_url(&self) -> Result<String, OAuth2Error> {
        self.login
            .build_oauth2_login_url(
                &self.settings.domain,
                self.settings.client_id.as_str(),
                &self.settings.redirect_url,
            )
            .await
            .map_err(OAuth2Error::Login)
    }

    /// Handle the authorization redirect: reject platform-reported errors,
    /// redeem `state`, then exchange `code` for tokens.
    pub async fn handle_redirect(
        &self,
        params: &RedirectParams,
        cancel: &CancellationToken,
    ) -> Result<CodeExchange, OAuth2Error> {
        if let Some(error) = params.error.as_deref().filter(|e| !e.is_empty()) {
            return Err(OAuth2Error::AuthorizationDenied {
                error: error.to_string(),
                description: params.error_description.clone().unwrap_or_default(),
            });
        }

        let state = params.state.as_deref().unwrap_or_default();
        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or(OAuth2Error::MissingCode)?;

        self.exchange_code(code, state, cancel).await
    }

    /// Redeem `state` and exchange `code` at the token endpoint.
    pub async fn exchange_code(
        &self,
        code: &str,
        state: &str,
        cancel: &CancellationToken,
    ) -> Result<CodeExchange, OAuth2Error> {
        if !self.states.consume(state).await {
            warn!("OAuth2 redirect rejected: unknown, expired or replayed state");
            return Err(OAuth2Error::InvalidState);
        }

        let url = format!(
            "{}/login/oauth2/token",
            platform_base_url(&self.settings.domain)
        );

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let body = serde_json::json!({
            "grant_type": "authorization_code",
            "client_id": self.settings.client_id.as_str(),
            "client_secret": self.settings.client_secret,
            "code": code,
            "redirect_uri": self.settings.redirect_url,
        });

        let exchange: CodeExchange = self
            .caller
            .call_json(Method::POST, &url, headers, Some(&body), cancel)
            .await
            .map_err(OAuth2Error::Remote)?;

        if let Some(user) = &exchange.user {
            info!("OAuth2 code exchanged for user {}", user.id);
        }

        Ok(exchange)
    }

    /// Profile of the user owning `access_token`.
    pub async fn user_info(
        &self,
        access_token: &str,
        cancel: &CancellationToken,
    ) -> Result<Value, OAuth2Error> {
        let url = format!(
            "{}/api/v1/users/self",
            platform_base_url(&self.settings.domain)
        );

        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", access_token))
            .map_err(|_| OAuth2Error::InvalidAccessToken)?;
        headers.insert(header::AUTHORIZATION, bearer);
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        self.caller
            .call_json(Method::GET, &url, headers, None, cancel)
            .await
            .map_err(OAuth2Error::Remote)
    }

    /// Refresh-token grant.
    pub async fn refresh(&self, _refresh_token: &str) -> Result<CodeExchange, OAuth2Error> {
        // TODO: implement the refresh_token grant once tokens are persisted
        // somewhere a later request can find them.
        Err(OAuth2Error::RefreshNotSupported)
    }
}

#[derive(Debug, Clone)]
pub enum OAuth2Error {
    /// The platform redirected back with an `error`.
    AuthorizationDenied { error: String, description: String },
    /// No authorization code in the redirect.
    MissingCode,
    /// `state` was never issued, expired, or already redeemed.
    InvalidState,
    /// Access token is not a valid header value.
    InvalidAccessToken,
    Login(LoginError),
    Remote(RemoteError),
    RefreshNotSupported,
}

impl fmt::Display for OAuth2Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthorizationDenied { error, description } => {
                write!(f, "Authorization failed ({}): {}", error, description)
            }
            Self::MissingCode => write!(f, "Missing authorization code"),
            Self::InvalidState => write!(f, "Invalid state"),
            Self::InvalidAccessToken => write!(f, "Invalid access token"),
            Self::Login(err) => write!(f, "{}", err),
            Self::Remote(err) => write!(f, "{}", err),
            Self::RefreshNotSupported => write!(f, "Token refresh is not supported"),
        }
    }
}

impl std::error::Error for OAuth2Error {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::RetryPolicy;
    use std::collections::HashMap;
    use wiremock::matchers::{body_string_contains, header as header_matcher, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(domain: &str) -> OAuth2Client {
        let states = TokenCache::default();
        let login = LoginInitiator::new(states.clone(), TokenCache::default());
        let caller = Arc::new(
            RemoteCaller::new(RetryPolicy {
                max_retries: 0,
                ..Default::default()
            })
            .unwrap(),
        );
        OAuth2Client::new(
            OAuth2Settings {
                domain: domain.to_string(),
                client_id: ClientId::new("170000000000001"),
                client_secret: "s3cret".to_string(),
                redirect_url: "https://tool.example.com/api/v1/oauth2/redirect".to_string(),
            },
            login,
            states,
            caller,
        )
    }

    fn state_of(url: &str) -> String {
        let params: HashMap<String, String> = url::Url::parse(url)
            .unwrap()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        params["state"].clone()
    }

    #[tokio::test]
    async fn test_full_code_flow() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login/oauth2/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=abc123"))
            .and(body_string_contains("client_secret=s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-1",
                "token_type": "Bearer",
                "refresh_token": "rt-1",
                "user": {"id": 42, "name": "Ada"},
                "expires_in": 3600,
                "canvas_region": "us-east-1"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/users/self"))
            .and(header_matcher("authorization", "Bearer at-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": 42, "name": "Ada"})),
            )
            .mount(&server)
            .await;

        let client = client(&server.uri());
        let state = state_of(&client.login_url().await.unwrap());
        let cancel = CancellationToken::new();

        let exchange = client
            .handle_redirect(
                &RedirectParams {
                    code: Some("abc123".to_string()),
                    state: Some(state.clone()),
                    ..Default::default()
                },
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(exchange.access_token, "at-1");
        assert_eq!(exchange.user.as_ref().unwrap().id, 42);

        let me = client.user_info(&exchange.access_token, &cancel).await.unwrap();
        assert_eq!(me["name"], "Ada");

        let replay = client.exchange_code("abc123", &state, &cancel).await;
        assert!(matches!(replay, Err(OAuth2Error::InvalidState)));
    }

    #[tokio::test]
    async fn test_platform_error_short_circuits() {
        let client = client("canvas.test");
        let result = client
            .handle_redirect(
                &RedirectParams {
                    error: Some("access_denied".to_string()),
                    error_description: Some("user said no".to_string()),
                    ..Default::default()
                },
                &CancellationToken::new(),
            )
            .await;

        match result {
            Err(OAuth2Error::AuthorizationDenied { error, description }) => {
                assert_eq!(error, "access_denied");
                assert_eq!(description, "user said no");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_state_rejected_before_exchange() {
        let client = client("canvas.test");
        let result = client
            .handle_redirect(
                &RedirectParams {
                    code: Some("abc123".to_string()),
                    state: Some("forged".to_string()),
                    ..Default::default()
                },
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(OAuth2Error::InvalidState)));
    }

    #[tokio::test]
    async fn test_missing_code() {
        let client = client("canvas.test");
        let result = client
            .handle_redirect(&RedirectParams::default(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(OAuth2Error::MissingCode)));
    }

    #[tokio::test]
    async fn test_refresh_not_supported() {
        let client = client("canvas.test");
        assert!(matches!(
            client.refresh("rt-1").await,
            Err(OAuth2Error::RefreshNotSupported)
        ));
    }
}
