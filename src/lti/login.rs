//! Authorization redirect URLs for the OAuth2 code grant and the
//! third-party-initiated OIDC login (LTI 1.3).
//!
//! Building a URL issues the single-use tokens the callback later redeems:
//! `state` for the code grant, and a `nonce` bound to its `state` for the
//! OIDC login.

use std::fmt;

use url::Url;

use crate::token_cache::{TokenCache, new_token};

/// Path of the platform's OIDC authorization endpoint, relative to its issuer.
pub const OIDC_AUTHORIZE_PATH: &str = "/api/lti/authorize_redirect";

/// Path of the platform's OAuth2 authorization endpoint.
pub const OAUTH2_AUTHORIZE_PATH: &str = "/login/oauth2/auth";

/// Parameters of an OIDC login initiation.
#[derive(Debug, Clone)]
pub struct OidcLoginRequest<'a> {
    pub issuer_base_url: &'a str,
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub login_hint: &'a str,
    pub message_hint: Option<&'a str>,
}

/// Builds authorization redirects and issues the tokens that bind them.
#[derive(Clone)]
pub struct LoginInitiator {
    states: TokenCache,
    nonces: TokenCache,
}

impl LoginInitiator {
    /// `states` backs the OAuth2 code grant, `nonces` the OIDC login.
    pub fn new(states: TokenCache, nonces: TokenCache) -> Self {
        Self { states, nonces }
    }

    /// Authorization URL for the OAuth2 code grant against `issuer_domain`.
    pub async fn build_oauth2_login_url(
        &self,
        issuer_domain: &str,
        client_id: &str,
        redirect_uri: &str,
    ) -> Result<String, LoginError> {
        let mut url = base_url(issuer_domain)?;
        url.set_path(OAUTH2_AUTHORIZE_PATH);

        let state = self.states.issue().await;
        url.query_pairs_mut()
            .append_pair("client_id", client_id)
            .append_pair("response_type", "code")
            .append_pair("state", &state)
            .append_pair("redirect_uri", redirect_uri);

        Ok(url.into())
    }

    /// Authorization URL answering a platform-initiated OIDC login.
    pub async fn build_oidc_login_url(
        &self,
        request: &OidcLoginRequest<'_>,
    ) -> Result<String, LoginError> {
        let mut url = base_url(request.issuer_base_url)?;
        let path = format!("{}{}", url.path().trim_end_matches('/'), OIDC_AUTHORIZE_PATH);
        url.set_path(&path);

        // The state has no entry of its own; the nonce entry carries it.
        let state = new_token();
        let nonce = self.nonces.issue_bound(state.clone()).await;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("scope", "openid")
                .append_pair("response_type", "id_token")
                .append_pair("client_id", request.client_id)
                .append_pair("redirect_uri", request.redirect_uri)
                .append_pair("login_hint", request.login_hint);
            if let Some(hint) = request.message_hint {
                query.append_pair("lti_message_hint", hint);
            }
            query
                .append_pair("state", &state)
                .append_pair("response_mode", "form_post")
                .append_pair("nonce", &nonce)
                .append_pair("prompt", "none");
        }

        Ok(url.into())
    }
}

/// Accepts `canvas.example.com` as well as `https://canvas.example.com`.
fn base_url(issuer: &str) -> Result<Url, LoginError> {
    let issuer = issuer.trim();
    if issuer.is_empty() {
        return Err(LoginError::InvalidIssuer("empty issuer".to_string()));
    }

    let candidate = if issuer.contains("://") {
        issuer.to_string()
    } else {
        format!("https://{}", issuer)
    };

    let url = Url::parse(&candidate)
        .map_err(|e| LoginError::InvalidIssuer(format!("{}: {}", issuer, e)))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(LoginError::InvalidIssuer(issuer.to_string()));
    }
    Ok(url)
}

#[derive(Debug, Clone)]
pub enum LoginError {
    /// The issuer could not be turned into an authorization endpoint.
    InvalidIssuer(String),
}

impl fmt::Display for LoginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidIssuer(msg) => write!(f, "Invalid issuer: {}", msg),
        }
    }
}

impl std::error::Error for LoginError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn query(url: &str) -> HashMap<String, String> {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[tokio::test]
    async fn test_oauth2_login_url() {
        let states = TokenCache::default();
        let login = LoginInitiator::new(states.clone(), TokenCache::default());

        let url = login
            .build_oauth2_login_url(
                "canvas.test",
                "170000000000001",
                "https://tool.example.com/api/v1/oauth2/redirect",
            )
            .await
            .unwrap();

        assert!(url.starts_with("https://canvas.test/login/oauth2/auth?"));
        let params = query(&url);
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "170000000000001");
        assert_eq!(
            params["redirect_uri"],
            "https://tool.example.com/api/v1/oauth2/redirect"
        );
        assert!(states.consume(&params["state"]).await);
    }

    #[tokio::test]
    async fn test_oidc_login_url_binds_nonce_to_state() {
        let nonces = TokenCache::default();
        let login = LoginInitiator::new(TokenCache::default(), nonces.clone());

        let url = login
            .build_oidc_login_url(&OidcLoginRequest {
                issuer_base_url: "https://canvas.instructure.com",
                client_id: "abc",
                redirect_uri: "https://tool.example.com/api/v1/lti/launch",
                login_hint: "u1",
                message_hint: Some("hint & more"),
            })
            .await
            .unwrap();

        assert!(url.starts_with("https://canvas.instructure.com/api/lti/authorize_redirect?"));
        let params = query(&url);
        assert_eq!(params["scope"], "openid");
        assert_eq!(params["response_type"], "id_token");
        assert_eq!(params["response_mode"], "form_post");
        assert_eq!(params["prompt"], "none");
        assert_eq!(params["login_hint"], "u1");
        assert_eq!(params["lti_message_hint"], "hint & more");
        assert_ne!(params["state"], params["nonce"]);

        // Only the nonce is redeemable, and it yields the state.
        assert_eq!(nonces.len().await, 1);
        assert_eq!(
            nonces.take(&params["nonce"]).await,
            Some(params["state"].clone())
        );
    }

    #[tokio::test]
    async fn test_oidc_login_without_message_hint() {
        let login = LoginInitiator::new(TokenCache::default(), TokenCache::default());
        let url = login
            .build_oidc_login_url(&OidcLoginRequest {
                issuer_base_url: "canvas.test/",
                client_id: "abc",
                redirect_uri: "https://tool.example.com/launch",
                login_hint: "u1",
                message_hint: None,
            })
            .await
            .unwrap();

        assert!(url.starts_with("https://canvas.test/api/lti/authorize_redirect?"));
        assert!(!query(&url).contains_key("lti_message_hint"));
    }

    #[tokio::test]
    async fn test_invalid_issuer_rejected() {
        let login = LoginInitiator::new(TokenCache::default(), TokenCache::default());
        let result = login
            .build_oauth2_login_url("", "client", "https://tool.example.com/cb")
            .await;
        assert!(matches!(result, Err(LoginError::InvalidIssuer(_))));

        let result = login
            .build_oauth2_login_url("ftp://canvas.test", "client", "https://tool.example.com/cb")
            .await;
        assert!(matches!(result, Err(LoginError::InvalidIssuer(_))));
    }
}
