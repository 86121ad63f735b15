// REST endpoints: OAuth2 code grant and the LTI 1.3 handshake.

use axum::{
    Form, Router,
    extract::{
        Query, State,
        rejection::{FormRejection, QueryRejection},
    },
    response::{Json, Redirect},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::AppState;
use crate::error::{AppError, Envelope};
use crate::keys::JwkSet;
use crate::lti::{AccessTokenGrant, LaunchClaims, OidcLoginRequest};
use crate::oauth2::RedirectParams;

/// Form posted by the platform to start a third-party-initiated login.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LtiLoginForm {
    pub iss: String,
    pub login_hint: String,
    pub client_id: String,
    pub lti_deployment_id: String,
    pub target_link_uri: String,
    pub lti_message_hint: String,
    pub canvas_environment: String,
    pub canvas_region: String,
    pub lti_storage_target: String,
}

/// Form posted by the platform to the launch URL.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LtiLaunchForm {
    pub utf8: String,
    pub authenticity_token: String,
    pub id_token: String,
    pub state: String,
    pub lti_storage_target: String,
    pub error: String,
    pub error_description: String,
}

pub fn create_router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/ping", get(ping))
        .route("/oauth2/login", get(oauth2_login))
        .route("/oauth2/redirect", get(oauth2_redirect))
        .route("/lti/login", post(lti_login))
        .route("/lti/launch", post(lti_launch))
        .route("/lti/jwks", get(jwks))
        .route("/lti/access_token", get(access_token));

    Router::new()
        .nest("/api/v1", v1)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn ping() -> &'static str {
    "pong"
}

async fn oauth2_login(State(state): State<AppState>) -> Result<Redirect, AppError> {
    let url = state.oauth2.login_url().await?;
    Ok(Redirect::temporary(&url))
}

async fn oauth2_redirect(
    State(state): State<AppState>,
    params: Result<Query<RedirectParams>, QueryRejection>,
) -> Result<Json<Envelope<Value>>, AppError> {
    let Query(params) = params?;
    let cancel = state.request_token();

    let exchange = state.oauth2.handle_redirect(&params, &cancel).await?;
    let user = state
        .oauth2
        .user_info(&exchange.access_token, &cancel)
        .await?;

    Ok(Json(Envelope::ok(
        "Successfully exchanged code for access token",
        user,
    )))
}

async fn lti_login(
    State(state): State<AppState>,
    form: Result<Form<LtiLoginForm>, FormRejection>,
) -> Result<Redirect, AppError> {
    let Form(form) = form?;
    let settings = &state.settings;

    if form.client_id != settings.client_id.as_str() {
        warn!("LTI login rejected: unexpected client_id {}", form.client_id);
        return Err(AppError::bad_request("invalid client_id"));
    }
    if let Some(expected) = &settings.platform_issuer {
        if form.iss != *expected {
            warn!("LTI login rejected: unexpected issuer {}", form.iss);
            return Err(AppError::bad_request("invalid iss"));
        }
    }
    if form.login_hint.is_empty() {
        return Err(AppError::bad_request("missing login_hint"));
    }

    let message_hint = Some(form.lti_message_hint.as_str()).filter(|h| !h.is_empty());
    let url = state
        .login
        .build_oidc_login_url(&OidcLoginRequest {
            issuer_base_url: &form.iss,
            client_id: &form.client_id,
            redirect_uri: &settings.launch_url,
            login_hint: &form.login_hint,
            message_hint,
        })
        .await?;

    info!(
        "LTI login for deployment {} redirected to platform",
        form.lti_deployment_id
    );
    Ok(Redirect::temporary(&url))
}

async fn lti_launch(
    State(state): State<AppState>,
    form: Result<Form<LtiLaunchForm>, FormRejection>,
) -> Result<Json<Envelope<LaunchClaims>>, AppError> {
    let Form(form) = form?;
    if !form.error.is_empty() {
        warn!("LTI launch reported error by platform: {}", form.error);
        return Err(AppError::bad_request(form.error).with_detail(form.error_description));
    }
    if form.id_token.is_empty() {
        return Err(AppError::bad_request("missing id_token"));
    }

    let cancel = state.request_token();
    let claims = state
        .launch
        .complete_launch(&form.id_token, &form.state, &cancel)
        .await?;

    info!(
        "LTI launch accepted for subject {} in deployment {}",
        claims.sub, claims.deployment_id
    );
    Ok(Json(Envelope::ok("LTI launch", claims)))
}

async fn jwks(State(state): State<AppState>) -> Json<JwkSet> {
    Json(state.keys.jwk_set())
}

async fn access_token(
    State(state): State<AppState>,
) -> Result<Json<Envelope<AccessTokenGrant>>, AppError> {
    let cancel = state.request_token();
    let grant = state
        .service_tokens
        .request_service_token(
            &state.settings.token_url,
            &state.settings.service_scope,
            &cancel,
        )
        .await?;

    Ok(Json(Envelope::ok("LTI access token", grant)))
}
