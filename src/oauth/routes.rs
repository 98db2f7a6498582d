//! Client-facing OAuth endpoints.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/oauth/authorize` | Start a flow, 302 to the provider |
//! | `GET`  | `/oauth/callback` | Provider callback, 302 back to the client |
//! | `POST` | `/oauth/token` | Exchange/rotate the authentication-session id |
//! | `GET`  | `/.well-known/oauth-authorization-server` | Discovery metadata |
//! | `POST` | `/oauth/register` | Dynamic registration (always accepted) |
//!
//! These routes are mounted **without** the bearer-auth middleware; they
//! are the authentication step. Failures carry RFC 6749 error bodies:
//! `{"error": "...", "error_description": "..."}`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use super::proxy::{BeginRequest, OAuthProxy};
use crate::Error;

/// Shared state for the OAuth routes.
pub struct OAuthRouterState {
    /// The proxy protocol handler
    pub proxy: Arc<OAuthProxy>,
    /// Externally visible base URL, used as the metadata issuer
    pub public_url: String,
}

/// Build the OAuth routes.
pub fn oauth_routes(state: Arc<OAuthRouterState>) -> Router {
    Router::new()
        .route("/oauth/authorize", get(authorize))
        .route("/oauth/callback", get(callback))
        .route("/oauth/token", post(token))
        .route("/oauth/register", post(register))
        .route(
            "/.well-known/oauth-authorization-server",
            get(server_metadata),
        )
        .with_state(state)
}

// ── Request / Response types ───────────────────────────────────────────────

/// Query parameters of `GET /oauth/authorize`.
#[derive(Debug, Deserialize)]
pub struct AuthorizeParams {
    #[serde(default)]
    response_type: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    redirect_uri: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    code_challenge: Option<String>,
    #[serde(default)]
    code_challenge_method: Option<String>,
}

/// Query parameters of `GET /oauth/callback`.
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Form body of `POST /oauth/token`.
#[derive(Debug, Deserialize)]
pub struct TokenRequestForm {
    #[serde(default)]
    grant_type: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Dynamic client registration request (RFC 7591). Every registration is
/// accepted; the proxy does not gate on client identity.
#[derive(Debug, Deserialize)]
pub struct RegistrationRequest {
    #[serde(default)]
    client_name: Option<String>,
    #[serde(default)]
    redirect_uris: Option<Vec<String>>,
}

/// Dynamic client registration response.
#[derive(Debug, Serialize)]
pub struct RegistrationResponse {
    client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_name: Option<String>,
    redirect_uris: Vec<String>,
    grant_types: Vec<String>,
    response_types: Vec<String>,
    token_endpoint_auth_method: String,
}

/// Authorization server metadata (RFC 8414), describing this proxy.
#[derive(Debug, Serialize)]
pub struct ServerMetadata {
    issuer: String,
    authorization_endpoint: String,
    token_endpoint: String,
    registration_endpoint: String,
    grant_types_supported: Vec<String>,
    response_types_supported: Vec<String>,
    code_challenge_methods_supported: Vec<String>,
    token_endpoint_auth_methods_supported: Vec<String>,
}

impl ServerMetadata {
    fn for_issuer(public_url: &str) -> Self {
        let base = public_url.trim_end_matches('/');
        Self {
            issuer: base.to_string(),
            authorization_endpoint: format!("{base}/oauth/authorize"),
            token_endpoint: format!("{base}/oauth/token"),
            registration_endpoint: format!("{base}/oauth/register"),
            grant_types_supported: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
            response_types_supported: vec!["code".to_string()],
            code_challenge_methods_supported: vec!["S256".to_string()],
            token_endpoint_auth_methods_supported: vec!["none".to_string()],
        }
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────

/// `GET /oauth/authorize` — start an authorization flow.
async fn authorize(
    State(state): State<Arc<OAuthRouterState>>,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    if let Some(ref response_type) = params.response_type
        && response_type != "code"
    {
        return error_response(
            StatusCode::BAD_REQUEST,
            "unsupported_response_type",
            "Only response_type=code is supported",
        );
    }

    if params.code_challenge.is_some()
        && params.code_challenge_method.as_deref().unwrap_or("S256") != "S256"
    {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "Only the S256 code challenge method is supported",
        );
    }

    let Some(redirect_uri) = params.redirect_uri else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "redirect_uri is required",
        );
    };

    let request = BeginRequest {
        client_id: params.client_id,
        redirect_uri,
        state: params.state,
        code_challenge: params.code_challenge,
    };

    match state.proxy.begin(&request) {
        Ok(url) => found(&url),
        Err(e) => oauth_error(&e),
    }
}

/// `GET /oauth/callback` — provider redirect target.
async fn callback(
    State(state): State<Arc<OAuthRouterState>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    // Prefer the provider's human-readable description when it sent one
    let error = params
        .error_description
        .as_deref()
        .or(params.error.as_deref());

    match state
        .proxy
        .complete(params.code.as_deref(), params.state.as_deref(), error)
        .await
    {
        Ok(url) => found(&url),
        Err(e) => oauth_error(&e),
    }
}

/// `POST /oauth/token` — token issuance and rotation.
async fn token(
    State(state): State<Arc<OAuthRouterState>>,
    axum::extract::Form(form): axum::extract::Form<TokenRequestForm>,
) -> Response {
    let Some(grant_type) = form.grant_type else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "grant_type is required",
        );
    };

    match state
        .proxy
        .issue_token(
            &grant_type,
            form.code.as_deref(),
            form.refresh_token.as_deref(),
        )
        .await
    {
        Ok(grant) => (StatusCode::OK, Json(grant)).into_response(),
        Err(e) => oauth_error(&e),
    }
}

/// `POST /oauth/register` — dynamic client registration, always accepted.
async fn register(Json(request): Json<RegistrationRequest>) -> Response {
    let response = RegistrationResponse {
        client_id: Uuid::new_v4().to_string(),
        client_name: request.client_name,
        redirect_uris: request.redirect_uris.unwrap_or_default(),
        grant_types: vec![
            "authorization_code".to_string(),
            "refresh_token".to_string(),
        ],
        response_types: vec!["code".to_string()],
        token_endpoint_auth_method: "none".to_string(),
    };

    (StatusCode::CREATED, Json(response)).into_response()
}

/// `GET /.well-known/oauth-authorization-server` — discovery metadata.
async fn server_metadata(State(state): State<Arc<OAuthRouterState>>) -> Response {
    Json(ServerMetadata::for_issuer(&state.public_url)).into_response()
}

// ── Helpers ───────────────────────────────────────────────────────────────

/// A 302 Found redirect.
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Map a crate error to its client-visible OAuth response.
fn oauth_error(err: &Error) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        warn!(error = %err, "OAuth endpoint failure");
    }
    error_response(status, err.oauth_code(), &err.to_string())
}

/// Create an RFC 6749 JSON error response.
fn error_response(status: StatusCode, error: &str, description: &str) -> Response {
    (
        status,
        Json(json!({"error": error, "error_description": description})),
    )
        .into_response()
}
