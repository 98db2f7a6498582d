//! Identity-provider client adapter.
//!
//! Stateless operations against the external OAuth2 authorization server
//! (Cognito-class): authorize-URL construction, authorization-code exchange,
//! refresh, and optional revocation, plus the PKCE and CSRF-state
//! generation primitives. All back-channel calls authenticate with HTTP
//! Basic client credentials and surface the provider's machine-readable
//! error code on failure.

use std::collections::HashMap;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use url::Url;

use crate::config::ProviderConfig;
use crate::store::TokenRecord;
use crate::{Error, Result};

/// Back-channel request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// PKCE code verifier and S256 challenge pair.
#[derive(Debug, Clone)]
pub struct PkcePair {
    /// The secret verifier, sent on code exchange
    pub verifier: String,
    /// SHA-256 challenge, sent on the authorize redirect
    pub challenge: String,
}

impl PkcePair {
    /// Generate a fresh pair (32 random bytes, base64url, S256).
    #[must_use]
    pub fn generate() -> Self {
        let verifier_bytes: [u8; 32] = rand::rng().random();
        let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);

        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

        Self {
            verifier,
            challenge,
        }
    }
}

/// Generate a cryptographically random CSRF state value.
#[must_use]
pub fn generate_state() -> String {
    let state_bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(state_bytes)
}

/// Provider token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Provider error body (RFC 6749 §5.2)
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Map a failed provider response body to a descriptive error.
fn parse_error_body(status: reqwest::StatusCode, body: &str) -> Error {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => Error::provider(
            parsed.error,
            parsed
                .error_description
                .unwrap_or_else(|| format!("HTTP {status}")),
        ),
        Err(_) => Error::provider("server_error", format!("HTTP {status}: {body}")),
    }
}

/// Stateless client for the external identity provider.
pub struct ProviderClient {
    http: Client,
    config: ProviderConfig,
    /// The proxy's own callback URL, registered with the provider
    redirect_uri: String,
}

impl ProviderClient {
    /// Create a client from provider configuration and the proxy callback
    /// URL.
    pub fn new(config: ProviderConfig, redirect_uri: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            config,
            redirect_uri,
        })
    }

    /// The provider authorize URL parameterized with our state and PKCE
    /// challenge.
    pub fn build_authorize_url(&self, state: &str, code_challenge: &str) -> Result<String> {
        let mut url = Url::parse(&self.config.authorize_endpoint)
            .map_err(|e| Error::Config(format!("Invalid authorize endpoint: {e}")))?;

        {
            let mut params = url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &self.config.client_id);
            params.append_pair("redirect_uri", &self.redirect_uri);
            params.append_pair("state", state);
            params.append_pair("code_challenge", code_challenge);
            params.append_pair("code_challenge_method", "S256");

            if !self.config.scopes.is_empty() {
                params.append_pair("scope", &self.config.scopes.join(" "));
            }
        }

        Ok(url.into())
    }

    /// Exchange an authorization code (plus PKCE verifier) for tokens.
    pub async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<TokenRecord> {
        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("redirect_uri", &self.redirect_uri);
        params.insert("code_verifier", code_verifier);

        let response = self.token_request(&params).await?;
        debug!("Exchanged authorization code at provider");

        Ok(TokenRecord::from_response(
            response.access_token,
            response.refresh_token,
            response.id_token,
            response.expires_in,
        ))
    }

    /// Refresh tokens with the given refresh token.
    ///
    /// The old refresh token is carried forward when the provider does not
    /// rotate it, so the new record stays refreshable.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenRecord> {
        let mut params = HashMap::new();
        params.insert("grant_type", "refresh_token");
        params.insert("refresh_token", refresh_token);

        let response = self.token_request(&params).await?;
        info!("Refreshed provider tokens");

        Ok(TokenRecord::from_response(
            response.access_token,
            response
                .refresh_token
                .or_else(|| Some(refresh_token.to_string())),
            response.id_token,
            response.expires_in,
        ))
    }

    /// Revoke a token at the provider, when a revocation endpoint is
    /// configured. A no-op otherwise.
    pub async fn revoke(&self, token: &str) -> Result<()> {
        let Some(ref endpoint) = self.config.revocation_endpoint else {
            return Ok(());
        };

        let mut params = HashMap::new();
        params.insert("token", token);

        let response = self
            .http
            .post(endpoint)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(parse_error_body(status, &body));
        }

        debug!("Revoked token at provider");
        Ok(())
    }

    /// Credentialed POST to the provider token endpoint.
    async fn token_request(&self, params: &HashMap<&str, &str>) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.config.token_endpoint)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(parse_error_body(status, &body));
        }

        response.json().await.map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ProviderConfig {
        ProviderConfig {
            client_id: "proxy-client".to_string(),
            client_secret: "s3cret".to_string(),
            authorize_endpoint: "https://idp.example.com/oauth2/authorize".to_string(),
            token_endpoint: "https://idp.example.com/oauth2/token".to_string(),
            revocation_endpoint: None,
            scopes: vec!["openid".to_string(), "email".to_string()],
        }
    }

    // =========================================================================
    // PKCE generation
    // =========================================================================

    #[test]
    fn pkce_challenge_is_sha256_of_verifier() {
        let pkce = PkcePair::generate();
        let mut hasher = Sha256::new();
        hasher.update(pkce.verifier.as_bytes());
        let expected = URL_SAFE_NO_PAD.encode(hasher.finalize());
        assert_eq!(pkce.challenge, expected);
    }

    #[test]
    fn pkce_values_are_base64url_safe() {
        for _ in 0..10 {
            let pkce = PkcePair::generate();
            for value in [&pkce.verifier, &pkce.challenge] {
                assert!(!value.contains('+'));
                assert!(!value.contains('/'));
                assert!(!value.contains('='));
            }
            // RFC 7636 requires at least 43 characters
            assert!(pkce.verifier.len() >= 43);
        }
    }

    #[test]
    fn pkce_generates_unique_pairs() {
        let a = PkcePair::generate();
        let b = PkcePair::generate();
        assert_ne!(a.verifier, b.verifier);
        assert_ne!(a.challenge, b.challenge);
    }

    // =========================================================================
    // State generation
    // =========================================================================

    #[test]
    fn state_is_unique_and_url_safe() {
        let s1 = generate_state();
        let s2 = generate_state();
        assert_ne!(s1, s2);
        assert!(s1.len() >= 20);
        assert!(!s1.contains('+'));
        assert!(!s1.contains('/'));
        assert!(!s1.contains('='));
    }

    // =========================================================================
    // Authorize URL
    // =========================================================================

    #[test]
    fn authorize_url_carries_all_parameters() {
        let client = ProviderClient::new(
            test_config(),
            "https://proxy.example.com/oauth/callback".to_string(),
        )
        .unwrap();

        let url = client.build_authorize_url("st4te", "ch4llenge").unwrap();
        let parsed = Url::parse(&url).unwrap();
        let params: HashMap<String, String> = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        assert!(url.starts_with("https://idp.example.com/oauth2/authorize?"));
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "proxy-client");
        assert_eq!(
            params["redirect_uri"],
            "https://proxy.example.com/oauth/callback"
        );
        assert_eq!(params["state"], "st4te");
        assert_eq!(params["code_challenge"], "ch4llenge");
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["scope"], "openid email");
    }

    #[test]
    fn authorize_url_omits_empty_scope() {
        let mut config = test_config();
        config.scopes.clear();
        let client = ProviderClient::new(config, "http://localhost/cb".to_string()).unwrap();

        let url = client.build_authorize_url("s", "c").unwrap();
        assert!(!url.contains("scope="));
    }

    // =========================================================================
    // Provider error mapping
    // =========================================================================

    #[test]
    fn error_body_maps_to_provider_error() {
        let err = parse_error_body(
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"Refresh token revoked"}"#,
        );
        match err {
            Error::Provider {
                code,
                description,
            } => {
                assert_eq!(code, "invalid_grant");
                assert_eq!(description, "Refresh token revoked");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn error_body_without_description_uses_status() {
        let err = parse_error_body(
            reqwest::StatusCode::UNAUTHORIZED,
            r#"{"error":"invalid_client"}"#,
        );
        match err {
            Error::Provider { code, description } => {
                assert_eq!(code, "invalid_client");
                assert!(description.contains("401"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unparseable_error_body_falls_back_to_server_error() {
        let err = parse_error_body(reqwest::StatusCode::BAD_GATEWAY, "<html>oops</html>");
        match err {
            Error::Provider { code, description } => {
                assert_eq!(code, "server_error");
                assert!(description.contains("502"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
