//! OAuth proxy protocol handler.
//!
//! Composes the provider adapter, token store, and CSRF state cache into
//! the authorize/callback/token dance. Two state machines meet here: the
//! per-flow one (pending authorization → tokens issued) and the issuance
//! one (code issued → exchanged → rotated), both keyed by the
//! authentication-session id the client holds in place of real provider
//! credentials.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use super::pending::{PendingAuthorization, StateCache};
use super::provider::{PkcePair, ProviderClient, generate_state};
use crate::store::{TokenStore, now_secs};
use crate::{Error, Result};

/// Mint an opaque authentication-session id.
///
/// The `mcpauth_` prefix makes issued credentials greppable and detectable
/// by secret scanners; the payload is 256 bits of entropy.
#[must_use]
pub fn mint_session_id() -> String {
    let random_bytes: [u8; 32] = rand::rng().random();
    format!("mcpauth_{}", URL_SAFE_NO_PAD.encode(random_bytes))
}

/// Parameters of an incoming `GET /oauth/authorize`.
#[derive(Debug, Clone)]
pub struct BeginRequest {
    /// Client identifier; accepted as-is (registration is open)
    pub client_id: Option<String>,
    /// Where the client wants the authorization code delivered
    pub redirect_uri: String,
    /// The client's own CSRF state, echoed back on hand-off
    pub state: Option<String>,
    /// The client's PKCE challenge, held for the hand-off
    pub code_challenge: Option<String>,
}

/// Successful `POST /oauth/token` response body.
#[derive(Debug, Clone, Serialize)]
pub struct TokenGrant {
    /// The authentication-session id, serving as the bearer credential
    pub access_token: String,
    /// The same id, accepted once at the token endpoint for rotation
    pub refresh_token: String,
    /// Always `"Bearer"`
    pub token_type: String,
    /// Remaining lifetime of the underlying provider grant, in seconds
    pub expires_in: u64,
}

/// The proxy-side authorization server.
pub struct OAuthProxy {
    provider: Arc<ProviderClient>,
    store: TokenStore,
    states: Arc<StateCache>,
}

impl OAuthProxy {
    /// Create a proxy over the given provider adapter, token store, and
    /// state cache.
    pub fn new(provider: Arc<ProviderClient>, store: TokenStore, states: Arc<StateCache>) -> Self {
        Self {
            provider,
            store,
            states,
        }
    }

    /// The token store backing this proxy.
    #[must_use]
    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Start an authorization flow.
    ///
    /// Stores a [`PendingAuthorization`] under a fresh local state value and
    /// returns the provider authorize URL the client must be redirected to.
    /// Stale pending flows are swept opportunistically on the way.
    pub fn begin(&self, request: &BeginRequest) -> Result<String> {
        let swept = self.states.sweep();
        if swept > 0 {
            debug!(count = swept, "Swept stale pending authorizations");
        }

        Url::parse(&request.redirect_uri)
            .map_err(|e| Error::InvalidRequest(format!("Invalid redirect_uri: {e}")))?;

        let pkce = PkcePair::generate();
        let state = generate_state();

        self.states.put(
            state.clone(),
            PendingAuthorization::new(
                pkce.verifier,
                request.redirect_uri.clone(),
                request.state.clone(),
                request.code_challenge.clone(),
            ),
        );

        debug!(
            client_id = request.client_id.as_deref().unwrap_or("<unregistered>"),
            pending = self.states.len(),
            "Authorization flow started"
        );

        self.provider.build_authorize_url(&state, &pkce.challenge)
    }

    /// Complete an authorization flow at the provider callback.
    ///
    /// The pending entry is consumed *before* anything else so the state
    /// value is burned regardless of outcome. On success the provider code
    /// is exchanged, a fresh authentication-session id is minted, the token
    /// record is stored under it, and the returned URL redirects the client
    /// to its original `redirect_uri` with the id as the `code` parameter.
    pub async fn complete(
        &self,
        code: Option<&str>,
        state: Option<&str>,
        error: Option<&str>,
    ) -> Result<String> {
        // Single use: burn the state first, independent of success or failure
        let pending = state.and_then(|s| self.states.consume(s));

        if let Some(denied) = error {
            warn!(error = %denied, "Provider denied authorization");
            return Err(Error::AuthorizationDenied(denied.to_string()));
        }

        let state = state.ok_or_else(|| Error::InvalidRequest("Missing state".to_string()))?;
        let pending = pending.ok_or_else(|| Error::InvalidState(state.to_string()))?;
        let code = code.ok_or_else(|| Error::InvalidRequest("Missing code".to_string()))?;

        let record = self.provider.exchange_code(code, &pending.verifier).await?;

        let session_id = mint_session_id();
        self.store.store(&session_id, &record).await?;
        info!(expires_at = record.expires_at, "Authentication session established");

        let mut redirect = Url::parse(&pending.client_redirect_uri)
            .map_err(|e| Error::InvalidRequest(format!("Invalid client redirect_uri: {e}")))?;
        {
            let mut params = redirect.query_pairs_mut();
            params.append_pair("code", &session_id);
            if let Some(ref client_state) = pending.client_state {
                params.append_pair("state", client_state);
            }
        }

        Ok(redirect.into())
    }

    /// Issue a bearer credential at the proxy token endpoint.
    pub async fn issue_token(
        &self,
        grant_type: &str,
        code: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<TokenGrant> {
        match grant_type {
            "authorization_code" => self.issue_for_code(code).await,
            "refresh_token" => self.rotate(refresh_token).await,
            other => Err(Error::UnsupportedGrantType(other.to_string())),
        }
    }

    /// `authorization_code` grant: the "code" is an authentication-session
    /// id minted by [`complete`](Self::complete); hand it back as the bearer
    /// credential once the underlying tokens check out.
    async fn issue_for_code(&self, code: Option<&str>) -> Result<TokenGrant> {
        let code = code.ok_or_else(|| Error::InvalidRequest("code is required".to_string()))?;

        if !self.store.has(code).await? {
            return Err(Error::InvalidGrant(
                "Unknown or expired authorization code".to_string(),
            ));
        }

        if self.store.get_access_token(code).await?.is_none() {
            return Err(Error::InvalidGrant(
                "Authorization code no longer resolves to valid tokens".to_string(),
            ));
        }

        debug!("Issued bearer credential for authorization code");
        self.grant_for(code).await
    }

    /// `refresh_token` grant: single-use rotation. The old id's record is
    /// copied under a freshly minted id and only then deleted, so there is
    /// no window in which neither id resolves.
    async fn rotate(&self, refresh_token: Option<&str>) -> Result<TokenGrant> {
        let old_id = refresh_token
            .ok_or_else(|| Error::InvalidRequest("refresh_token is required".to_string()))?;

        if !self.store.has(old_id).await? {
            return Err(Error::InvalidGrant(
                "Unknown or already-rotated refresh token".to_string(),
            ));
        }

        self.store.refresh_if_needed(old_id).await?;

        let record = self.store.get_tokens(old_id).await?.ok_or_else(|| {
            Error::InvalidGrant("Refresh token no longer resolves to valid tokens".to_string())
        })?;

        let new_id = mint_session_id();
        self.store.store(&new_id, &record).await?;
        self.store.delete(old_id).await?;
        info!("Rotated authentication session");

        self.grant_for(&new_id).await
    }

    async fn grant_for(&self, id: &str) -> Result<TokenGrant> {
        let expires_in = self
            .store
            .expiry(id)
            .await?
            .map_or(0, |at| at.saturating_sub(now_secs()));

        Ok(TokenGrant {
            access_token: id.to_string(),
            refresh_token: id.to_string(),
            token_type: "Bearer".to_string(),
            expires_in,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_ids_are_prefixed_and_unique() {
        let a = mint_session_id();
        let b = mint_session_id();
        assert!(a.starts_with("mcpauth_"));
        assert!(a.len() > 40);
        assert_ne!(a, b);
    }

    #[test]
    fn minted_ids_are_url_safe() {
        let id = mint_session_id();
        assert!(!id.contains('+'));
        assert!(!id.contains('/'));
        assert!(!id.contains('='));
    }
}
