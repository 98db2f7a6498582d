//! OAuth proxy — authorization server to the client, OAuth client to the
//! real identity provider.
//!
//! The flow, end to end:
//!
//! 1. `GET /oauth/authorize` — [`proxy::OAuthProxy::begin`] stores a
//!    [`pending::PendingAuthorization`] under a fresh CSRF state value and
//!    redirects the client to the provider.
//! 2. `GET /oauth/callback` — [`proxy::OAuthProxy::complete`] consumes the
//!    state (single use), exchanges the code, mints an
//!    authentication-session id, and redirects back to the client with that
//!    id as the authorization `code`.
//! 3. `POST /oauth/token` — [`proxy::OAuthProxy::issue_token`] hands the id
//!    back as both access and refresh token; the client never sees the
//!    provider's real credentials. Refresh grants rotate the id.

pub mod pending;
pub mod provider;
pub mod proxy;
pub mod routes;

pub use pending::{PendingAuthorization, StateCache};
pub use provider::{PkcePair, ProviderClient, generate_state};
pub use proxy::{BeginRequest, OAuthProxy, TokenGrant};
