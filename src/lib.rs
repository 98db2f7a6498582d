//! MCP Auth Proxy
//!
//! OAuth proxy and session/token management sitting in front of a
//! tool-calling (MCP) protocol server. Clients authenticate once against an
//! external OAuth2 identity provider; the proxy mints an opaque
//! authentication-session id and hands it back as authorization code, access
//! token, and refresh token alike, so the provider's real credentials never
//! leave the proxy.
//!
//! # Components
//!
//! - [`store`] — token records behind one contract, three backends
//!   (in-process, file, Redis)
//! - [`oauth`] — provider adapter, CSRF state cache, and the
//!   authorize/callback/token protocol handler
//! - [`session`] — transport session registry with idle eviction
//! - [`server`] — endpoint wiring and the downstream tool-handler boundary

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod oauth;
pub mod protocol;
pub mod server;
pub mod session;
pub mod store;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
