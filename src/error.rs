//! Error types for the auth proxy

use std::io;

use thiserror::Error;

/// Result type alias for the auth proxy
pub type Result<T> = std::result::Result<T, Error>;

/// Auth proxy errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed or incomplete client request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown, expired, or already-consumed grant
    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    /// Grant type the token endpoint does not support
    #[error("Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    /// The identity provider reported an authorization failure
    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    /// Missing, expired, or reused CSRF state value
    #[error("Invalid or expired state: {0}")]
    InvalidState(String),

    /// No token record exists for the given authentication session
    #[error("No token record for session: {0}")]
    NoTokenRecord(String),

    /// The token record cannot be refreshed (no refresh token)
    #[error("No refresh token for session: {0}")]
    NoRefreshToken(String),

    /// The identity provider rejected a back-channel call
    #[error("Provider error {code}: {description}")]
    Provider {
        /// Machine-readable OAuth error code from the provider
        code: String,
        /// Human-readable description from the provider
        description: String,
    },

    /// Token store backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a provider error from an OAuth error response body.
    pub fn provider(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self::Provider {
            code: code.into(),
            description: description.into(),
        }
    }

    /// Machine-readable OAuth error code for client-visible responses
    /// (RFC 6749 §5.2).
    #[must_use]
    pub fn oauth_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) | Self::InvalidState(_) => "invalid_request",
            Self::InvalidGrant(_) | Self::NoTokenRecord(_) | Self::NoRefreshToken(_) => {
                "invalid_grant"
            }
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::AuthorizationDenied(_) => "access_denied",
            // A provider-rejected grant is the caller's problem, not ours
            Self::Provider { code, .. } if code == "invalid_grant" => "invalid_grant",
            _ => "server_error",
        }
    }

    /// HTTP status for client-visible responses.
    ///
    /// Validation and grant failures map to 400 (the caller must restart the
    /// flow, not retry); provider and storage failures map to 500.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest(_)
            | Self::InvalidGrant(_)
            | Self::UnsupportedGrantType(_)
            | Self::AuthorizationDenied(_)
            | Self::InvalidState(_)
            | Self::NoTokenRecord(_)
            | Self::NoRefreshToken(_) => 400,
            Self::Provider { code, .. } if code == "invalid_grant" => 400,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oauth_codes_map_per_rfc() {
        assert_eq!(Error::InvalidRequest("x".into()).oauth_code(), "invalid_request");
        assert_eq!(Error::InvalidGrant("x".into()).oauth_code(), "invalid_grant");
        assert_eq!(
            Error::UnsupportedGrantType("implicit".into()).oauth_code(),
            "unsupported_grant_type"
        );
        assert_eq!(Error::AuthorizationDenied("x".into()).oauth_code(), "access_denied");
        assert_eq!(
            Error::provider("invalid_client", "bad secret").oauth_code(),
            "server_error"
        );
    }

    #[test]
    fn validation_failures_are_400() {
        assert_eq!(Error::InvalidState("reused".into()).http_status(), 400);
        assert_eq!(Error::NoTokenRecord("s1".into()).http_status(), 400);
    }

    #[test]
    fn upstream_failures_are_500() {
        assert_eq!(Error::provider("server_error", "boom").http_status(), 500);
        assert_eq!(Error::Storage("write failed".into()).http_status(), 500);
    }
}
