//! Configuration management

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Identity provider configuration
    pub provider: ProviderConfig,
    /// Token store configuration
    pub token_store: TokenStoreConfig,
    /// Transport session configuration
    pub sessions: SessionConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Externally visible base URL; defaults to `http://{host}:{port}`
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8790,
            public_url: None,
        }
    }
}

impl ServerConfig {
    /// The externally visible base URL, without a trailing slash.
    #[must_use]
    pub fn public_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port))
            .trim_end_matches('/')
            .to_string()
    }

    /// The callback URL registered with the identity provider.
    #[must_use]
    pub fn callback_url(&self) -> String {
        format!("{}/oauth/callback", self.public_url())
    }
}

/// Identity provider (external OAuth2 authorization server) configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// OAuth client id registered with the provider
    pub client_id: String,
    /// OAuth client secret, sent via HTTP Basic on the back channel
    pub client_secret: String,
    /// Provider authorize endpoint (redirect target)
    pub authorize_endpoint: String,
    /// Provider token endpoint (back channel)
    pub token_endpoint: String,
    /// Provider revocation endpoint, when it has one
    pub revocation_endpoint: Option<String>,
    /// Scopes requested on authorization
    pub scopes: Vec<String>,
}

/// Token store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process map; lost on restart, single instance only
    #[default]
    Memory,
    /// One file per session id; survives restarts, single host only
    File,
    /// Redis-class TTL store; shared across instances
    Redis,
}

/// Token store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenStoreConfig {
    /// Which backend to use; chosen once at startup
    pub backend: BackendKind,
    /// Directory for the file backend; defaults to
    /// `~/.mcp-auth-proxy/tokens`
    pub file_dir: Option<PathBuf>,
    /// Connection URL for the Redis backend
    pub redis_url: String,
    /// Key namespace for the Redis backend
    pub redis_key_prefix: String,
    /// How often lapsed records are swept (backends without native expiry)
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for TokenStoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            file_dir: None,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            redis_key_prefix: crate::store::redis::DEFAULT_KEY_PREFIX.to_string(),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl TokenStoreConfig {
    /// Directory for the file backend, with the home-relative default.
    pub fn file_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.file_dir {
            return Ok(dir.clone());
        }
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(".mcp-auth-proxy").join("tokens"))
    }
}

/// Transport session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle time after which a session is evicted
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// How often idle sessions are swept
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Load configuration from an optional YAML file, overlaid with
    /// `AUTH_PROXY_`-prefixed environment variables (`__` as separator,
    /// e.g. `AUTH_PROXY_PROVIDER__CLIENT_ID`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Configuration file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("AUTH_PROXY_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(format!("Failed to load configuration: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints before the server starts.
    pub fn validate(&self) -> Result<()> {
        if self.provider.client_id.is_empty() {
            return Err(Error::Config("provider.client_id is required".to_string()));
        }

        for (name, value) in [
            ("provider.authorize_endpoint", &self.provider.authorize_endpoint),
            ("provider.token_endpoint", &self.provider.token_endpoint),
        ] {
            if value.is_empty() {
                return Err(Error::Config(format!("{name} is required")));
            }
            Url::parse(value)
                .map_err(|e| Error::Config(format!("{name} is not a valid URL: {e}")))?;
        }

        if let Some(ref endpoint) = self.provider.revocation_endpoint {
            Url::parse(endpoint).map_err(|e| {
                Error::Config(format!("provider.revocation_endpoint is not a valid URL: {e}"))
            })?;
        }

        if let Some(ref public_url) = self.server.public_url {
            Url::parse(public_url)
                .map_err(|e| Error::Config(format!("server.public_url is not a valid URL: {e}")))?;
        }

        if self.token_store.backend == BackendKind::Redis && self.token_store.redis_url.is_empty() {
            return Err(Error::Config(
                "token_store.redis_url is required for the redis backend".to_string(),
            ));
        }

        Ok(())
    }
}
