//! MCP Auth Proxy - OAuth proxy for tool-calling protocol servers

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use mcp_auth_proxy::{
    cli::{Cli, Command},
    config::{BackendKind, Config},
    server::{NullToolHandler, ProxyServer},
    setup_tracing,
    store::{FileBackend, MemoryBackend, RedisBackend, TokenBackend},
};

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env before clap resolves env-var fallbacks
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Run the proxy server
async fn run_server(cli: Cli) -> ExitCode {
    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let backend = match build_backend(&config).await {
        Ok(backend) => backend,
        Err(e) => {
            error!(error = %e, "Failed to initialize token store backend");
            return ExitCode::FAILURE;
        }
    };

    let server = match ProxyServer::new(config, backend, Arc::new(NullToolHandler)) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Failed to assemble server");
            return ExitCode::FAILURE;
        }
    };

    match server.run().await {
        Ok(()) => {
            info!("Auth proxy stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}

/// Build the token store backend selected in configuration.
async fn build_backend(config: &Config) -> mcp_auth_proxy::Result<Arc<dyn TokenBackend>> {
    let backend: Arc<dyn TokenBackend> = match config.token_store.backend {
        BackendKind::Memory => {
            info!("Using in-memory token store");
            Arc::new(MemoryBackend::new())
        }
        BackendKind::File => {
            let dir = config.token_store.file_dir()?;
            info!(dir = %dir.display(), "Using file token store");
            Arc::new(FileBackend::new(dir)?)
        }
        BackendKind::Redis => Arc::new(
            RedisBackend::connect(
                &config.token_store.redis_url,
                config.token_store.redis_key_prefix.clone(),
            )
            .await?,
        ),
    };

    Ok(backend)
}
