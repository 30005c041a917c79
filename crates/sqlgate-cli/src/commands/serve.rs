//! `sqlgate serve` - start the MCP gateway.
//!
//! Settings come from the config file, then environment variables, then
//! flags (clap merges the last two).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use sqlgate_core::{AuthMode, GatewayConfig, Transport};
use sqlgate_mcp::{HttpServer, McpServer, run_stdio, shutdown_signal};

/// Arguments for `sqlgate serve`.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Configuration file path (defaults to ./sqlgate.yaml when present).
    #[arg(short, long, env = "SQLGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Transport type (stdio or http). Overrides config file.
    #[arg(long, env = "SQLGATE_TRANSPORT")]
    pub transport: Option<String>,

    /// HTTP host (only for http transport). Overrides config file.
    #[arg(long, env = "SQLGATE_HOST")]
    pub host: Option<String>,

    /// HTTP port (only for http transport). Overrides config file.
    #[arg(long, env = "SQLGATE_PORT")]
    pub port: Option<u16>,

    /// Metadata store file. Overrides config file.
    #[arg(long, env = "SQLGATE_STORE_PATH")]
    pub store: Option<PathBuf>,

    /// Credential checking (none or enforced). Overrides config file.
    #[arg(long, env = "SQLGATE_AUTH_MODE")]
    pub auth_mode: Option<String>,

    /// Shared secret for MCP credentials.
    #[arg(long, env = "SQLGATE_TOKEN_SECRET", hide_env_values = true)]
    pub token_secret: Option<String>,

    /// Credential presented on behalf of this process.
    #[arg(long, env = "SQLGATE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Identity used when auth mode is none.
    #[arg(long, env = "SQLGATE_DEFAULT_USER")]
    pub default_user: Option<String>,
}

impl ServeArgs {
    /// Layer flag and environment overrides onto a loaded config.
    pub fn apply(&self, config: &mut GatewayConfig) -> anyhow::Result<()> {
        if let Some(transport) = &self.transport {
            config.mcp.transport = parse_transport(transport)?;
        }
        if let Some(host) = &self.host {
            config.mcp.host = host.clone();
        }
        if let Some(port) = self.port {
            config.mcp.port = port;
        }
        if let Some(store) = &self.store {
            config.store.path = store.clone();
        }
        if let Some(mode) = &self.auth_mode {
            config.auth.mode = mode.parse::<AuthMode>().map_err(anyhow::Error::msg)?;
        }
        if let Some(secret) = &self.token_secret {
            config.auth.token_secret = Some(secret.clone());
        }
        if let Some(token) = &self.token {
            config.auth.token = Some(token.clone());
        }
        if let Some(user) = &self.default_user {
            config.auth.default_username = user.clone();
        }
        Ok(())
    }
}

fn parse_transport(s: &str) -> anyhow::Result<Transport> {
    match s.trim().to_ascii_lowercase().as_str() {
        "stdio" => Ok(Transport::Stdio),
        "http" => Ok(Transport::Http),
        other => anyhow::bail!("Unknown transport '{other}'. Expected 'stdio' or 'http'"),
    }
}

/// Run the gateway until EOF (stdio) or a shutdown signal.
pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = super::load_config(args.config.as_deref())?;
    args.apply(&mut config)?;
    config.validate().context("Invalid configuration")?;

    let store = super::open_store(&config.store.path).await?;
    tracing::info!(
        store = %config.store.path.display(),
        auth_mode = ?config.auth.mode,
        transport = ?config.mcp.transport,
        "Starting sqlgate"
    );

    let server = Arc::new(McpServer::from_config(&config, store)?);

    match config.mcp.transport {
        Transport::Stdio => run_stdio(server, shutdown_signal()).await?,
        Transport::Http => {
            let target = format!("{}:{}", config.mcp.host, config.mcp.port);
            let addr = tokio::net::lookup_host(target.as_str())
                .await
                .with_context(|| format!("Failed to resolve {target}"))?
                .next()
                .with_context(|| format!("No address for {target}"))?;
            HttpServer::new(addr, server).run(shutdown_signal()).await?;
        }
    }

    tracing::info!("sqlgate stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ServeArgs {
        ServeArgs {
            config: None,
            transport: None,
            host: None,
            port: None,
            store: None,
            auth_mode: None,
            token_secret: None,
            token: None,
            default_user: None,
        }
    }

    #[test]
    fn test_no_overrides_keeps_config() {
        let mut config = GatewayConfig::default();
        args().apply(&mut config).unwrap();
        assert_eq!(config.mcp.transport, Transport::Stdio);
        assert_eq!(config.auth.mode, AuthMode::None);
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = GatewayConfig::default();
        let overrides = ServeArgs {
            transport: Some("HTTP".into()),
            port: Some(8443),
            store: Some(PathBuf::from("/tmp/meta.sqlite")),
            auth_mode: Some("enforced".into()),
            token_secret: Some("s".into()),
            ..args()
        };
        overrides.apply(&mut config).unwrap();
        assert!(config.mcp.is_http());
        assert_eq!(config.mcp.port, 8443);
        assert_eq!(config.store.path, PathBuf::from("/tmp/meta.sqlite"));
        assert_eq!(config.auth.mode, AuthMode::Enforced);
        config.validate().unwrap();
    }

    #[test]
    fn test_bad_transport_rejected() {
        let mut config = GatewayConfig::default();
        let overrides = ServeArgs {
            transport: Some("grpc".into()),
            ..args()
        };
        assert!(overrides.apply(&mut config).is_err());
    }
}
