//! Configuration types for the sqlgate gateway.
//!
//! A single `sqlgate.yaml` file carries every section; each section has
//! defaults so an empty file (or no file at all) yields a working
//! single-user stdio gateway. The binary layers environment variables and
//! flags on top of the loaded file.

pub mod auth;
pub mod execution;
pub mod mcp;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub use auth::{AuthConfig, AuthMode};
pub use execution::{ExecutionConfig, PoolConfig};
pub use mcp::{McpConfig, Transport};

/// Complete gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Credential checking.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Metadata store location.
    #[serde(default)]
    pub store: StoreConfig,

    /// Protocol transport.
    #[serde(default)]
    pub mcp: McpConfig,

    /// Query execution limits.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Backend connection pooling.
    #[serde(default)]
    pub pool: PoolConfig,
}

impl GatewayConfig {
    /// Load configuration from a YAML file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| CoreError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML text. Blank input yields the defaults.
    pub fn from_yaml_str(content: &str) -> Result<Self, CoreError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.auth.mode == AuthMode::Enforced && self.auth.token_secret.is_none() {
            return Err(CoreError::InvalidConfig(
                "auth.mode is 'enforced' but no token secret is configured".to_string(),
            ));
        }
        if self.execution.timeout_ms == 0 {
            return Err(CoreError::InvalidConfig(
                "execution.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.pool.max_connections == 0 {
            return Err(CoreError::InvalidConfig(
                "pool.max_connections must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where the metadata store lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/sqlgate.sqlite")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::from_yaml_str("").unwrap();
        assert_eq!(config.auth.mode, AuthMode::None);
        assert_eq!(config.auth.default_username, "local");
        assert_eq!(config.store.path, PathBuf::from("data/sqlgate.sqlite"));
        assert_eq!(config.mcp.transport, Transport::Stdio);
        assert_eq!(config.mcp.port, 3001);
        assert_eq!(config.execution.timeout_ms, 10_000);
        assert_eq!(config.execution.default_limit, 100);
        assert_eq!(config.execution.default_offset, 0);
        assert_eq!(config.pool.max_connections, 5);
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
auth:
  mode: enforced
  token_secret: s3cret
store:
  path: /var/lib/sqlgate/meta.sqlite
mcp:
  transport: http
  port: 8080
execution:
  timeout_ms: 2500
"#
        )
        .unwrap();

        let config = GatewayConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.auth.mode, AuthMode::Enforced);
        assert_eq!(config.auth.token_secret.as_deref(), Some("s3cret"));
        assert!(config.mcp.is_http());
        assert_eq!(config.mcp.port, 8080);
        assert_eq!(config.execution.timeout_ms, 2500);
        assert_eq!(config.execution.default_limit, 100);
        config.validate().unwrap();
    }

    #[test]
    fn test_enforced_requires_secret() {
        let config = GatewayConfig::from_yaml_str("auth:\n  mode: enforced\n").unwrap();
        assert!(matches!(config.validate(), Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = GatewayConfig::load_from_file("/nonexistent/sqlgate.yaml").unwrap_err();
        assert!(matches!(err, CoreError::ConfigRead { .. }));
    }
}
