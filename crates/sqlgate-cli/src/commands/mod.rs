//! CLI command implementations for sqlgate.

pub mod check;
pub mod serve;
pub mod token;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use sqlgate_core::GatewayConfig;
use sqlgate_store::SqliteMetadataStore;

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "sqlgate.yaml";

/// Load the gateway configuration from `path`, or from `sqlgate.yaml` if it
/// exists, or fall back to the defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<GatewayConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !fallback.exists() {
                tracing::debug!("No config file, using defaults");
                return Ok(GatewayConfig::default());
            }
            fallback
        }
    };
    GatewayConfig::load_from_file(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

/// Open the metadata store file.
pub async fn open_store(path: &Path) -> anyhow::Result<Arc<SqliteMetadataStore>> {
    let store = SqliteMetadataStore::open(path)
        .await
        .with_context(|| format!("Failed to open metadata store at {}", path.display()))?;
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_config_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("missing.yaml"))).unwrap_err();
        assert!(err.to_string().contains("missing.yaml"));
    }

    #[test]
    fn test_explicit_config_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sqlgate.yaml");
        std::fs::write(&path, "mcp:\n  transport: http\n  port: 9000\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert!(config.mcp.is_http());
        assert_eq!(config.mcp.port, 9000);
    }
}
