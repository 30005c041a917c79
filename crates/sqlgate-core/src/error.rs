//! Error types for the core crate.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while parsing names, backend configurations or config files.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A full tool/resource name did not split into exactly two segments.
    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// A stored backend configuration names a vendor the gateway cannot drive.
    #[error("unsupported database type: {0}")]
    UnsupportedVendor(String),

    /// A stored backend configuration could not be decoded.
    #[error("invalid database configuration: {0}")]
    InvalidDbConfig(String),

    /// Failed to read a configuration file.
    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse a configuration file.
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Configuration is syntactically valid but unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
