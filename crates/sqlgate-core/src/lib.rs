//! Core types for the sqlgate gateway.
//!
//! - [`model`]: server, tool, resource and token records
//! - [`names`]: `{serverId}__{localName}` full names
//! - [`config`]: `sqlgate.yaml` configuration

pub mod config;
pub mod error;
pub mod model;
pub mod names;

pub use config::{
    AuthConfig, AuthMode, ExecutionConfig, GatewayConfig, McpConfig, PoolConfig, StoreConfig,
    Transport,
};
pub use error::CoreError;
pub use model::{
    DbConfig, MssqlDbConfig, NetworkDbConfig, Operation, ResourceDefinition, Scope,
    ServerAuthConfig, ServerRecord, SqliteDbConfig, TokenRecord, ToolDefinition, VendorKind,
};
pub use names::FullName;
