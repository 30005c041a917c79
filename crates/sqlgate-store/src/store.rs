//! The metadata store contract consumed by the gateway.

use async_trait::async_trait;
use serde::Serialize;
use sqlgate_core::{
    ResourceDefinition, ServerAuthConfig, ServerRecord, TokenRecord, ToolDefinition, names,
};

use crate::error::StoreError;

/// Record counts reported by `/health`, `/stats` and `sqlgate check`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub servers: usize,
    pub tools: usize,
    pub resources: usize,
}

/// Read access to servers, tools, resources and tokens.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Look up a server by id.
    async fn get_server(&self, id: &str) -> Result<Option<ServerRecord>, StoreError>;

    /// All servers.
    async fn list_servers(&self) -> Result<Vec<ServerRecord>, StoreError>;

    /// Servers whose id carries the given owner prefix.
    async fn list_servers_by_owner(&self, owner: &str) -> Result<Vec<ServerRecord>, StoreError> {
        Ok(self
            .list_servers()
            .await?
            .into_iter()
            .filter(|s| names::owner_prefix(&s.id) == owner)
            .collect())
    }

    async fn get_all_tools(&self) -> Result<Vec<ToolDefinition>, StoreError>;

    async fn get_tools_for_server(&self, server_id: &str) -> Result<Vec<ToolDefinition>, StoreError>;

    async fn get_all_resources(&self) -> Result<Vec<ResourceDefinition>, StoreError>;

    async fn get_resources_for_server(
        &self,
        server_id: &str,
    ) -> Result<Vec<ResourceDefinition>, StoreError>;

    /// Look up a token by the hex SHA-256 of the presented credential.
    async fn get_mcp_token_by_hash(&self, token_hash: &str) -> Result<Option<TokenRecord>, StoreError>;

    /// Per-server auth settings, `None` when the server has none stored.
    async fn get_server_auth_config(
        &self,
        server_id: &str,
    ) -> Result<Option<ServerAuthConfig>, StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;

    /// Release underlying handles. Further calls may fail.
    async fn close(&self) {}
}
