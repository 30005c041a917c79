//! In-memory metadata store for tests and embedding.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use sqlgate_core::{ResourceDefinition, ServerAuthConfig, ServerRecord, TokenRecord, ToolDefinition};

use crate::error::StoreError;
use crate::store::{MetadataStore, StoreStats};

#[derive(Default)]
struct Inner {
    servers: BTreeMap<String, ServerRecord>,
    tools: Vec<ToolDefinition>,
    resources: Vec<ResourceDefinition>,
    tokens: HashMap<String, TokenRecord>,
    auth_configs: HashMap<String, ServerAuthConfig>,
}

/// A [`MetadataStore`] held entirely in process memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_server(&self, server: ServerRecord) {
        self.write(|inner| {
            inner.servers.insert(server.id.clone(), server);
        });
    }

    pub fn insert_tool(&self, tool: ToolDefinition) {
        self.write(|inner| {
            inner
                .tools
                .retain(|t| !(t.server_id == tool.server_id && t.name == tool.name));
            inner.tools.push(tool);
        });
    }

    pub fn insert_resource(&self, resource: ResourceDefinition) {
        self.write(|inner| {
            inner
                .resources
                .retain(|r| !(r.server_id == resource.server_id && r.name == resource.name));
            inner.resources.push(resource);
        });
    }

    pub fn insert_token(&self, token_hash: impl Into<String>, record: TokenRecord) {
        self.write(|inner| {
            inner.tokens.insert(token_hash.into(), record);
        });
    }

    pub fn set_server_auth_config(&self, server_id: impl Into<String>, config: ServerAuthConfig) {
        self.write(|inner| {
            inner.auth_configs.insert(server_id.into(), config);
        });
    }

    /// Apply `f` to the stored token with this hash, if any.
    pub fn update_token(&self, token_hash: &str, f: impl FnOnce(&mut TokenRecord)) {
        self.write(|inner| {
            if let Some(record) = inner.tokens.get_mut(token_hash) {
                f(record);
            }
        });
    }

    /// Remove a server and everything defined on it.
    pub fn remove_server(&self, server_id: &str) {
        self.write(|inner| {
            inner.servers.remove(server_id);
            inner.tools.retain(|t| t.server_id != server_id);
            inner.resources.retain(|r| r.server_id != server_id);
            inner.auth_configs.remove(server_id);
        });
    }

    fn write(&self, f: impl FnOnce(&mut Inner)) {
        // Poisoning leaves the maps structurally valid.
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }

    fn read<T>(&self, f: impl FnOnce(&Inner) -> T) -> T {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get_server(&self, id: &str) -> Result<Option<ServerRecord>, StoreError> {
        Ok(self.read(|inner| inner.servers.get(id).cloned()))
    }

    async fn list_servers(&self) -> Result<Vec<ServerRecord>, StoreError> {
        Ok(self.read(|inner| inner.servers.values().cloned().collect()))
    }

    async fn get_all_tools(&self) -> Result<Vec<ToolDefinition>, StoreError> {
        Ok(self.read(|inner| inner.tools.clone()))
    }

    async fn get_tools_for_server(&self, server_id: &str) -> Result<Vec<ToolDefinition>, StoreError> {
        Ok(self.read(|inner| {
            inner
                .tools
                .iter()
                .filter(|t| t.server_id == server_id)
                .cloned()
                .collect()
        }))
    }

    async fn get_all_resources(&self) -> Result<Vec<ResourceDefinition>, StoreError> {
        Ok(self.read(|inner| inner.resources.clone()))
    }

    async fn get_resources_for_server(
        &self,
        server_id: &str,
    ) -> Result<Vec<ResourceDefinition>, StoreError> {
        Ok(self.read(|inner| {
            inner
                .resources
                .iter()
                .filter(|r| r.server_id == server_id)
                .cloned()
                .collect()
        }))
    }

    async fn get_mcp_token_by_hash(&self, token_hash: &str) -> Result<Option<TokenRecord>, StoreError> {
        Ok(self.read(|inner| inner.tokens.get(token_hash).cloned()))
    }

    async fn get_server_auth_config(
        &self,
        server_id: &str,
    ) -> Result<Option<ServerAuthConfig>, StoreError> {
        Ok(self.read(|inner| inner.auth_configs.get(server_id).copied()))
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        Ok(self.read(|inner| StoreStats {
            servers: inner.servers.len(),
            tools: inner.tools.len(),
            resources: inner.resources.len(),
        }))
    }
}
