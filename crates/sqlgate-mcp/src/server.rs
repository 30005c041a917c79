//! MCP request dispatcher.
//!
//! Stateless per message: each request is authenticated on its own, routed
//! by method name and answered. Listings filter silently; calls fail with an
//! explicit unauthorized error.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};
use sqlgate_auth::{AuthGate, Principal};
use sqlgate_core::{
    ExecutionConfig, FullName, GatewayConfig, PoolConfig, ResourceDefinition, ToolDefinition, names,
};
use sqlgate_store::MetadataStore;

use crate::error::GatewayError;
use crate::executor::QueryExecutor;
use crate::pool::ConnectionPool;
use crate::protocol::*;

/// The MCP server.
pub struct McpServer {
    store: Arc<dyn MetadataStore>,
    gate: Arc<AuthGate>,
    executor: QueryExecutor,
    credential: Option<String>,
}

impl McpServer {
    /// Create a server with default execution and pool limits.
    pub fn new(store: Arc<dyn MetadataStore>, gate: AuthGate) -> Self {
        let pool = Arc::new(ConnectionPool::new(PoolConfig::default()));
        Self {
            executor: QueryExecutor::new(store.clone(), pool, ExecutionConfig::default()),
            store,
            gate: Arc::new(gate),
            credential: None,
        }
    }

    /// Build the server described by `config` on top of `store`.
    pub fn from_config(config: &GatewayConfig, store: Arc<dyn MetadataStore>) -> Result<Self, GatewayError> {
        let gate = AuthGate::from_config(&config.auth, store.clone())
            .map_err(|e| GatewayError::StartupFailed(e.to_string()))?;
        Ok(Self::new(store, gate)
            .with_limits(config.execution.clone(), config.pool.clone())
            .with_credential(config.auth.token.clone()))
    }

    /// Replace the execution deadline/defaults and pool limits.
    pub fn with_limits(mut self, execution: ExecutionConfig, pool: PoolConfig) -> Self {
        let pool = Arc::new(ConnectionPool::new(pool));
        self.executor = QueryExecutor::new(self.store.clone(), pool, execution);
        self
    }

    /// Credential used when a message arrives without one.
    pub fn with_credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub fn gate(&self) -> &AuthGate {
        &self.gate
    }

    /// Handle one decoded message. Notifications get no reply.
    pub async fn handle_message(&self, message: Value, credential: Option<&str>) -> Option<JsonRpcResponse> {
        let id = message.get("id").cloned().filter(|id| !id.is_null());
        let request: JsonRpcRequest = match serde_json::from_value(message) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid JSON-RPC message");
                return id.map(|id| {
                    JsonRpcResponse::error(Some(id), error_codes::INVALID_REQUEST, format!("Invalid request: {e}"))
                });
            }
        };

        if request.is_notification() {
            match request.method.as_str() {
                "notifications/initialized" | "initialized" => tracing::info!("Client initialized"),
                other => tracing::debug!(method = %other, "Ignoring notification"),
            }
            return None;
        }

        Some(self.handle_request(request, credential).await)
    }

    /// Handle a JSON-RPC request.
    pub async fn handle_request(&self, request: JsonRpcRequest, credential: Option<&str>) -> JsonRpcResponse {
        let id = request.id.clone();
        let credential = credential.or(self.credential.as_deref());

        match request.method.as_str() {
            "initialize" => self.handle_initialize(id),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => self.handle_list_tools(id, credential).await,
            "resources/list" => self.handle_list_resources(id, credential).await,
            "prompts/list" => JsonRpcResponse::success(id, json!({ "prompts": [] })),
            "tools/call" => self.handle_call_tool(id, request.params, credential).await,
            "resources/read" => self.handle_read_resource(id, request.params, credential).await,
            _ => {
                let e = GatewayError::MethodNotFound(request.method);
                JsonRpcResponse::error(id, e.code(), e.to_string())
            }
        }
    }

    /// Store counts plus open backend connections.
    pub async fn stats(&self) -> Result<Value, GatewayError> {
        let stats = self.store.stats().await?;
        Ok(json!({
            "servers": stats.servers,
            "tools": stats.tools,
            "resources": stats.resources,
            "activeConnections": self.executor.pool().active_connections(),
        }))
    }

    /// Close every backend connection and the metadata store.
    pub async fn shutdown(&self) {
        tracing::info!("Closing backend connections");
        self.executor.pool().close_all().await;
        self.store.close().await;
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        let result = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": {
                "name": "sqlgate",
                "version": env!("CARGO_PKG_VERSION")
            },
            "capabilities": {
                "tools": { "listChanged": true },
                "resources": { "listChanged": true },
                "prompts": { "listChanged": true }
            }
        });
        JsonRpcResponse::success(id, result)
    }

    async fn handle_list_tools(&self, id: Option<Value>, credential: Option<&str>) -> JsonRpcResponse {
        let Some(principal) = self.listing_principal(credential).await else {
            return JsonRpcResponse::success(id, json!({ "tools": [] }));
        };
        let tools = match self.store.get_all_tools().await {
            Ok(tools) => tools,
            Err(e) => return internal_error(id, e.into()),
        };

        let mut servers = ServerAccess::default();
        let mut listed = Vec::new();
        for tool in tools {
            let full_name = tool.full_name();
            if servers.allows(&self.gate, &principal, &tool.server_id).await
                && self.gate.tool_in_scope(&principal, &full_name)
            {
                listed.push(list_tool(tool, full_name));
            }
        }
        JsonRpcResponse::success(id, json!({ "tools": listed }))
    }

    async fn handle_list_resources(&self, id: Option<Value>, credential: Option<&str>) -> JsonRpcResponse {
        let Some(principal) = self.listing_principal(credential).await else {
            return JsonRpcResponse::success(id, json!({ "resources": [] }));
        };
        let resources = match self.store.get_all_resources().await {
            Ok(resources) => resources,
            Err(e) => return internal_error(id, e.into()),
        };

        let mut servers = ServerAccess::default();
        let mut listed = Vec::new();
        for resource in resources {
            let full_name = resource.full_name();
            if servers.allows(&self.gate, &principal, &resource.server_id).await
                && self.gate.resource_in_scope(&principal, &full_name)
            {
                listed.push(list_resource(resource, full_name));
            }
        }
        JsonRpcResponse::success(id, json!({ "resources": listed }))
    }

    async fn handle_call_tool(&self, id: Option<Value>, params: Option<Value>, credential: Option<&str>) -> JsonRpcResponse {
        let params: CallToolParams = match parse_params(params) {
            Ok(params) => params,
            Err(e) => return JsonRpcResponse::error(id, e.code(), e.to_string()),
        };
        tracing::info!(tool = %params.name, "Executing tool");

        match self.call_tool(&params.name, params.arguments, credential).await {
            Ok(result) => match tool_content(&result) {
                Ok(content) => JsonRpcResponse::success(id, content),
                Err(e) => internal_error(id, e),
            },
            Err(e) => {
                tracing::warn!(tool = %params.name, error = %e, "Tool call failed");
                call_error(id, e, "Tool execution failed")
            }
        }
    }

    async fn handle_read_resource(&self, id: Option<Value>, params: Option<Value>, credential: Option<&str>) -> JsonRpcResponse {
        let params: ReadResourceParams = match parse_params(params) {
            Ok(params) => params,
            Err(e) => return JsonRpcResponse::error(id, e.code(), e.to_string()),
        };

        match self.read_resource(&params.uri, credential).await {
            Ok(contents) => JsonRpcResponse::success(id, contents),
            Err(e) => {
                tracing::warn!(uri = %params.uri, error = %e, "Resource read failed");
                call_error(id, e, "Resource read failed")
            }
        }
    }

    async fn call_tool(&self, full_name: &str, args: Value, credential: Option<&str>) -> Result<ToolResult, GatewayError> {
        let name = FullName::parse(full_name)?;
        let principal = self.gate.authenticate(credential).await?;
        self.gate.authorize_tool(&principal, &name).await?;
        self.executor.execute_named_tool(&name, args).await
    }

    async fn read_resource(&self, uri: &str, credential: Option<&str>) -> Result<Value, GatewayError> {
        let name = FullName::parse(names::resource_name_from_uri(uri))?;
        let principal = self.gate.authenticate(credential).await?;
        self.gate.authorize_resource(&principal, &name).await?;
        self.executor.read_named_resource(&name, uri).await
    }

    /// Listings answer an unauthenticated caller with nothing rather than an error.
    async fn listing_principal(&self, credential: Option<&str>) -> Option<Principal> {
        match self.gate.authenticate(credential).await {
            Ok(principal) => Some(principal),
            Err(e) => {
                tracing::warn!(error = %e, "Listing with rejected credential");
                None
            }
        }
    }
}

/// Per-listing memo of server checks.
#[derive(Default)]
struct ServerAccess(HashMap<String, bool>);

impl ServerAccess {
    async fn allows(&mut self, gate: &AuthGate, principal: &Principal, server_id: &str) -> bool {
        if let Some(allowed) = self.0.get(server_id) {
            return *allowed;
        }
        let allowed = gate.can_access_server(principal, server_id).await;
        self.0.insert(server_id.to_string(), allowed);
        allowed
    }
}

fn list_tool(tool: ToolDefinition, full_name: String) -> ListedTool {
    ListedTool {
        name: full_name,
        description: format!("[{}] {}", tool.server_id, tool.description),
        input_schema: tool.input_schema,
    }
}

/// The advertised uri always resolves back to this resource on read.
fn list_resource(resource: ResourceDefinition, full_name: String) -> ListedResource {
    let path = resource
        .uri_template
        .split_once("://")
        .map_or(resource.uri_template.as_str(), |(_, path)| path);
    let path = if path.is_empty() { "list" } else { path };
    ListedResource {
        uri: format!("{full_name}://{path}"),
        name: full_name,
        description: format!("[{}] {}", resource.server_id, resource.description),
        mime_type: "application/json",
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T, GatewayError> {
    let params = params.ok_or_else(|| GatewayError::InvalidParams("missing params".to_string()))?;
    serde_json::from_value(params).map_err(|e| GatewayError::InvalidParams(e.to_string()))
}

fn tool_content(result: &ToolResult) -> Result<Value, GatewayError> {
    let content = vec![ToolContent::Text {
        text: serde_json::to_string_pretty(result)?,
    }];
    Ok(json!({ "content": content }))
}

fn call_error(id: Option<Value>, e: GatewayError, prefix: &str) -> JsonRpcResponse {
    let code = e.code();
    let message = match code {
        error_codes::UNAUTHORIZED => format!("Unauthorized: {e}"),
        error_codes::INTERNAL_ERROR => format!("{prefix}: {e}"),
        _ => e.to_string(),
    };
    JsonRpcResponse::error(id, code, message)
}

fn internal_error(id: Option<Value>, e: GatewayError) -> JsonRpcResponse {
    tracing::error!(error = %e, "Request failed");
    JsonRpcResponse::error(id, error_codes::INTERNAL_ERROR, e.to_string())
}
