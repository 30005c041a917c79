//! Tool and resource execution.
//!
//! Resolves a full name to its stored definition and owning server, obtains
//! the pooled connection, binds and runs the statement, and normalizes the
//! result. Every run is bounded by a caller-facing deadline.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Value, json};
use sqlgate_core::{
    ExecutionConfig, FullName, Operation, ResourceDefinition, ToolDefinition, names,
};
use sqlgate_store::MetadataStore;

use crate::error::GatewayError;
use crate::pool::ConnectionPool;
use crate::protocol::ToolResult;
use crate::validate::validate_arguments;
use crate::vendor::NormalizedResult;

/// Executes stored tools and resources against their backends.
#[derive(Clone)]
pub struct QueryExecutor {
    store: Arc<dyn MetadataStore>,
    pool: Arc<ConnectionPool>,
    execution: ExecutionConfig,
}

/// One statement to run, detached from the definition it came from.
struct Job {
    label: String,
    server_id: String,
    sql: String,
    args: Value,
    declared: Option<Vec<String>>,
    operation: Operation,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn MetadataStore>, pool: Arc<ConnectionPool>, execution: ExecutionConfig) -> Self {
        Self {
            store,
            pool,
            execution,
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    /// Execute a tool by its full `{serverId}__{localName}` name.
    pub async fn execute_tool(&self, full_name: &str, args: Value) -> Result<ToolResult, GatewayError> {
        let name = FullName::parse(full_name)?;
        self.execute_named_tool(&name, args).await
    }

    pub async fn execute_named_tool(&self, name: &FullName, args: Value) -> Result<ToolResult, GatewayError> {
        let tool = self.find_tool(name).await?;
        validate_arguments(&tool.input_schema, &args).map_err(GatewayError::InvalidParams)?;

        let job = Job {
            label: name.to_string(),
            server_id: tool.server_id,
            sql: tool.sql_query,
            args,
            declared: tool.parameters,
            operation: tool.operation,
        };
        let (data, row_count) = self.run(job).await?.into_data();
        Ok(ToolResult {
            success: true,
            data,
            row_count,
        })
    }

    /// Read a resource addressed by `uri` (`{fullName}://...` or the bare full name).
    pub async fn read_resource(&self, uri: &str) -> Result<Value, GatewayError> {
        let name = FullName::parse(names::resource_name_from_uri(uri))?;
        self.read_named_resource(&name, uri).await
    }

    pub async fn read_named_resource(&self, name: &FullName, uri: &str) -> Result<Value, GatewayError> {
        let resource = self.find_resource(name).await?;
        let job = Job {
            label: name.to_string(),
            server_id: resource.server_id,
            sql: resource.sql_query,
            args: Value::Null,
            declared: None,
            operation: Operation::Select,
        };
        let (data, _) = self.run(job).await?.into_data();
        Ok(json!({
            "contents": [{
                "uri": uri,
                "mimeType": "application/json",
                "text": serde_json::to_string_pretty(&data)?,
            }]
        }))
    }

    pub async fn find_tool(&self, name: &FullName) -> Result<ToolDefinition, GatewayError> {
        self.store
            .get_tools_for_server(name.server_id())
            .await?
            .into_iter()
            .find(|t| t.name == name.local_name())
            .ok_or_else(|| GatewayError::ToolNotFound {
                name: name.to_string(),
            })
    }

    pub async fn find_resource(&self, name: &FullName) -> Result<ResourceDefinition, GatewayError> {
        self.store
            .get_resources_for_server(name.server_id())
            .await?
            .into_iter()
            .find(|r| r.name == name.local_name())
            .ok_or_else(|| GatewayError::ResourceNotFound {
                name: name.to_string(),
            })
    }

    async fn run(&self, job: Job) -> Result<NormalizedResult, GatewayError> {
        let label = job.label.clone();
        let this = self.clone();
        let result = self.with_deadline(&label, async move { this.execute(job).await }).await;
        if let Err(e) = &result {
            tracing::error!(name = %label, error = %e, "Execution failed");
        }
        result
    }

    /// Run `work` on its own task and stop waiting after the configured
    /// deadline. The task is not cancelled: the driver call finishes or
    /// fails on its own and its connection stays busy until then.
    async fn with_deadline<F>(&self, label: &str, work: F) -> Result<NormalizedResult, GatewayError>
    where
        F: Future<Output = Result<NormalizedResult, GatewayError>> + Send + 'static,
    {
        let task = tokio::spawn(work);
        match tokio::time::timeout(self.execution.timeout(), task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(GatewayError::Internal(anyhow::anyhow!(
                "execution task failed: {join_err}"
            ))),
            Err(_) => {
                tracing::warn!(
                    name = %label,
                    after_ms = self.execution.timeout_ms,
                    "Deadline elapsed, query left running on its connection"
                );
                Err(GatewayError::Timeout {
                    after_ms: self.execution.timeout_ms,
                })
            }
        }
    }

    async fn execute(&self, job: Job) -> Result<NormalizedResult, GatewayError> {
        let Some(server) = self.store.get_server(&job.server_id).await? else {
            // Deleted mid-session; drop whatever connection we still hold.
            self.pool.evict(&job.server_id).await;
            return Err(GatewayError::ServerNotFound {
                server_id: job.server_id,
            });
        };
        let db_config = server.db_config()?;
        let handle = self.pool.get_or_create(&server.id, &db_config).await?;
        let adapter = handle.adapter();

        let bound = adapter.bind(
            &job.sql,
            &job.args,
            job.declared.as_deref(),
            job.operation,
            &self.execution,
        )?;

        let started = Instant::now();
        match adapter.execute(&bound, job.operation).await {
            Ok(result) => {
                tracing::debug!(
                    name = %job.label,
                    server_id = %server.id,
                    vendor = %handle.vendor(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Query executed"
                );
                Ok(result)
            }
            Err(e) => {
                tracing::error!(
                    name = %job.label,
                    vendor = %handle.vendor(),
                    sql = %bound.sql,
                    error = %e,
                    "Query failed"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlgate_core::ServerRecord;
    use sqlgate_store::MemoryStore;

    fn executor(store: Arc<MemoryStore>) -> QueryExecutor {
        QueryExecutor::new(
            store,
            Arc::new(ConnectionPool::new(Default::default())),
            ExecutionConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_invalid_full_names() {
        let exec = executor(Arc::new(MemoryStore::new()));
        for bad in ["nosplit", "__tool", "server__", "a__b__c", ""] {
            let err = exec.execute_tool(bad, Value::Null).await.unwrap_err();
            assert_eq!(err.code(), -32602, "{bad}");
        }
        assert_eq!(exec.pool().active_connections(), 0);
    }

    #[tokio::test]
    async fn test_unknown_tool_and_resource() {
        let exec = executor(Arc::new(MemoryStore::new()));
        assert!(matches!(
            exec.execute_tool("acme__missing", Value::Null).await,
            Err(GatewayError::ToolNotFound { .. })
        ));
        assert!(matches!(
            exec.read_resource("acme__missing://all").await,
            Err(GatewayError::ResourceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_unsupported_vendor_fails_only_that_call() {
        let store = Arc::new(MemoryStore::new());
        store.insert_server(ServerRecord {
            id: "acme".into(),
            name: "legacy".into(),
            db_config: serde_json::json!({"type": "oracle", "host": "x"}),
            created_at: None,
        });
        store.insert_tool(ToolDefinition {
            server_id: "acme".into(),
            name: "list".into(),
            description: String::new(),
            input_schema: serde_json::json!({"type": "object"}),
            sql_query: "SELECT 1".into(),
            operation: Operation::Select,
            parameters: None,
        });
        let exec = executor(store);
        let err = exec.execute_tool("acme__list", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, GatewayError::Core(_)));
        assert_eq!(err.code(), -32603);
    }
}
