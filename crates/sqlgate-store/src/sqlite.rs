//! SQLite-backed metadata store.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlgate_core::{
    Operation, ResourceDefinition, Scope, ServerAuthConfig, ServerRecord, TokenRecord,
    ToolDefinition,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::error::StoreError;
use crate::store::{MetadataStore, StoreStats};

/// Metadata store kept in a single SQLite file.
#[derive(Clone)]
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct ServerRow {
    id: String,
    name: String,
    db_config: String,
    created_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct ToolRow {
    server_id: String,
    name: String,
    description: String,
    input_schema: String,
    sql_query: String,
    operation: String,
    parameters: Option<String>,
}

#[derive(sqlx::FromRow)]
struct ResourceRow {
    server_id: String,
    name: String,
    description: String,
    uri_template: String,
    sql_query: String,
}

#[derive(sqlx::FromRow)]
struct TokenRow {
    id: String,
    token_name: String,
    workspace_id: String,
    subject_username: String,
    allow_all_servers: bool,
    allow_all_tools: bool,
    allow_all_resources: bool,
    server_ids: String,
    allowed_tools: String,
    allowed_resources: String,
    never_expires: bool,
    expires_at: Option<DateTime<Utc>>,
    revoked_at: Option<DateTime<Utc>>,
}

const SERVER_COLUMNS: &str = "id, name, db_config, created_at";
const TOOL_COLUMNS: &str =
    "server_id, name, description, input_schema, sql_query, operation, parameters";
const RESOURCE_COLUMNS: &str = "server_id, name, description, uri_template, sql_query";

impl SqliteMetadataStore {
    /// Open (creating if needed) the store file and bring its schema up to date.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::debug!(path = %path.display(), "opened metadata store");
        Ok(Self { pool })
    }

    /// Wrap an existing pool. The schema is assumed to be in place.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or replace a server record.
    pub async fn upsert_server(&self, server: &ServerRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO servers (id, name, db_config, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, db_config = excluded.db_config",
        )
        .bind(&server.id)
        .bind(&server.name)
        .bind(serde_json::to_string(&server.db_config)?)
        .bind(server.created_at.unwrap_or_else(Utc::now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or replace a tool definition.
    pub async fn upsert_tool(&self, tool: &ToolDefinition) -> Result<(), StoreError> {
        let parameters = tool
            .parameters
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(
            "INSERT OR REPLACE INTO tools
             (server_id, name, description, input_schema, sql_query, operation, parameters)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&tool.server_id)
        .bind(&tool.name)
        .bind(&tool.description)
        .bind(serde_json::to_string(&tool.input_schema)?)
        .bind(&tool.sql_query)
        .bind(tool.operation.as_str())
        .bind(parameters)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or replace a resource definition.
    pub async fn upsert_resource(&self, resource: &ResourceDefinition) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO resources
             (server_id, name, description, uri_template, sql_query)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&resource.server_id)
        .bind(&resource.name)
        .bind(&resource.description)
        .bind(&resource.uri_template)
        .bind(&resource.sql_query)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Store a token record under the hash of its credential.
    pub async fn insert_token(&self, token_hash: &str, record: &TokenRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO mcp_tokens
             (id, token_name, workspace_id, subject_username, token_hash,
              allow_all_servers, allow_all_tools, allow_all_resources,
              server_ids, allowed_tools, allowed_resources,
              never_expires, expires_at, revoked_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.token_name)
        .bind(&record.workspace_id)
        .bind(&record.subject_username)
        .bind(token_hash)
        .bind(record.servers.is_all())
        .bind(record.tools.is_all())
        .bind(record.resources.is_all())
        .bind(scope_list(&record.servers)?)
        .bind(scope_list(&record.tools)?)
        .bind(scope_list(&record.resources)?)
        .bind(record.never_expires)
        .bind(record.expires_at)
        .bind(record.revoked_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a token revoked now.
    pub async fn revoke_token(&self, token_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE mcp_tokens SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL")
            .bind(Utc::now())
            .bind(token_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_server_auth_config(
        &self,
        server_id: &str,
        config: ServerAuthConfig,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT OR REPLACE INTO server_auth_config (server_id, require_mcp_token) VALUES (?, ?)")
            .bind(server_id)
            .bind(config.require_mcp_token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove a server together with its tools, resources and auth config.
    pub async fn delete_server(&self, server_id: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM tools WHERE server_id = ?")
            .bind(server_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM resources WHERE server_id = ?")
            .bind(server_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM server_auth_config WHERE server_id = ?")
            .bind(server_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM servers WHERE id = ?")
            .bind(server_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn get_server(&self, id: &str) -> Result<Option<ServerRecord>, StoreError> {
        let row = sqlx::query_as::<_, ServerRow>(&format!(
            "SELECT {SERVER_COLUMNS} FROM servers WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(server_from_row).transpose()
    }

    async fn list_servers(&self) -> Result<Vec<ServerRecord>, StoreError> {
        let rows = sqlx::query_as::<_, ServerRow>(&format!(
            "SELECT {SERVER_COLUMNS} FROM servers ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(server_from_row).collect()
    }

    async fn get_all_tools(&self) -> Result<Vec<ToolDefinition>, StoreError> {
        let rows = sqlx::query_as::<_, ToolRow>(&format!(
            "SELECT {TOOL_COLUMNS} FROM tools ORDER BY server_id, name"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(tool_from_row).collect()
    }

    async fn get_tools_for_server(&self, server_id: &str) -> Result<Vec<ToolDefinition>, StoreError> {
        let rows = sqlx::query_as::<_, ToolRow>(&format!(
            "SELECT {TOOL_COLUMNS} FROM tools WHERE server_id = ? ORDER BY name"
        ))
        .bind(server_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(tool_from_row).collect()
    }

    async fn get_all_resources(&self) -> Result<Vec<ResourceDefinition>, StoreError> {
        let rows = sqlx::query_as::<_, ResourceRow>(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources ORDER BY server_id, name"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(resource_from_row).collect())
    }

    async fn get_resources_for_server(
        &self,
        server_id: &str,
    ) -> Result<Vec<ResourceDefinition>, StoreError> {
        let rows = sqlx::query_as::<_, ResourceRow>(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources WHERE server_id = ? ORDER BY name"
        ))
        .bind(server_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(resource_from_row).collect())
    }

    async fn get_mcp_token_by_hash(&self, token_hash: &str) -> Result<Option<TokenRecord>, StoreError> {
        let row = sqlx::query_as::<_, TokenRow>(
            "SELECT id, token_name, workspace_id, subject_username,
                    allow_all_servers, allow_all_tools, allow_all_resources,
                    server_ids, allowed_tools, allowed_resources,
                    never_expires, expires_at, revoked_at
             FROM mcp_tokens WHERE token_hash = ?",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.map(token_from_row).transpose()
    }

    async fn get_server_auth_config(
        &self,
        server_id: &str,
    ) -> Result<Option<ServerAuthConfig>, StoreError> {
        let row: Option<(bool,)> =
            sqlx::query_as("SELECT require_mcp_token FROM server_auth_config WHERE server_id = ?")
                .bind(server_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(require_mcp_token,)| ServerAuthConfig { require_mcp_token }))
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let (servers, tools, resources): (i64, i64, i64) = sqlx::query_as(
            "SELECT (SELECT COUNT(1) FROM servers),
                    (SELECT COUNT(1) FROM tools),
                    (SELECT COUNT(1) FROM resources)",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(StoreStats {
            servers: usize::try_from(servers).unwrap_or_default(),
            tools: usize::try_from(tools).unwrap_or_default(),
            resources: usize::try_from(resources).unwrap_or_default(),
        })
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("metadata store closed");
    }
}

fn server_from_row(row: ServerRow) -> Result<ServerRecord, StoreError> {
    let db_config = serde_json::from_str(&row.db_config).map_err(|e| StoreError::Corrupt {
        record: format!("servers/{}", row.id),
        reason: format!("db_config: {e}"),
    })?;
    Ok(ServerRecord {
        id: row.id,
        name: row.name,
        db_config,
        created_at: row.created_at,
    })
}

fn tool_from_row(row: ToolRow) -> Result<ToolDefinition, StoreError> {
    let record = || format!("tools/{}__{}", row.server_id, row.name);
    let corrupt = |reason: String| StoreError::Corrupt {
        record: record(),
        reason,
    };

    let input_schema =
        serde_json::from_str(&row.input_schema).map_err(|e| corrupt(format!("input_schema: {e}")))?;
    let operation = Operation::from_str(&row.operation).map_err(|e| corrupt(e.to_string()))?;
    let parameters = row
        .parameters
        .as_deref()
        .map(serde_json::from_str::<Vec<String>>)
        .transpose()
        .map_err(|e| corrupt(format!("parameters: {e}")))?;

    Ok(ToolDefinition {
        server_id: row.server_id,
        name: row.name,
        description: row.description,
        input_schema,
        sql_query: row.sql_query,
        operation,
        parameters,
    })
}

fn resource_from_row(row: ResourceRow) -> ResourceDefinition {
    ResourceDefinition {
        server_id: row.server_id,
        name: row.name,
        description: row.description,
        uri_template: row.uri_template,
        sql_query: row.sql_query,
    }
}

fn token_from_row(row: TokenRow) -> Result<TokenRecord, StoreError> {
    let list = |column: &str, raw: &str| {
        serde_json::from_str::<Vec<String>>(raw).map_err(|e| StoreError::Corrupt {
            record: format!("mcp_tokens/{}", row.id),
            reason: format!("{column}: {e}"),
        })
    };

    Ok(TokenRecord {
        servers: Scope::from_flag(row.allow_all_servers, list("server_ids", &row.server_ids)?),
        tools: Scope::from_flag(row.allow_all_tools, list("allowed_tools", &row.allowed_tools)?),
        resources: Scope::from_flag(
            row.allow_all_resources,
            list("allowed_resources", &row.allowed_resources)?,
        ),
        id: row.id.clone(),
        token_name: row.token_name,
        workspace_id: row.workspace_id,
        subject_username: row.subject_username,
        never_expires: row.never_expires,
        expires_at: row.expires_at,
        revoked_at: row.revoked_at,
    })
}

fn scope_list(scope: &Scope) -> Result<String, StoreError> {
    let items: Vec<&str> = match scope {
        Scope::All => Vec::new(),
        Scope::Only(items) => items.iter().map(String::as_str).collect(),
    };
    Ok(serde_json::to_string(&items)?)
}
