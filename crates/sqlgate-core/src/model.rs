//! Records served by the metadata store.
//!
//! The gateway never builds these itself: servers, tools, resources and
//! tokens are created elsewhere and read here by id or by hash.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::names;

// =============================================================================
// Operations and vendors
// =============================================================================

/// SQL operation a tool performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
}

impl Operation {
    /// Reads return rows; everything else returns an affected-row count.
    pub fn is_read(self) -> bool {
        self == Operation::Select
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Select => "SELECT",
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SELECT" => Ok(Operation::Select),
            "INSERT" => Ok(Operation::Insert),
            "UPDATE" => Ok(Operation::Update),
            "DELETE" => Ok(Operation::Delete),
            other => Err(CoreError::InvalidDbConfig(format!(
                "unknown operation '{other}'"
            ))),
        }
    }
}

/// Relational engine behind a virtual backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VendorKind {
    Mssql,
    Mysql,
    Postgresql,
    Sqlite,
}

impl VendorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            VendorKind::Mssql => "mssql",
            VendorKind::Mysql => "mysql",
            VendorKind::Postgresql => "postgresql",
            VendorKind::Sqlite => "sqlite",
        }
    }

    /// Port used when the stored config leaves it out.
    pub fn default_port(self) -> Option<u16> {
        match self {
            VendorKind::Mssql => Some(1433),
            VendorKind::Mysql => Some(3306),
            VendorKind::Postgresql => Some(5432),
            VendorKind::Sqlite => None,
        }
    }
}

impl fmt::Display for VendorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VendorKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mssql" | "sqlserver" => Ok(VendorKind::Mssql),
            "mysql" => Ok(VendorKind::Mysql),
            "postgresql" | "postgres" => Ok(VendorKind::Postgresql),
            "sqlite" => Ok(VendorKind::Sqlite),
            other => Err(CoreError::UnsupportedVendor(other.to_string())),
        }
    }
}

// =============================================================================
// Database configuration
// =============================================================================

/// Connection settings for a network database (PostgreSQL, MySQL).
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDbConfig {
    #[serde(alias = "server")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub database: String,
    #[serde(default, alias = "user")]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub ssl: bool,
}

impl fmt::Debug for NetworkDbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkDbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("ssl", &self.ssl)
            .finish()
    }
}

/// Connection settings for SQL Server.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MssqlDbConfig {
    #[serde(alias = "server")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub database: String,
    #[serde(default, alias = "user")]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub encrypt: bool,
    #[serde(default = "default_true")]
    pub trust_server_certificate: bool,
}

impl fmt::Debug for MssqlDbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MssqlDbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("encrypt", &self.encrypt)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .finish()
    }
}

/// File-backed SQLite database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteDbConfig {
    #[serde(alias = "database", alias = "filename")]
    pub path: String,
}

/// Decoded `dbConfig` of a server record, one variant per vendor.
#[derive(Debug, Clone)]
pub enum DbConfig {
    Mssql(MssqlDbConfig),
    Mysql(NetworkDbConfig),
    Postgres(NetworkDbConfig),
    Sqlite(SqliteDbConfig),
}

impl DbConfig {
    /// Decode a stored configuration object, dispatching on its `type` field.
    pub fn from_value(value: &Value) -> Result<Self, CoreError> {
        let type_name = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::InvalidDbConfig("missing 'type'".to_string()))?;
        let vendor: VendorKind = type_name.parse()?;

        let decode_err = |e: serde_json::Error| CoreError::InvalidDbConfig(format!("{vendor}: {e}"));
        Ok(match vendor {
            VendorKind::Mssql => DbConfig::Mssql(serde_json::from_value(value.clone()).map_err(decode_err)?),
            VendorKind::Mysql => DbConfig::Mysql(serde_json::from_value(value.clone()).map_err(decode_err)?),
            VendorKind::Postgresql => {
                DbConfig::Postgres(serde_json::from_value(value.clone()).map_err(decode_err)?)
            }
            VendorKind::Sqlite => DbConfig::Sqlite(serde_json::from_value(value.clone()).map_err(decode_err)?),
        })
    }

    pub fn vendor(&self) -> VendorKind {
        match self {
            DbConfig::Mssql(_) => VendorKind::Mssql,
            DbConfig::Mysql(_) => VendorKind::Mysql,
            DbConfig::Postgres(_) => VendorKind::Postgresql,
            DbConfig::Sqlite(_) => VendorKind::Sqlite,
        }
    }
}

// =============================================================================
// Servers, tools, resources
// =============================================================================

/// A virtual backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRecord {
    /// Unique, owner-prefixed id.
    pub id: String,
    pub name: String,
    /// Raw vendor configuration; decoded with [`DbConfig::from_value`] when a
    /// connection is opened so one bad record cannot poison the others.
    pub db_config: Value,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl ServerRecord {
    pub fn db_config(&self) -> Result<DbConfig, CoreError> {
        DbConfig::from_value(&self.db_config)
    }

    /// Owner prefix of the id (see [`names::owner_prefix`]).
    pub fn owner(&self) -> &str {
        names::owner_prefix(&self.id)
    }
}

/// A parameterized operation mapped to stored SQL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub server_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
    pub sql_query: String,
    pub operation: Operation,
    /// Ordered parameter names for SQL written with bare positional
    /// placeholders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<String>>,
}

impl ToolDefinition {
    pub fn full_name(&self) -> String {
        names::full_name(&self.server_id, &self.name)
    }
}

/// A parameterless read view mapped to stored SQL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    pub server_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub uri_template: String,
    pub sql_query: String,
}

impl ResourceDefinition {
    pub fn full_name(&self) -> String {
        names::full_name(&self.server_id, &self.name)
    }
}

// =============================================================================
// Tokens
// =============================================================================

/// What a credential may touch at one level (servers, tools or resources).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Only(BTreeSet<String>),
}

impl Scope {
    /// Build a scope from the stored flag + list pair.
    pub fn from_flag<I, S>(allow_all: bool, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if allow_all {
            Scope::All
        } else {
            Scope::Only(items.into_iter().map(Into::into).collect())
        }
    }

    pub fn allows(&self, item: &str) -> bool {
        match self {
            Scope::All => true,
            Scope::Only(items) => items.contains(item),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Scope::All)
    }

    fn items(&self) -> Vec<String> {
        match self {
            Scope::All => Vec::new(),
            Scope::Only(items) => items.iter().cloned().collect(),
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Scope::Only(BTreeSet::new())
    }
}

/// A stored, scoped MCP credential, looked up by the hash of the bearer token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TokenRecordFields", into = "TokenRecordFields")]
pub struct TokenRecord {
    pub id: String,
    pub token_name: String,
    pub workspace_id: String,
    pub subject_username: String,
    pub servers: Scope,
    pub tools: Scope,
    pub resources: Scope,
    pub never_expires: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// A record that neither never-expires nor carries an expiry is treated
    /// as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.never_expires {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => expires_at <= now,
            None => true,
        }
    }
}

/// Flat wire/storage shape of [`TokenRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenRecordFields {
    id: String,
    #[serde(default)]
    token_name: String,
    workspace_id: String,
    subject_username: String,
    #[serde(default)]
    allow_all_servers: bool,
    #[serde(default)]
    allow_all_tools: bool,
    #[serde(default)]
    allow_all_resources: bool,
    #[serde(default)]
    server_ids: Vec<String>,
    #[serde(default)]
    allowed_tools: Vec<String>,
    #[serde(default)]
    allowed_resources: Vec<String>,
    #[serde(default)]
    never_expires: bool,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    revoked_at: Option<DateTime<Utc>>,
}

impl From<TokenRecordFields> for TokenRecord {
    fn from(f: TokenRecordFields) -> Self {
        Self {
            id: f.id,
            token_name: f.token_name,
            workspace_id: f.workspace_id,
            subject_username: f.subject_username,
            servers: Scope::from_flag(f.allow_all_servers, f.server_ids),
            tools: Scope::from_flag(f.allow_all_tools, f.allowed_tools),
            resources: Scope::from_flag(f.allow_all_resources, f.allowed_resources),
            never_expires: f.never_expires,
            expires_at: f.expires_at,
            revoked_at: f.revoked_at,
        }
    }
}

impl From<TokenRecord> for TokenRecordFields {
    fn from(r: TokenRecord) -> Self {
        Self {
            allow_all_servers: r.servers.is_all(),
            allow_all_tools: r.tools.is_all(),
            allow_all_resources: r.resources.is_all(),
            server_ids: r.servers.items(),
            allowed_tools: r.tools.items(),
            allowed_resources: r.resources.items(),
            id: r.id,
            token_name: r.token_name,
            workspace_id: r.workspace_id,
            subject_username: r.subject_username,
            never_expires: r.never_expires,
            expires_at: r.expires_at,
            revoked_at: r.revoked_at,
        }
    }
}

/// Per-server authentication requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerAuthConfig {
    #[serde(default = "default_true")]
    pub require_mcp_token: bool,
}

impl Default for ServerAuthConfig {
    fn default() -> Self {
        Self {
            require_mcp_token: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_db_config_dispatches_on_type() {
        let pg = DbConfig::from_value(&json!({
            "type": "postgres",
            "host": "db.internal",
            "database": "shop",
            "username": "app",
            "password": "secret"
        }))
        .unwrap();
        assert_eq!(pg.vendor(), VendorKind::Postgresql);

        let mssql = DbConfig::from_value(&json!({
            "type": "mssql",
            "server": "sql.internal",
            "database": "crm",
            "username": "sa",
            "password": "pw"
        }))
        .unwrap();
        match mssql {
            DbConfig::Mssql(cfg) => {
                assert_eq!(cfg.host, "sql.internal");
                assert!(!cfg.encrypt);
                assert!(cfg.trust_server_certificate);
                assert_eq!(cfg.port, None);
            }
            other => panic!("unexpected config {other:?}"),
        }

        let sqlite = DbConfig::from_value(&json!({"type": "sqlite", "database": "/tmp/x.db"})).unwrap();
        assert_eq!(sqlite.vendor(), VendorKind::Sqlite);
    }

    #[test]
    fn test_unknown_vendor_is_unsupported() {
        let err = DbConfig::from_value(&json!({"type": "oracle", "host": "h"})).unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedVendor(v) if v == "oracle"));
    }

    #[test]
    fn test_password_not_in_debug() {
        let cfg = DbConfig::from_value(&json!({
            "type": "mysql", "host": "h", "database": "d", "password": "hunter2"
        }))
        .unwrap();
        assert!(!format!("{cfg:?}").contains("hunter2"));
    }

    #[test]
    fn test_token_record_scopes_from_flat_fields() {
        let record: TokenRecord = serde_json::from_value(json!({
            "id": "tok-1",
            "tokenName": "ci",
            "workspaceId": "acme",
            "subjectUsername": "alice",
            "allowAllServers": false,
            "allowAllTools": true,
            "serverIds": ["acme"],
            "allowedResources": ["acme__users"],
            "neverExpires": true
        }))
        .unwrap();

        assert!(record.servers.allows("acme"));
        assert!(!record.servers.allows("other"));
        assert!(record.tools.allows("anything__goes"));
        assert!(record.resources.allows("acme__users"));
        assert!(!record.resources.allows("acme__orders"));

        let flat = serde_json::to_value(&record).unwrap();
        assert_eq!(flat["allowAllTools"], json!(true));
        assert_eq!(flat["serverIds"], json!(["acme"]));
    }

    #[test]
    fn test_token_expiry() {
        let now = Utc::now();
        let mut record: TokenRecord = serde_json::from_value(json!({
            "id": "t", "workspaceId": "w", "subjectUsername": "u"
        }))
        .unwrap();

        assert!(record.is_expired(now), "no expiry and not never-expiring");

        record.expires_at = Some(now + Duration::minutes(5));
        assert!(!record.is_expired(now));
        assert!(record.is_expired(now + Duration::minutes(5)));

        record.never_expires = true;
        assert!(!record.is_expired(now + Duration::days(3650)));
    }

    #[test]
    fn test_operation_parse() {
        assert_eq!("select".parse::<Operation>().unwrap(), Operation::Select);
        assert!(Operation::Select.is_read());
        assert!(!Operation::Delete.is_read());
        assert!("MERGE".parse::<Operation>().is_err());
    }
}
