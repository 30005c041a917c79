//! `sqlgate check` command implementation.
//!
//! Loads the metadata store and reports what the gateway would fail to
//! serve:
//! - servers whose `dbConfig` does not decode (unknown vendor, bad fields)
//! - tools and resources pointing at a missing server
//! - definitions whose full name cannot be addressed
//! - tools whose placeholders cannot be bound

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use serde_json::Value;
use sqlgate_core::{ExecutionConfig, FullName, VendorKind};
use sqlgate_mcp::vendor::bind_query;
use sqlgate_store::{MetadataStore, StoreStats};

/// Arguments for `sqlgate check`.
#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Configuration file path (defaults to ./sqlgate.yaml when present).
    #[arg(short, long, env = "SQLGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Metadata store file. Overrides config file.
    #[arg(long, env = "SQLGATE_STORE_PATH")]
    pub store: Option<PathBuf>,
}

/// Severity level for check results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// May indicate a potential issue.
    Warning,
    /// Calls against this record will fail.
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// A single finding.
#[derive(Debug, Clone)]
pub struct Finding {
    pub severity: Severity,
    pub subject: String,
    pub message: String,
}

#[derive(Debug)]
pub struct CheckReport {
    pub stats: StoreStats,
    pub findings: Vec<Finding>,
}

impl CheckReport {
    pub fn error_count(&self) -> usize {
        self.findings.iter().filter(|f| f.severity == Severity::Error).count()
    }

    fn push(&mut self, severity: Severity, subject: impl Into<String>, message: impl Into<String>) {
        self.findings.push(Finding {
            severity,
            subject: subject.into(),
            message: message.into(),
        });
    }
}

/// Inspect every record in `store`.
pub async fn inspect(store: &dyn MetadataStore) -> anyhow::Result<CheckReport> {
    let mut report = CheckReport {
        stats: store.stats().await.context("Failed to count records")?,
        findings: Vec::new(),
    };

    let servers = store.list_servers().await.context("Failed to list servers")?;
    let mut vendors: HashMap<String, Option<VendorKind>> = HashMap::new();
    for server in &servers {
        let vendor = match server.db_config() {
            Ok(config) => Some(config.vendor()),
            Err(e) => {
                report.push(Severity::Error, &server.id, e.to_string());
                None
            }
        };
        vendors.insert(server.id.clone(), vendor);
    }

    let defaults = ExecutionConfig::default();
    for tool in store.get_all_tools().await.context("Failed to list tools")? {
        let full_name = tool.full_name();
        if let Err(e) = FullName::parse(&full_name) {
            report.push(Severity::Error, &full_name, e.to_string());
        }
        match vendors.get(&tool.server_id) {
            None => report.push(Severity::Error, &full_name, format!("server '{}' does not exist", tool.server_id)),
            Some(None) => {}
            Some(Some(vendor)) => {
                if let Err(e) = bind_query(
                    *vendor,
                    &tool.sql_query,
                    &Value::Null,
                    tool.parameters.as_deref(),
                    tool.operation,
                    &defaults,
                ) {
                    report.push(Severity::Error, &full_name, e.to_string());
                }
            }
        }
        if !tool.input_schema.is_object() {
            report.push(Severity::Warning, &full_name, "input schema is not an object; arguments are not validated");
        }
    }

    for resource in store.get_all_resources().await.context("Failed to list resources")? {
        let full_name = resource.full_name();
        if let Err(e) = FullName::parse(&full_name) {
            report.push(Severity::Error, &full_name, e.to_string());
        }
        if !vendors.contains_key(&resource.server_id) {
            report.push(
                Severity::Error,
                &full_name,
                format!("server '{}' does not exist", resource.server_id),
            );
        }
    }

    report.findings.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.subject.cmp(&b.subject)));
    Ok(report)
}

/// Print the store summary and every finding; fail if any error was found.
pub async fn run(args: CheckArgs) -> anyhow::Result<()> {
    let mut config = super::load_config(args.config.as_deref())?;
    if let Some(store) = args.store {
        config.store.path = store;
    }

    let store = super::open_store(&config.store.path).await?;
    let report = inspect(&*store).await?;
    store.close().await;

    println!("Store: {}", config.store.path.display());
    println!("  servers:   {}", report.stats.servers);
    println!("  tools:     {}", report.stats.tools);
    println!("  resources: {}", report.stats.resources);

    if report.findings.is_empty() {
        println!("\nNo problems found.");
        return Ok(());
    }

    println!();
    for finding in &report.findings {
        println!("[{}] {}: {}", finding.severity, finding.subject, finding.message);
    }

    let errors = report.error_count();
    if errors > 0 {
        anyhow::bail!("{errors} error(s) found");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlgate_core::{Operation, ResourceDefinition, ServerRecord, ToolDefinition};
    use sqlgate_store::MemoryStore;

    fn server(id: &str, db_config: Value) -> ServerRecord {
        ServerRecord {
            id: id.into(),
            name: id.into(),
            db_config,
            created_at: None,
        }
    }

    fn tool(server_id: &str, name: &str, sql: &str, parameters: Option<Vec<String>>) -> ToolDefinition {
        ToolDefinition {
            server_id: server_id.into(),
            name: name.into(),
            description: String::new(),
            input_schema: json!({ "type": "object" }),
            sql_query: sql.into(),
            operation: Operation::Select,
            parameters,
        }
    }

    #[tokio::test]
    async fn test_clean_store() {
        let store = MemoryStore::new();
        store.insert_server(server("acme", json!({ "type": "sqlite", "path": "acme.db" })));
        store.insert_tool(tool("acme", "get_users", "SELECT * FROM users LIMIT @limit", None));

        let report = inspect(&store).await.unwrap();
        assert_eq!(report.stats.servers, 1);
        assert_eq!(report.stats.tools, 1);
        assert!(report.findings.is_empty(), "{:?}", report.findings);
    }

    #[tokio::test]
    async fn test_reports_unservable_records() {
        let store = MemoryStore::new();
        store.insert_server(server("legacy", json!({ "type": "oracle", "host": "db" })));
        store.insert_server(server("acme", json!({ "type": "mysql", "host": "db", "database": "app" })));
        // Vendor is unusable, so the tool is only reported through its server.
        store.insert_tool(tool("legacy", "list", "SELECT 1", None));
        store.insert_tool(tool("acme", "by_id", "SELECT * FROM t WHERE id = ?", None));
        store.insert_tool(tool("acme", "by_pair", "SELECT * FROM t WHERE a = ? AND b = ?", Some(vec!["a".into()])));
        store.insert_tool(tool("acme", "get__all", "SELECT * FROM t", None));
        store.insert_resource(ResourceDefinition {
            server_id: "gone".into(),
            name: "rows".into(),
            description: String::new(),
            uri_template: "table://rows".into(),
            sql_query: "SELECT 1".into(),
        });

        let report = inspect(&store).await.unwrap();
        let subjects: Vec<&str> = report.findings.iter().map(|f| f.subject.as_str()).collect();
        assert_eq!(
            subjects,
            vec!["acme__by_id", "acme__by_pair", "acme__get__all", "gone__rows", "legacy"]
        );
        assert_eq!(report.error_count(), 5);
    }
}
