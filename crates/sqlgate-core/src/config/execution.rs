//! Query execution and pooling limits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Caller-facing deadline for a tool call or resource read.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Bound to an unset `limit` parameter.
    #[serde(default = "default_limit")]
    pub default_limit: i64,

    /// Bound to an unset `offset` parameter.
    #[serde(default)]
    pub default_offset: i64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            default_limit: default_limit(),
            default_offset: 0,
        }
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Upper bound for pooled vendors (PostgreSQL, MySQL, SQLite).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl PoolConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_limit() -> i64 {
    100
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout_ms() -> u64 {
    15_000
}
