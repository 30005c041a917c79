//! Per-backend connection registry.
//!
//! One [`ConnectionHandle`] per server id for the life of the process.
//! Concurrent first callers for the same backend wait on a shared
//! [`OnceCell`], so at most one connection is ever opened and cached per id.
//! A failed open leaves the cell empty and the next call tries again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sqlgate_core::{DbConfig, PoolConfig, VendorKind};
use tokio::sync::OnceCell;

use crate::error::GatewayError;
use crate::vendor::VendorAdapter;

/// A live connection to one backend.
pub struct ConnectionHandle {
    server_id: String,
    adapter: VendorAdapter,
}

impl ConnectionHandle {
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn vendor(&self) -> VendorKind {
        self.adapter.vendor()
    }

    pub fn adapter(&self) -> &VendorAdapter {
        &self.adapter
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("server_id", &self.server_id)
            .field("vendor", &self.vendor())
            .finish_non_exhaustive()
    }
}

type Slot =Arc<OnceCell<Arc<ConnectionHandle>>>;

pub struct ConnectionPool {
    config: PoolConfig,
    slots: Mutex<HashMap<String, Slot>>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached handle for `server_id`, opening it on first use.
    /// A cached handle is returned as is, without re-validation.
    pub async fn get_or_create(
        &self,
        server_id: &str,
        config: &DbConfig,
    ) -> Result<Arc<ConnectionHandle>, GatewayError> {
        let slot = self
            .lock()
            .entry(server_id.to_string())
            .or_default()
            .clone();

        let handle = slot
            .get_or_try_init(|| async {
                tracing::info!(server_id = %server_id, vendor = %config.vendor(), "Opening backend connection");
                let adapter = VendorAdapter::open(server_id, config, &self.config).await?;
                Ok::<_, GatewayError>(Arc::new(ConnectionHandle {
                    server_id: server_id.to_string(),
                    adapter,
                }))
            })
            .await
            .inspect_err(|e| {
                tracing::error!(server_id = %server_id, error = %e, "Failed to open backend connection");
            })?;
        Ok(handle.clone())
    }

    /// Close and forget the handle for one backend.
    pub async fn evict(&self, server_id: &str) -> bool {
        let slot = self.lock().remove(server_id);
        match slot.and_then(|s| s.get().cloned()) {
            Some(handle) => {
                self.close_handle(&handle).await;
                true
            }
            None => false,
        }
    }

    /// Close every handle, tolerating individual failures, and clear the cache.
    pub async fn close_all(&self) {
        let slots: Vec<(String, Slot)> = self.lock().drain().collect();
        for (_, slot) in slots {
            if let Some(handle) = slot.get() {
                self.close_handle(handle).await;
            }
        }
    }

    /// Number of backends with an open handle.
    pub fn active_connections(&self) -> usize {
        self.lock().values().filter(|slot| slot.initialized()).count()
    }

    async fn close_handle(&self, handle: &ConnectionHandle) {
        let server_id = handle.server_id();
        match tokio::time::timeout(self.config.connect_timeout(), handle.adapter().close()).await {
            Ok(Ok(())) => {
                tracing::info!(server_id = %server_id, vendor = %handle.vendor(), "Closed backend connection");
            }
            Ok(Err(e)) => {
                tracing::warn!(server_id = %server_id, error = %e, "Error closing backend connection");
            }
            Err(_) => {
                tracing::warn!(server_id = %server_id, "Timed out closing backend connection");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        // The map is only ever left in a valid state.
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlgate_core::SqliteDbConfig;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};

    async fn create_db(path: &std::path::Path) {
        let pool = SqlitePool::connect_with(SqliteConnectOptions::new().filename(path).create_if_missing(true))
            .await
            .unwrap();
        sqlx::query("CREATE TABLE t (x INTEGER)").execute(&pool).await.unwrap();
        pool.close().await;
    }

    fn sqlite_config(path: &std::path::Path) -> DbConfig {
        DbConfig::Sqlite(SqliteDbConfig {
            path: path.to_string_lossy().into_owned(),
        })
    }

    #[tokio::test]
    async fn test_handle_is_cached_per_server() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.db");
        create_db(&path).await;
        let pool = ConnectionPool::new(PoolConfig::default());
        let config = sqlite_config(&path);

        let (a, b) = tokio::join!(
            pool.get_or_create("acme__db", &config),
            pool.get_or_create("acme__db", &config)
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        let c = pool.get_or_create("acme__db", &config).await.unwrap();
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(pool.active_connections(), 1);
        assert_eq!(a.vendor(), VendorKind::Sqlite);
    }

    #[tokio::test]
    async fn test_failed_open_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.db");
        let pool = ConnectionPool::new(PoolConfig::default());
        let config = sqlite_config(&path);

        let err = pool.get_or_create("acme__late", &config).await.unwrap_err();
        assert!(matches!(err, GatewayError::Connection { .. }));
        assert_eq!(pool.active_connections(), 0);

        create_db(&path).await;
        assert!(pool.get_or_create("acme__late", &config).await.is_ok());
        assert_eq!(pool.active_connections(), 1);
    }

    #[tokio::test]
    async fn test_evict_and_close_all() {
        let dir = tempfile::tempdir().unwrap();
        let (p1, p2) = (dir.path().join("1.db"), dir.path().join("2.db"));
        create_db(&p1).await;
        create_db(&p2).await;
        let pool = ConnectionPool::new(PoolConfig::default());
        pool.get_or_create("acme__one", &sqlite_config(&p1)).await.unwrap();
        pool.get_or_create("acme__two", &sqlite_config(&p2)).await.unwrap();
        assert_eq!(pool.active_connections(), 2);

        assert!(pool.evict("acme__one").await);
        assert!(!pool.evict("acme__one").await);
        assert_eq!(pool.active_connections(), 1);

        pool.close_all().await;
        assert_eq!(pool.active_connections(), 0);
    }
}
