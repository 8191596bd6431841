//! Physical connection establishment.

use std::time::Duration;

use async_trait::async_trait;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tracing::debug;

use crate::error::ConnectionError;
use crate::tenant::ConnectionTarget;

/// Default number of pooled connections per tenant database.
pub const DEFAULT_POOL_SIZE: u32 = 5;

/// Opens connections to tenant databases.
///
/// The connection cache calls this at most once at a time per slug and bounds
/// it with its own connect timeout.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a connection to the given target.
    async fn connect(&self, target: &ConnectionTarget)
        -> Result<DatabaseConnection, ConnectionError>;
}

/// Connector that opens a sea-orm connection pool per tenant.
#[derive(Debug, Clone)]
pub struct SeaOrmConnector {
    pool_size: u32,
    connect_timeout: Option<Duration>,
    sqlx_logging: bool,
}

impl SeaOrmConnector {
    pub fn new() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            connect_timeout: None,
            sqlx_logging: false,
        }
    }

    /// Maximum pooled connections per tenant.
    pub fn with_pool_size(mut self, pool_size: u32) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    /// Driver-level connect timeout, in addition to the cache's deadline.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Enable per-statement sqlx logging.
    pub fn with_sqlx_logging(mut self, enabled: bool) -> Self {
        self.sqlx_logging = enabled;
        self
    }

    fn options(&self, target: &ConnectionTarget) -> Result<ConnectOptions, ConnectionError> {
        let mut options = ConnectOptions::new(target.to_url()?);
        options
            .max_connections(self.pool_size)
            .sqlx_logging(self.sqlx_logging);

        if let Some(timeout) = self.connect_timeout {
            options.connect_timeout(timeout).acquire_timeout(timeout);
        }

        // Every pooled connection to :memory: would be a separate database
        if target.is_in_memory() {
            options.max_connections(1).min_connections(1);
        }

        Ok(options)
    }
}

impl Default for SeaOrmConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for SeaOrmConnector {
    async fn connect(
        &self,
        target: &ConnectionTarget,
    ) -> Result<DatabaseConnection, ConnectionError> {
        let options = self.options(target)?;
        debug!(url = %target.redacted_url(), "Opening tenant database connection");

        Database::connect(options)
            .await
            .map_err(|e| ConnectionError::from_db_err(&e))
    }
}
