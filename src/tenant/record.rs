//! Tenant records as stored by the registry and the descriptors derived from them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConnectionError;

// =============================================================================
// Status
// =============================================================================

/// Lifecycle status of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    /// Serving requests
    Active,
    /// Disabled by an operator
    Suspended,
    /// Provisioned but not yet live
    Pending,
}

impl TenantStatus {
    /// Whether requests may be routed to this tenant.
    pub fn is_active(self) -> bool {
        matches!(self, TenantStatus::Active)
    }

    /// Storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Suspended => "suspended",
            TenantStatus::Pending => "pending",
        }
    }

    /// Parse the storage representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(TenantStatus::Active),
            "suspended" => Some(TenantStatus::Suspended),
            "pending" => Some(TenantStatus::Pending),
            _ => None,
        }
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Connection Target
// =============================================================================

/// Database driver for a tenant's database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Postgres,
    #[serde(rename = "mysql")]
    MySql,
    Sqlite,
}

impl Driver {
    /// URL scheme understood by sea-orm.
    pub fn scheme(self) -> &'static str {
        match self {
            Driver::Postgres => "postgres",
            Driver::MySql => "mysql",
            Driver::Sqlite => "sqlite",
        }
    }

    /// Parse a scheme or driver name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "postgres" | "postgresql" => Some(Driver::Postgres),
            "mysql" => Some(Driver::MySql),
            "sqlite" => Some(Driver::Sqlite),
            _ => None,
        }
    }
}

/// Everything needed to open a connection to one tenant's database.
///
/// Stored explicitly per tenant; the database name is never derived from the
/// host or any other request input. For [`Driver::Sqlite`], `database` is a
/// file path or `:memory:` and `host` is ignored.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTarget {
    pub driver: Driver,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub database: String,
}

impl ConnectionTarget {
    /// Target on a Postgres server.
    pub fn postgres(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            driver: Driver::Postgres,
            host: host.into(),
            port: None,
            username: None,
            password: None,
            database: database.into(),
        }
    }

    /// Target on a MySQL server.
    pub fn mysql(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            driver: Driver::MySql,
            ..Self::postgres(host, database)
        }
    }

    /// SQLite file target.
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            driver: Driver::Sqlite,
            host: String::new(),
            port: None,
            username: None,
            password: None,
            database: path.into(),
        }
    }

    /// Private in-memory SQLite database.
    pub fn sqlite_memory() -> Self {
        Self::sqlite(":memory:")
    }

    /// Set the server port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set login credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Whether this is an in-memory SQLite database.
    pub fn is_in_memory(&self) -> bool {
        self.driver == Driver::Sqlite && self.database == ":memory:"
    }

    /// Build the driver URL.
    pub fn to_url(&self) -> Result<String, ConnectionError> {
        if self.database.is_empty() {
            return Err(ConnectionError::InvalidTarget(
                "database name is empty".to_string(),
            ));
        }

        if self.driver == Driver::Sqlite {
            return Ok(if self.is_in_memory() {
                "sqlite::memory:".to_string()
            } else {
                format!("sqlite://{}?mode=rwc", self.database)
            });
        }

        if self.host.is_empty() {
            return Err(ConnectionError::InvalidTarget("host is empty".to_string()));
        }

        let mut url = Url::parse(&format!("{}://{}", self.driver.scheme(), self.host))
            .map_err(|e| ConnectionError::InvalidTarget(e.to_string()))?;
        let invalid = |what: &str| ConnectionError::InvalidTarget(format!("cannot set {what}"));

        url.set_port(self.port).map_err(|_| invalid("port"))?;
        if let Some(ref username) = self.username {
            url.set_username(username).map_err(|_| invalid("username"))?;
        }
        if self.password.is_some() {
            url.set_password(self.password.as_deref())
                .map_err(|_| invalid("password"))?;
        }
        url.set_path(&format!("/{}", self.database.trim_start_matches('/')));

        Ok(url.into())
    }

    /// Driver URL with the password masked, safe for logs.
    pub fn redacted_url(&self) -> String {
        let mut redacted = self.clone();
        if redacted.password.is_some() {
            redacted.password = Some("***".to_string());
        }
        redacted
            .to_url()
            .unwrap_or_else(|_| format!("{}://<invalid>", self.driver.scheme()))
    }
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTarget")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .finish()
    }
}

// =============================================================================
// Records and Descriptors
// =============================================================================

/// Authoritative registry entry for a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub slug: String,
    pub status: TenantStatus,
    pub connection_target: ConnectionTarget,
    pub created_at: DateTime<Utc>,
}

impl TenantRecord {
    /// New record created now.
    pub fn new(
        slug: impl Into<String>,
        status: TenantStatus,
        connection_target: ConnectionTarget,
    ) -> Self {
        Self {
            slug: slug.into(),
            status,
            connection_target,
            created_at: Utc::now(),
        }
    }

    /// Derive the resolver's view of this record.
    pub fn descriptor(&self) -> TenantDescriptor {
        TenantDescriptor {
            slug: self.slug.clone(),
            connection_target: self.connection_target.clone(),
            status: self.status,
        }
    }
}

/// Immutable snapshot of a resolved tenant, handed to the connection cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantDescriptor {
    slug: String,
    connection_target: ConnectionTarget,
    status: TenantStatus,
}

impl TenantDescriptor {
    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn connection_target(&self) -> &ConnectionTarget {
        &self.connection_target
    }

    pub fn status(&self) -> TenantStatus {
        self.status
    }
}
