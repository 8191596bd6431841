use std::time::Duration;

use thiserror::Error;

use crate::tenant::TenantStatus;

/// Errors produced when a host header cannot name a tenant.
///
/// These are always routing mistakes on the client side and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Host is the apex domain or a reserved label such as `www` or `api`
    #[error("Reserved host label: {0}")]
    Reserved(String),

    /// Host does not have the shape `<slug>.<apex>` or the slug is invalid
    #[error("Malformed tenant host {host:?}: {reason}")]
    Malformed { host: String, reason: &'static str },
}

/// Errors returned by a tenant registry backend.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// Control-plane database error
    #[error("Registry database error: {0}")]
    Database(String),

    /// Registry file could not be read
    #[error("Registry I/O error: {0}")]
    Io(String),

    /// A stored record could not be decoded
    #[error("Invalid registry data: {0}")]
    InvalidData(String),
}

impl From<sea_orm::DbErr> for RegistryError {
    fn from(err: sea_orm::DbErr) -> Self {
        RegistryError::Database(err.to_string())
    }
}

/// Errors from resolving a host header to a tenant descriptor.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// The host is not a tenant host at all
    #[error("Not a tenant host: {0}")]
    NotATenantHost(#[from] ParseError),

    /// No registry record exists for the slug
    #[error("Unknown tenant: {slug}")]
    UnknownTenant { slug: String },

    /// The record exists but is suspended or still pending
    #[error("Tenant {slug} is {status}")]
    TenantInactive { slug: String, status: TenantStatus },

    /// The registry itself failed
    #[error("Registry lookup for {slug} failed: {source}")]
    Registry {
        slug: String,
        #[source]
        source: RegistryError,
    },

    /// The registry lookup did not finish in time
    #[error("Registry lookup for {slug} timed out after {after:?}")]
    Timeout { slug: String, after: Duration },
}

/// Errors from establishing or waiting for a tenant database connection.
///
/// Cloned to every caller waiting on the same connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// Connect handshake or wait exceeded its deadline
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    /// Database rejected the credentials
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Network or driver failure
    #[error("Network error: {0}")]
    Network(String),

    /// Connection target could not be turned into a driver URL
    #[error("Invalid connection target: {0}")]
    InvalidTarget(String),

    /// The tenant was invalidated while the attempt was in flight
    #[error("Tenant was invalidated while connecting")]
    Invalidated,

    /// The cache has been shut down
    #[error("Connection cache is closed")]
    Closed,
}

impl ConnectionError {
    /// Classify a driver error into authentication vs. network failure.
    pub fn from_db_err(err: &sea_orm::DbErr) -> Self {
        use sea_orm::{sqlx, DbErr, RuntimeErr};

        if let DbErr::Conn(RuntimeErr::SqlxError(sqlx::Error::Database(db))) = err {
            // 28P01/28000: Postgres invalid password / authorization; 1045: MySQL access denied
            if matches!(db.code().as_deref(), Some("28P01" | "28000" | "1045")) {
                return ConnectionError::Auth(db.message().to_string());
            }
        }
        ConnectionError::Network(err.to_string())
    }

    /// Whether this error came from a deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConnectionError::Timeout(_))
    }
}

/// Error surfaced to the request-handling layer by
/// [`TenantService::resolve_and_acquire`](crate::service::TenantService::resolve_and_acquire).
#[derive(Debug, Clone, Error)]
pub enum TenantError {
    /// Host does not address a tenant
    #[error("Not a tenant host: {0}")]
    NotATenantHost(ParseError),

    /// No such school
    #[error("Unknown tenant: {slug}")]
    UnknownTenant { slug: String },

    /// School exists but is disabled
    #[error("Tenant {slug} is {status}")]
    TenantInactive { slug: String, status: TenantStatus },

    /// Registry or tenant database unavailable
    #[error("Connection for tenant {slug} failed: {reason}")]
    ConnectionFailed { slug: String, reason: String },

    /// A lookup, connect or wait deadline expired
    #[error("Timed out acquiring tenant {slug}")]
    Timeout { slug: String },
}

impl TenantError {
    /// Build from a connection failure for the given slug.
    pub fn connection(slug: impl Into<String>, err: ConnectionError) -> Self {
        let slug = slug.into();
        match err {
            ConnectionError::Timeout(_) => TenantError::Timeout { slug },
            other => TenantError::ConnectionFailed {
                slug,
                reason: other.to_string(),
            },
        }
    }

    /// Transient failures worth retrying on a later request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TenantError::ConnectionFailed { .. } | TenantError::Timeout { .. }
        )
    }
}

impl From<ResolveError> for TenantError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotATenantHost(parse) => TenantError::NotATenantHost(parse),
            ResolveError::UnknownTenant { slug } => TenantError::UnknownTenant { slug },
            ResolveError::TenantInactive { slug, status } => {
                TenantError::TenantInactive { slug, status }
            }
            ResolveError::Registry { slug, source } => TenantError::ConnectionFailed {
                slug,
                reason: source.to_string(),
            },
            ResolveError::Timeout { slug, .. } => TenantError::Timeout { slug },
        }
    }
}
