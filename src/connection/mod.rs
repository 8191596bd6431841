//! Tenant database connections.
//!
//! [`Connector`] opens one physical connection; [`ConnectionCache`] decides
//! when to call it. Callers never see a raw connection, only a
//! [`RepositoryFacade`](crate::repository::RepositoryFacade) bound to it.

mod cache;
mod connector;

pub use cache::{
    CacheSettings, CacheStats, ConnectionCache, SlotState, DEFAULT_ACQUIRE_TIMEOUT,
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_FAILURE_BACKOFF, DEFAULT_MAX_TENANTS,
};
pub use connector::{Connector, SeaOrmConnector, DEFAULT_POOL_SIZE};
