//! Request-facing entry point.
//!
//! [`TenantService`] joins the resolver and the connection cache: a host
//! header goes in, a repository facade bound to exactly that tenant's
//! database comes out.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::connection::{CacheStats, ConnectionCache, Connector};
use crate::error::TenantError;
use crate::repository::RepositoryFacade;
use crate::tenant::{StatusWatcher, TenantRegistry, TenantResolver};

/// Resolves hosts to tenants and hands out their repository facades.
pub struct TenantService<R: TenantRegistry, C: Connector> {
    resolver: TenantResolver<R>,
    cache: ConnectionCache<C>,
}

impl<R, C> TenantService<R, C>
where
    R: TenantRegistry,
    C: Connector,
{
    pub fn new(resolver: TenantResolver<R>, cache: ConnectionCache<C>) -> Self {
        Self { resolver, cache }
    }

    pub fn resolver(&self) -> &TenantResolver<R> {
        &self.resolver
    }

    pub fn cache(&self) -> &ConnectionCache<C> {
        &self.cache
    }

    /// Resolve a host header and return the tenant's repository facade.
    ///
    /// Reserved, unknown and inactive hosts fail before any tenant database
    /// is touched. Connection failures are retryable on a later request.
    pub async fn resolve_and_acquire(
        &self,
        host_header: &str,
    ) -> Result<RepositoryFacade, TenantError> {
        let descriptor = self.resolver.resolve(host_header).await.map_err(|e| {
            debug!(host = %host_header, error = %e, "Host did not resolve to an active tenant");
            TenantError::from(e)
        })?;

        self.cache.acquire(&descriptor).await.map_err(|e| {
            warn!(slug = %descriptor.slug(), error = %e, "Could not acquire tenant connection");
            TenantError::connection(descriptor.slug(), e)
        })
    }

    /// Drop the cached connection for a tenant.
    pub async fn invalidate(&self, slug: &str) -> bool {
        self.cache.invalidate(slug).await
    }

    /// Close every tenant connection. Later calls fail.
    pub async fn close_all(&self) {
        self.cache.close_all().await
    }

    pub async fn stats(&self) -> CacheStats {
        self.cache.stats().await
    }
}

impl<R, C> TenantService<R, C>
where
    R: TenantRegistry + Clone + 'static,
    C: Connector,
{
    /// Start polling the registry for changes. None when `interval` is zero.
    pub fn spawn_watcher(&self, interval: Duration) -> Option<JoinHandle<()>> {
        if interval.is_zero() {
            return None;
        }
        let watcher = StatusWatcher::new(self.resolver.registry().clone(), self.cache.clone());
        Some(watcher.spawn(interval))
    }
}
