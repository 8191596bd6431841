//! Registry polling for status and connection changes.
//!
//! The registry has no change feed, so the watcher lists it on an interval
//! and invalidates cached connections for tenants whose status or connection
//! target changed, or which disappeared. The next request then resolves and
//! connects afresh.

use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionCache, Connector};
use crate::error::RegistryError;

use super::record::{ConnectionTarget, TenantStatus};
use super::registry::TenantRegistry;

/// Default interval between registry polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Watches the registry and invalidates stale cache entries.
pub struct StatusWatcher<R: TenantRegistry, C: Connector> {
    registry: R,
    cache: ConnectionCache<C>,
    known: Option<HashMap<String, (TenantStatus, ConnectionTarget)>>,
}

impl<R, C> StatusWatcher<R, C>
where
    R: TenantRegistry + 'static,
    C: Connector,
{
    pub fn new(registry: R, cache: ConnectionCache<C>) -> Self {
        Self {
            registry,
            cache,
            known: None,
        }
    }

    /// List the registry once and invalidate every slug that changed.
    ///
    /// The first poll only records a baseline. Returns the invalidated slugs.
    pub async fn poll_once(&mut self) -> Result<Vec<String>, RegistryError> {
        let current: HashMap<_, _> = self
            .registry
            .list()
            .await?
            .into_iter()
            .map(|record| (record.slug, (record.status, record.connection_target)))
            .collect();

        let Some(previous) = self.known.take() else {
            debug!(tenants = current.len(), "Recorded registry baseline");
            self.known = Some(current);
            return Ok(Vec::new());
        };

        let mut changed: Vec<String> = previous
            .iter()
            .filter(|(slug, before)| current.get(*slug) != Some(*before))
            .map(|(slug, _)| slug.clone())
            .collect();
        changed.sort();

        let mut invalidated = Vec::new();
        for slug in changed {
            match current.get(&slug) {
                Some((status, _)) => {
                    info!(slug = %slug, status = %status, "Tenant registry entry changed")
                }
                None => info!(slug = %slug, "Tenant removed from registry"),
            }
            if self.cache.invalidate(&slug).await {
                invalidated.push(slug);
            }
        }

        self.known = Some(current);
        Ok(invalidated)
    }

    /// Poll on an interval until the cache is closed.
    pub fn spawn(mut self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if self.cache.is_closed() {
                    break;
                }
                if let Err(e) = self.poll_once().await {
                    warn!(error = %e, "Registry poll failed");
                }
            }
        })
    }
}
