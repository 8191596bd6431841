//! Host header to tenant descriptor resolution.
//!
//! Resolution never touches a tenant database: it parses the host and performs
//! one point read against the registry. Connecting is the connection cache's
//! job.

use std::time::Duration;

use tracing::debug;

use crate::error::ResolveError;

use super::host::HostParser;
use super::record::TenantDescriptor;
use super::registry::TenantRegistry;

/// Default deadline for the registry point read.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Resolves host headers to active tenants.
pub struct TenantResolver<R: TenantRegistry> {
    parser: HostParser,
    registry: R,
    lookup_timeout: Duration,
}

impl<R: TenantRegistry> TenantResolver<R> {
    /// Create a resolver with the default lookup timeout.
    pub fn new(parser: HostParser, registry: R) -> Self {
        Self::with_lookup_timeout(parser, registry, DEFAULT_LOOKUP_TIMEOUT)
    }

    pub fn with_lookup_timeout(parser: HostParser, registry: R, lookup_timeout: Duration) -> Self {
        Self {
            parser,
            registry,
            lookup_timeout,
        }
    }

    pub fn parser(&self) -> &HostParser {
        &self.parser
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Resolve a host header to an active tenant.
    pub async fn resolve(&self, host_header: &str) -> Result<TenantDescriptor, ResolveError> {
        let slug = self.parser.parse(host_header)?;

        let lookup = self.registry.find_by_slug(&slug);
        let record = match tokio::time::timeout(self.lookup_timeout, lookup).await {
            Ok(Ok(record)) => record,
            Ok(Err(source)) => return Err(ResolveError::Registry { slug, source }),
            Err(_) => {
                return Err(ResolveError::Timeout {
                    slug,
                    after: self.lookup_timeout,
                })
            }
        };

        let Some(record) = record else {
            debug!(slug = %slug, "No registry record for tenant");
            return Err(ResolveError::UnknownTenant { slug });
        };

        if !record.status.is_active() {
            debug!(slug = %slug, status = %record.status, "Tenant is not active");
            return Err(ResolveError::TenantInactive {
                slug,
                status: record.status,
            });
        }

        Ok(record.descriptor())
    }
}
