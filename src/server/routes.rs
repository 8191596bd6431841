//! Router configuration.
//!
//! # Route Structure
//!
//! ```text
//! /health             - Health check (no tenant)
//! /status             - Connection cache counters (no tenant)
//! /tenant             - Tenant summary (Host header resolved by middleware)
//! /tenant/students    - Tenant students (Host header resolved by middleware)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let service = TenantService::new(resolver, ConnectionCache::new(SeaOrmConnector::new()));
//! let router = create_router(service, RouterConfig::new());
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

use super::handlers::{
    health_handler, status_handler, students_handler, tenant_handler, tenant_middleware, AppState,
};
use crate::connection::Connector;
use crate::service::TenantService;
use crate::tenant::TenantRegistry;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Whether to enable request tracing
    pub enable_tracing: bool,

    /// Whether to expose `/status`
    pub expose_status: bool,
}

impl RouterConfig {
    /// Tracing and `/status` enabled.
    pub fn new() -> Self {
        Self {
            enable_tracing: true,
            expose_status: true,
        }
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }

    pub fn with_status(mut self, enabled: bool) -> Self {
        self.expose_status = enabled;
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the application router around a tenant service.
pub fn create_router<R, C>(service: TenantService<R, C>, config: RouterConfig) -> Router
where
    R: TenantRegistry + 'static,
    C: Connector,
{
    create_shared_router(Arc::new(service), config)
}

/// Like [`create_router`], for a service also held by the caller.
pub fn create_shared_router<R, C>(service: Arc<TenantService<R, C>>, config: RouterConfig) -> Router
where
    R: TenantRegistry + 'static,
    C: Connector,
{
    let app_state = AppState::from_shared(service);

    // Every route nested here sees the tenant facade in its extensions
    let tenant_routes = Router::new()
        .route("/tenant", get(tenant_handler))
        .route("/tenant/students", get(students_handler))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            tenant_middleware::<R, C>,
        ));

    let mut public_routes = Router::new().route("/health", get(health_handler));
    if config.expose_status {
        public_routes = public_routes.route("/status", get(status_handler::<R, C>));
    }

    let router = public_routes.with_state(app_state).merge(tenant_routes);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}
