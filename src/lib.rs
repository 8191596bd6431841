//! # Campus Tenancy
//!
//! Request-time tenant routing for a multi-tenant school management backend.
//!
//! Every school (tenant) is served from its own subdomain and owns its own
//! database. For each request this crate turns the Host header into a
//! repository facade bound to exactly that school's database, connecting
//! lazily and at most once per school no matter how many requests arrive
//! concurrently.
//!
//! ## Features
//!
//! - **Subdomain parsing**: `stmarys.example.com` → `stmarys`, with reserved labels rejected up front
//! - **Registry-backed resolution**: unknown and disabled schools never reach a tenant database
//! - **Singleflight connection cache**: one connect attempt per school, shared by every waiting request
//! - **Transient failures**: a failed school is retried after a short backoff, never cached as broken
//! - **Invalidation**: status or connection changes in the registry drop the cached connection
//!
//! ## Architecture
//!
//! - [`tenant`] - Host parsing, registry records, resolver and status watcher
//! - [`connection`] - Connector and per-tenant connection cache
//! - [`repository`] - Tenant-bound repository facade and entities
//! - [`service`] - `resolve_and_acquire` entry point
//! - [`server`] - Axum middleware and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use campus_tenancy::{
//!     ConnectionCache, HostParser, InMemoryRegistry, SeaOrmConnector, TenantResolver,
//!     TenantService,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = InMemoryRegistry::from_json_file("tenants.json").await.unwrap();
//!     let resolver = TenantResolver::new(HostParser::new("example.com"), registry);
//!     let service = TenantService::new(resolver, ConnectionCache::new(SeaOrmConnector::new()));
//!
//!     let repos = service.resolve_and_acquire("stmarys.example.com").await.unwrap();
//!     println!("{} students", repos.students().count().await.unwrap());
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod repository;
pub mod server;
pub mod service;
pub mod tenant;

// Re-export commonly used types
pub use config::{CheckConfig, Cli, Command, RegistryArgs, ServeConfig};
pub use connection::{
    CacheSettings, CacheStats, ConnectionCache, Connector, SeaOrmConnector, SlotState,
};
pub use error::{ConnectionError, ParseError, RegistryError, ResolveError, TenantError};
pub use repository::{Repository, RepositoryFacade};
pub use server::{create_router, create_shared_router, AppState, ErrorResponse, RouterConfig};
pub use service::TenantService;
pub use tenant::{
    ConnectionTarget, DatabaseRegistry, Driver, HostParser, InMemoryRegistry, StatusWatcher,
    TenantDescriptor, TenantRecord, TenantRegistry, TenantResolver, TenantStatus,
};
