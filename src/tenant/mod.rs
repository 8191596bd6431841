//! Tenant identity: host parsing, registry records and resolution.
//!
//! # Architecture
//!
//! ```text
//!   Host header
//!        │
//!        ▼
//! ┌──────────────────┐     ┌──────────────────────────────┐
//! │    HostParser    │     │        TenantRegistry        │
//! │ (slug or reject) │     │ (InMemoryRegistry, Database- │
//! └────────┬─────────┘     │  Registry: control plane)    │
//!          │               └──────────────┬───────────────┘
//!          ▼                              │
//! ┌──────────────────────────────────┐    │
//! │          TenantResolver          │◀───┘
//! │ (point lookup, status checks)    │
//! └────────┬─────────────────────────┘
//!          ▼
//!   TenantDescriptor ──▶ connection cache
//! ```
//!
//! [`StatusWatcher`] polls the registry and invalidates cached connections of
//! tenants whose record changed.

mod host;
mod record;
mod registry;
mod resolver;
pub mod store;
mod watcher;

pub use host::{validate_slug, HostParser, DEFAULT_RESERVED_LABELS, MAX_SLUG_LEN};
pub use record::{ConnectionTarget, Driver, TenantDescriptor, TenantRecord, TenantStatus};
pub use registry::{InMemoryRegistry, TenantRegistry};
pub use resolver::{TenantResolver, DEFAULT_LOOKUP_TIMEOUT};
pub use store::DatabaseRegistry;
pub use watcher::{StatusWatcher, DEFAULT_POLL_INTERVAL};
