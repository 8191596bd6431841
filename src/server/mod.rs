//! HTTP surface.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │    Host: <slug>.<apex>  ──▶  tenant_middleware  ──▶  handler    │
//! │                                                                 │
//! │  ┌───────────────────┐  ┌────────────────┐  ┌────────────────┐  │
//! │  │     handlers      │  │   middleware   │  │     routes     │  │
//! │  │ (facade queries)  │  │ (Host → facade)│  │ (router config)│  │
//! │  └───────────────────┘  └────────────────┘  └────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    health_handler, status_handler, students_handler, tenant_handler, tenant_middleware, AppState,
    ErrorResponse, HealthResponse, StatusResponse, StudentResponse, StudentsResponse,
    TenantSummaryResponse, RETRY_AFTER_SECS,
};
pub use routes::{create_router, create_shared_router, RouterConfig};
