//! HTTP handlers and tenant middleware.
//!
//! # Endpoints
//!
//! - `GET /health` - Liveness check, never touches a tenant
//! - `GET /status` - Connection cache counters
//! - `GET /tenant` - Row counts for the tenant named by the Host header
//! - `GET /tenant/students` - Students of that tenant

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use http::{header, HeaderValue, StatusCode};
use sea_orm::DbErr;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::connection::{CacheStats, Connector};
use crate::error::{ParseError, TenantError};
use crate::repository::entity::student;
use crate::repository::RepositoryFacade;
use crate::service::TenantService;
use crate::tenant::TenantRegistry;

/// Seconds clients are asked to wait before retrying a 503.
pub const RETRY_AFTER_SECS: u64 = 2;

// =============================================================================
// Application State
// =============================================================================

/// Shared application state, passed to handlers via Axum's State extractor.
pub struct AppState<R: TenantRegistry, C: Connector> {
    pub service: Arc<TenantService<R, C>>,
}

impl<R: TenantRegistry, C: Connector> AppState<R, C> {
    pub fn new(service: TenantService<R, C>) -> Self {
        Self::from_shared(Arc::new(service))
    }

    /// Wrap a service that is also held elsewhere (e.g. for shutdown).
    pub fn from_shared(service: Arc<TenantService<R, C>>) -> Self {
        Self { service }
    }
}

impl<R: TenantRegistry, C: Connector> Clone for AppState<R, C> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "unknown_tenant")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Connection cache counters.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub closed: bool,
    #[serde(flatten)]
    pub cache: CacheStats,
}

/// Summary of the tenant addressed by the request.
#[derive(Debug, Serialize)]
pub struct TenantSummaryResponse {
    pub slug: String,
    pub users: u64,
    pub students: u64,
    pub fees: u64,
}

#[derive(Debug, Serialize)]
pub struct StudentResponse {
    pub id: i32,
    pub admission_no: String,
    pub name: String,
    pub class_name: String,
    pub enrolled_at: DateTime<Utc>,
}

impl From<student::Model> for StudentResponse {
    fn from(model: student::Model) -> Self {
        Self {
            id: model.id,
            admission_no: model.admission_no,
            name: model.name,
            class_name: model.class_name,
            enrolled_at: model.enrolled_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StudentsResponse {
    pub slug: String,
    pub students: Vec<StudentResponse>,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Convert TenantError to HTTP response.
///
/// Unknown and malformed hosts log at DEBUG, disabled schools at WARN and
/// unavailable databases at ERROR. Retryable failures carry `Retry-After`.
impl IntoResponse for TenantError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            TenantError::NotATenantHost(parse) => (
                StatusCode::NOT_FOUND,
                "not_a_tenant_host",
                parse.to_string(),
            ),
            TenantError::UnknownTenant { .. } => (
                StatusCode::NOT_FOUND,
                "unknown_tenant",
                "School not found".to_string(),
            ),
            TenantError::TenantInactive { .. } => (
                StatusCode::FORBIDDEN,
                "tenant_inactive",
                "School disabled".to_string(),
            ),
            TenantError::ConnectionFailed { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "tenant_unavailable",
                "School database is temporarily unavailable".to_string(),
            ),
            TenantError::Timeout { .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "tenant_timeout",
                "Timed out connecting to school database".to_string(),
            ),
        };

        if status.is_server_error() {
            error!(error_type = error_type, status = status.as_u16(), "Server error: {}", self);
        } else if status == StatusCode::NOT_FOUND {
            debug!(error_type = error_type, status = status.as_u16(), "Not found: {}", self);
        } else {
            warn!(error_type = error_type, status = status.as_u16(), "Client error: {}", self);
        }

        let body = Json(ErrorResponse::with_status(error_type, message, status));
        let mut response = (status, body).into_response();
        if self.is_retryable() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
        }
        response
    }
}

fn database_error(slug: &str, err: DbErr) -> Response {
    error!(slug = %slug, error = %err, "Tenant query failed");
    let status = StatusCode::INTERNAL_SERVER_ERROR;
    let body = ErrorResponse::with_status("database_error", "Query failed", status);
    (status, Json(body)).into_response()
}

// =============================================================================
// Middleware
// =============================================================================

/// Resolve the Host header to a tenant and attach its [`RepositoryFacade`].
///
/// Handlers behind this layer extract `Extension<RepositoryFacade>` and can
/// only reach that tenant's database.
pub async fn tenant_middleware<R, C>(
    State(state): State<AppState<R, C>>,
    mut request: Request,
    next: Next,
) -> Result<Response, TenantError>
where
    R: TenantRegistry + 'static,
    C: Connector,
{
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| request.uri().host())
        .map(str::to_owned)
        .ok_or(TenantError::NotATenantHost(ParseError::Malformed {
            host: String::new(),
            reason: "missing host header",
        }))?;

    let facade = state.service.resolve_and_acquire(&host).await?;
    request.extensions_mut().insert(facade);

    Ok(next.run(request).await)
}

// =============================================================================
// Handlers
// =============================================================================

pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn status_handler<R, C>(State(state): State<AppState<R, C>>) -> Json<StatusResponse>
where
    R: TenantRegistry + 'static,
    C: Connector,
{
    Json(StatusResponse {
        closed: state.service.cache().is_closed(),
        cache: state.service.stats().await,
    })
}

pub async fn tenant_handler(
    Extension(facade): Extension<RepositoryFacade>,
) -> Result<Json<TenantSummaryResponse>, Response> {
    let slug = facade.slug();
    let users = facade.users().count().await.map_err(|e| database_error(slug, e))?;
    let students = facade.students().count().await.map_err(|e| database_error(slug, e))?;
    let fees = facade.fees().count().await.map_err(|e| database_error(slug, e))?;

    Ok(Json(TenantSummaryResponse {
        slug: slug.to_string(),
        users,
        students,
        fees,
    }))
}

pub async fn students_handler(
    Extension(facade): Extension<RepositoryFacade>,
) -> Result<Json<StudentsResponse>, Response> {
    let students = facade
        .students()
        .find_all()
        .await
        .map_err(|e| database_error(facade.slug(), e))?;

    Ok(Json(StudentsResponse {
        slug: facade.slug().to_string(),
        students: students.into_iter().map(StudentResponse::from).collect(),
    }))
}
