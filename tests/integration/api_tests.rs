//! API integration tests for tenant routing over HTTP.
//!
//! Tests verify:
//! - The Host header selects the school
//! - Error cases map to the right status codes and bodies
//! - Public endpoints work without a tenant

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use campus_tenancy::{create_router, create_shared_router, CacheSettings, RouterConfig};

use super::test_utils::{
    host, new_student, test_registry, test_service, TestConnector, TestService,
};

fn router(service: TestService) -> Router {
    create_router(service, RouterConfig::new().with_tracing(false))
}

fn get(uri: &str, host_header: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::HOST, host_header)
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

// =============================================================================
// Tenant Routes
// =============================================================================

#[tokio::test]
async fn test_tenant_summary() {
    let router = router(test_service(
        test_registry(),
        TestConnector::new(),
        CacheSettings::default(),
    ));

    let response = router.oneshot(get("/tenant", &host("stmarys"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["slug"], "stmarys");
    assert_eq!(body["users"], 1);
    assert_eq!(body["students"], 0);
    assert_eq!(body["fees"], 0);
}

#[tokio::test]
async fn test_students_come_from_host_school() {
    let service = Arc::new(test_service(
        test_registry(),
        TestConnector::new(),
        CacheSettings::default(),
    ));
    let facade = service.resolve_and_acquire(&host("oakwood")).await.unwrap();
    facade
        .students()
        .insert(new_student("OW-7", "Olive"))
        .await
        .unwrap();

    let router = create_shared_router(Arc::clone(&service), RouterConfig::new().with_tracing(false));

    let response = router
        .clone()
        .oneshot(get("/tenant/students", &host("oakwood")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["slug"], "oakwood");
    assert_eq!(body["students"][0]["admission_no"], "OW-7");

    let response = router
        .oneshot(get("/tenant/students", &host("stmarys")))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["students"].as_array().unwrap().len(), 0);
}

// =============================================================================
// Error Mapping
// =============================================================================

#[tokio::test]
async fn test_error_status_codes() {
    let connector = TestConnector::new();
    connector.set_unreachable("school_badschool", true);
    let router = router(test_service(test_registry(), connector, CacheSettings::default()));

    let cases = [
        ("www.example.com", StatusCode::NOT_FOUND, "not_a_tenant_host"),
        ("stmarys.other.org", StatusCode::NOT_FOUND, "not_a_tenant_host"),
        ("ghost.example.com", StatusCode::NOT_FOUND, "unknown_tenant"),
        ("suspended.example.com", StatusCode::FORBIDDEN, "tenant_inactive"),
        ("newschool.example.com", StatusCode::FORBIDDEN, "tenant_inactive"),
        ("badschool.example.com", StatusCode::SERVICE_UNAVAILABLE, "tenant_unavailable"),
    ];

    for (host_header, status, error) in cases {
        let response = router
            .clone()
            .oneshot(get("/tenant", host_header))
            .await
            .unwrap();
        assert_eq!(response.status(), status, "{host_header}");
        assert_eq!(
            response.headers().contains_key(header::RETRY_AFTER),
            status == StatusCode::SERVICE_UNAVAILABLE
        );
        let body = json_body(response).await;
        assert_eq!(body["error"], error);
        assert_eq!(body["status"], status.as_u16());
    }
}

#[tokio::test]
async fn test_error_messages() {
    let router = router(test_service(
        test_registry(),
        TestConnector::new(),
        CacheSettings::default(),
    ));

    let response = router
        .clone()
        .oneshot(get("/tenant", "ghost.example.com"))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["message"], "School not found");

    let response = router
        .oneshot(get("/tenant", "suspended.example.com"))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["message"], "School disabled");
}

// =============================================================================
// Public Routes
// =============================================================================

#[tokio::test]
async fn test_health_without_tenant() {
    let router = router(test_service(
        test_registry(),
        TestConnector::new(),
        CacheSettings::default(),
    ));

    let response = router.oneshot(get("/health", "example.com")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "healthy");
}

#[tokio::test]
async fn test_status_reports_cache() {
    let service = Arc::new(test_service(
        test_registry(),
        TestConnector::new(),
        CacheSettings::default(),
    ));
    let router = create_shared_router(Arc::clone(&service), RouterConfig::new().with_tracing(false));

    router
        .clone()
        .oneshot(get("/tenant", &host("stmarys")))
        .await
        .unwrap();

    let response = router.oneshot(get("/status", "example.com")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["ready"], 1);
    assert_eq!(body["connect_attempts"], 1);
    assert_eq!(body["closed"], false);
}

#[tokio::test]
async fn test_status_can_be_hidden() {
    let router = create_router(
        test_service(test_registry(), TestConnector::new(), CacheSettings::default()),
        RouterConfig::new().with_tracing(false).with_status(false),
    );

    let response = router.oneshot(get("/status", "example.com")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
