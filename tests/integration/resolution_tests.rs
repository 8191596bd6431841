//! Host resolution integration tests.
//!
//! Tests verify:
//! - Reserved and foreign hosts are rejected without a registry lookup
//! - Unknown and inactive schools never cause a connect attempt
//! - File-backed and database-backed registries resolve the same way

use std::sync::Arc;

use sea_orm::{ActiveModelTrait, ConnectionTrait, Database, Schema};

use campus_tenancy::tenant::store::tenant;
use campus_tenancy::{
    CacheSettings, ConnectionCache, DatabaseRegistry, HostParser, InMemoryRegistry, ParseError,
    ResolveError, TenantError, TenantResolver, TenantService, TenantStatus,
};

use super::test_utils::{host, record, test_registry, test_service, TestConnector, APEX};

#[tokio::test]
async fn test_reserved_hosts_are_not_tenants() {
    let connector = TestConnector::new();
    let service = test_service(test_registry(), connector.clone(), CacheSettings::default());

    for host in ["www.example.com", "example.com", "api.example.com", "WWW.Example.COM."] {
        assert!(
            matches!(
                service.resolve_and_acquire(host).await,
                Err(TenantError::NotATenantHost(ParseError::Reserved(_)))
            ),
            "{host} should be reserved"
        );
    }
    assert_eq!(connector.total_attempts(), 0);
}

#[tokio::test]
async fn test_malformed_hosts() {
    let service = test_service(test_registry(), TestConnector::new(), CacheSettings::default());

    for host in [
        "stmarys.other.com",
        "a.b.example.com",
        "-bad.example.com",
        "st_marys.example.com",
        "",
        "localhost",
    ] {
        assert!(
            matches!(
                service.resolve_and_acquire(host).await,
                Err(TenantError::NotATenantHost(ParseError::Malformed { .. }))
            ),
            "{host:?} should be malformed"
        );
    }
}

#[tokio::test]
async fn test_unknown_and_inactive_never_connect() {
    let connector = TestConnector::new();
    let service = test_service(test_registry(), connector.clone(), CacheSettings::default());

    assert!(matches!(
        service.resolve_and_acquire(&host("ghost")).await,
        Err(TenantError::UnknownTenant { ref slug }) if slug == "ghost"
    ));
    assert!(matches!(
        service.resolve_and_acquire(&host("suspended")).await,
        Err(TenantError::TenantInactive { status: TenantStatus::Suspended, .. })
    ));
    assert!(matches!(
        service.resolve_and_acquire(&host("newschool")).await,
        Err(TenantError::TenantInactive { status: TenantStatus::Pending, .. })
    ));
    assert_eq!(connector.total_attempts(), 0);
    assert_eq!(service.stats().await.establishing, 0);
}

#[tokio::test]
async fn test_host_with_port_and_case() {
    let connector = TestConnector::new();
    let service = test_service(test_registry(), connector.clone(), CacheSettings::default());

    let facade = service
        .resolve_and_acquire("StMarys.EXAMPLE.com:8443")
        .await
        .unwrap();
    assert_eq!(facade.slug(), "stmarys");
    assert_eq!(connector.attempts("school_stmarys"), 1);
}

#[tokio::test]
async fn test_database_registry_end_to_end() {
    let control = Database::connect("sqlite::memory:").await.unwrap();
    let backend = control.get_database_backend();
    let create = Schema::new(backend).create_table_from_entity(tenant::Entity);
    control.execute(backend.build(&create)).await.unwrap();
    for record in [
        record("stmarys", TenantStatus::Active),
        record("suspended", TenantStatus::Suspended),
    ] {
        tenant::ActiveModel::from(&record).insert(&control).await.unwrap();
    }

    let registry = DatabaseRegistry::new(control);
    let resolver = TenantResolver::new(HostParser::new(APEX), registry);

    let descriptor = resolver.resolve(&host("stmarys")).await.unwrap();
    assert_eq!(descriptor.connection_target().database, "school_stmarys");
    assert!(matches!(
        resolver.resolve(&host("suspended")).await,
        Err(ResolveError::TenantInactive { .. })
    ));
    assert!(matches!(
        resolver.resolve(&host("ghost")).await,
        Err(ResolveError::UnknownTenant { .. })
    ));

    let connector = TestConnector::new();
    let service = TenantService::new(resolver, ConnectionCache::new(connector.clone()));
    let facade = service.resolve_and_acquire(&host("stmarys")).await.unwrap();
    assert_eq!(facade.users().count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_json_file_registry() {
    let path = std::env::temp_dir().join(format!("campus-tenants-{}.json", std::process::id()));
    let records = vec![
        record("stmarys", TenantStatus::Active),
        record("oakwood", TenantStatus::Suspended),
    ];
    tokio::fs::write(&path, serde_json::to_string(&records).unwrap())
        .await
        .unwrap();

    let registry = InMemoryRegistry::from_json_file(&path).await.unwrap();
    tokio::fs::remove_file(&path).await.unwrap();

    let service = test_service(Arc::new(registry), TestConnector::new(), CacheSettings::default());
    service.resolve_and_acquire(&host("stmarys")).await.unwrap();
    assert!(matches!(
        service.resolve_and_acquire(&host("oakwood")).await,
        Err(TenantError::TenantInactive { .. })
    ));
}
