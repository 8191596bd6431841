//! End-to-end request scenarios.
//!
//! Tests verify:
//! - One connect attempt per school regardless of concurrent demand
//! - Timeouts reach every waiting request and recover after backoff
//! - Invalidation, registry polling and shutdown
//! - Each facade only ever sees its own school's data

use std::sync::Arc;
use std::time::Duration;

use campus_tenancy::repository::entity::user;
use campus_tenancy::{
    CacheSettings, ConnectionTarget, SlotState, StatusWatcher, TenantError, TenantRecord,
    TenantStatus,
};
use sea_orm::ColumnTrait;

use super::test_utils::{
    host, new_student, record, test_registry, test_service, TestConnector,
};

// =============================================================================
// Singleflight
// =============================================================================

#[tokio::test]
async fn test_second_request_reuses_connection() {
    let connector = TestConnector::new();
    let service = test_service(test_registry(), connector.clone(), CacheSettings::default());

    let first = service.resolve_and_acquire(&host("stmarys")).await.unwrap();
    let second = service.resolve_and_acquire(&host("stmarys")).await.unwrap();

    assert!(first.same_binding(&second));
    assert_eq!(connector.attempts("school_stmarys"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fifty_concurrent_requests_one_connect() {
    let connector =
        TestConnector::new().with_delay("school_slowschool", Duration::from_millis(200));
    let service = Arc::new(test_service(
        test_registry(),
        connector.clone(),
        CacheSettings::default(),
    ));

    let mut handles = Vec::new();
    for _ in 0..50 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service.resolve_and_acquire(&host("slowschool")).await
        }));
    }

    let mut facades = Vec::new();
    for handle in handles {
        facades.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(facades.len(), 50);
    assert!(facades.iter().all(|f| f.same_binding(&facades[0])));
    assert_eq!(connector.attempts("school_slowschool"), 1);
    assert_eq!(connector.overlaps(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_across_schools() {
    let connector = TestConnector::new()
        .with_delay("school_stmarys", Duration::from_millis(50))
        .with_delay("school_oakwood", Duration::from_millis(50));
    let service = Arc::new(test_service(
        test_registry(),
        connector.clone(),
        CacheSettings::default(),
    ));

    let mut handles = Vec::new();
    for i in 0..40 {
        let service = Arc::clone(&service);
        let slug = if i % 2 == 0 { "stmarys" } else { "oakwood" };
        handles.push(tokio::spawn(async move {
            service.resolve_and_acquire(&host(slug)).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(connector.attempts("school_stmarys"), 1);
    assert_eq!(connector.attempts("school_oakwood"), 1);
    assert_eq!(connector.overlaps(), 0);
    assert_eq!(service.stats().await.ready, 2);
}

// =============================================================================
// Failures and Backoff
// =============================================================================

#[tokio::test]
async fn test_timeout_reaches_waiters_then_recovers() {
    let connector =
        TestConnector::new().with_delay("school_badschool", Duration::from_millis(500));
    let settings = CacheSettings::default()
        .with_connect_timeout(Duration::from_millis(50))
        .with_failure_backoff(Duration::from_millis(100));
    let service = Arc::new(test_service(test_registry(), connector.clone(), settings));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service.resolve_and_acquire(&host("badschool")).await
        }));
    }
    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, TenantError::Timeout { ref slug } if slug == "badschool"));
        assert!(err.is_retryable());
    }
    assert_eq!(connector.attempts("school_badschool"), 1);

    // Still inside the backoff window
    assert!(matches!(
        service.resolve_and_acquire(&host("badschool")).await,
        Err(TenantError::Timeout { .. })
    ));
    assert_eq!(connector.attempts("school_badschool"), 1);

    connector.set_delay("school_badschool", Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(150)).await;

    let facade = service.resolve_and_acquire(&host("badschool")).await.unwrap();
    assert_eq!(facade.slug(), "badschool");
    assert_eq!(connector.attempts("school_badschool"), 2);
}

#[tokio::test]
async fn test_unreachable_school_does_not_affect_others() {
    let connector = TestConnector::new();
    connector.set_unreachable("school_badschool", true);
    let service = test_service(test_registry(), connector.clone(), CacheSettings::default());

    let err = service
        .resolve_and_acquire(&host("badschool"))
        .await
        .unwrap_err();
    assert!(matches!(err, TenantError::ConnectionFailed { .. }));
    assert_eq!(
        service.cache().state("badschool").await,
        SlotState::Failed
    );

    service.resolve_and_acquire(&host("stmarys")).await.unwrap();
    assert_eq!(service.cache().state("stmarys").await, SlotState::Ready);
}

// =============================================================================
// Isolation
// =============================================================================

#[tokio::test]
async fn test_facades_reach_only_their_school() {
    let service = test_service(test_registry(), TestConnector::new(), CacheSettings::default());

    let stmarys = service.resolve_and_acquire(&host("stmarys")).await.unwrap();
    let oakwood = service.resolve_and_acquire(&host("oakwood")).await.unwrap();

    stmarys
        .students()
        .insert(new_student("SM-001", "Mary"))
        .await
        .unwrap();

    assert_eq!(stmarys.students().count().await.unwrap(), 1);
    assert_eq!(oakwood.students().count().await.unwrap(), 0);

    let admins = oakwood
        .users()
        .find_where(user::Column::Role.eq("admin"))
        .await
        .unwrap();
    assert_eq!(admins.len(), 1);
    assert_eq!(admins[0].email, "admin@school_oakwood");
}

// =============================================================================
// Invalidation and Shutdown
// =============================================================================

#[tokio::test]
async fn test_invalidate_triggers_fresh_connect() {
    let connector = TestConnector::new();
    let service = test_service(test_registry(), connector.clone(), CacheSettings::default());

    let old = service.resolve_and_acquire(&host("stmarys")).await.unwrap();
    assert!(service.invalidate("stmarys").await);

    let new = service.resolve_and_acquire(&host("stmarys")).await.unwrap();
    assert!(!new.same_binding(&old));
    assert!(old.ping().await.is_err());
    assert_eq!(connector.attempts("school_stmarys"), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_invalidate_during_connect_never_overlaps() {
    let connector =
        TestConnector::new().with_delay("school_slowschool", Duration::from_millis(300));
    let service = Arc::new(test_service(
        test_registry(),
        connector.clone(),
        CacheSettings::default(),
    ));

    let first = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.resolve_and_acquire(&host("slowschool")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(service.invalidate("slowschool").await);

    let second = service.resolve_and_acquire(&host("slowschool")).await.unwrap();

    assert!(matches!(
        first.await.unwrap(),
        Err(TenantError::ConnectionFailed { .. })
    ));
    assert_eq!(second.slug(), "slowschool");
    assert_eq!(connector.attempts("school_slowschool"), 2);
    assert_eq!(connector.overlaps(), 0);
}

#[tokio::test]
async fn test_moved_school_reconnects_without_polling() {
    let registry = test_registry();
    let connector = TestConnector::new();
    let service = test_service(Arc::clone(&registry), connector.clone(), CacheSettings::default());
    let mut watcher = StatusWatcher::new(Arc::clone(&registry), service.cache().clone());
    watcher.poll_once().await.unwrap();

    // Added after the baseline, so no poll has seen its first target
    registry.insert(record("fresh", TenantStatus::Active)).await;
    let before = service.resolve_and_acquire(&host("fresh")).await.unwrap();

    registry
        .insert(TenantRecord::new(
            "fresh",
            TenantStatus::Active,
            ConnectionTarget::sqlite("school_fresh_v2"),
        ))
        .await;
    let after = service.resolve_and_acquire(&host("fresh")).await.unwrap();

    assert!(!after.same_binding(&before));
    assert!(before.ping().await.is_err());
    let admins = after
        .users()
        .find_where(user::Column::Role.eq("admin"))
        .await
        .unwrap();
    assert_eq!(admins[0].email, "admin@school_fresh_v2");
    assert_eq!(connector.attempts("school_fresh"), 1);
    assert_eq!(connector.attempts("school_fresh_v2"), 1);
}

#[tokio::test]
async fn test_watcher_applies_suspension() {
    let registry = test_registry();
    let connector = TestConnector::new();
    let service = test_service(Arc::clone(&registry), connector, CacheSettings::default());
    let mut watcher = StatusWatcher::new(Arc::clone(&registry), service.cache().clone());
    watcher.poll_once().await.unwrap();

    let facade = service.resolve_and_acquire(&host("stmarys")).await.unwrap();
    registry.set_status("stmarys", TenantStatus::Suspended).await;

    assert_eq!(watcher.poll_once().await.unwrap(), vec!["stmarys".to_string()]);
    assert!(facade.ping().await.is_err());
    assert!(matches!(
        service.resolve_and_acquire(&host("stmarys")).await,
        Err(TenantError::TenantInactive {
            status: TenantStatus::Suspended,
            ..
        })
    ));

    registry.set_status("stmarys", TenantStatus::Active).await;
    watcher.poll_once().await.unwrap();
    service.resolve_and_acquire(&host("stmarys")).await.unwrap();
}

#[tokio::test]
async fn test_spawned_watcher_stops_after_close() {
    let registry = test_registry();
    let service = test_service(Arc::clone(&registry), TestConnector::new(), CacheSettings::default());
    let handle = service
        .spawn_watcher(Duration::from_millis(20))
        .unwrap();
    assert!(service.spawn_watcher(Duration::ZERO).is_none());

    service.resolve_and_acquire(&host("oakwood")).await.unwrap();
    // Let the first tick record its baseline
    tokio::time::sleep(Duration::from_millis(30)).await;
    registry.set_status("oakwood", TenantStatus::Suspended).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(service.cache().state("oakwood").await, SlotState::Absent);

    service.close_all().await;
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_close_all_closes_everything() {
    let connector =
        TestConnector::new().with_delay("school_slowschool", Duration::from_millis(100));
    let service = Arc::new(test_service(
        test_registry(),
        connector,
        CacheSettings::default(),
    ));

    let stmarys = service.resolve_and_acquire(&host("stmarys")).await.unwrap();
    let pending = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.resolve_and_acquire(&host("slowschool")).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    service.close_all().await;

    assert!(stmarys.ping().await.is_err());
    match pending.await.unwrap() {
        Err(TenantError::ConnectionFailed { reason, .. }) => assert!(reason.contains("closed")),
        other => panic!("expected shutdown failure, got {other:?}"),
    }
    assert!(matches!(
        service.resolve_and_acquire(&host("oakwood")).await,
        Err(TenantError::ConnectionFailed { .. })
    ));

    let stats = service.stats().await;
    assert_eq!((stats.ready, stats.establishing), (0, 0));
}
