//! Per-tenant connection cache.
//!
//! The cache maps tenant slugs to live, schema-bound connections and provides:
//! - A lock-free-for-readers fast path for slugs that are already connected
//! - Singleflight establishment: one connect attempt per slug at a time,
//!   with every concurrent caller sharing its outcome
//! - Transient failures with a short backoff window instead of sticky errors
//! - Explicit invalidation, idle eviction, a capacity bound and shutdown
//!
//! # Slot states
//!
//! ```text
//!            acquire                 connect ok
//!  Absent ─────────────▶ Establishing ──────────▶ Ready
//!    ▲                        │                     │
//!    │   backoff elapsed      │ connect failed      │ invalidate / idle /
//!    └──────────── Failed ◀───┘                     │ capacity / close_all
//!    ▲                                              │
//!    └──────────────────────────────────────────────┘
//! ```
//!
//! Lock order is `in_flight` → `ready` → `failures`; every path that holds
//! more than one of them acquires them in that order.
//!
//! An invalidated attempt stays in `in_flight`, marked revoked, until its
//! physical connect returns. New callers wait for it to drain before starting
//! another, so a slug never has two connects open at once.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use lru::LruCache;
use serde::Serialize;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::error::ConnectionError;
use crate::repository::RepositoryFacade;
use crate::tenant::{ConnectionTarget, TenantDescriptor};

use super::connector::Connector;

// =============================================================================
// Configuration
// =============================================================================

/// Default deadline for one physical connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default deadline for a caller waiting on an attempt.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default window during which a failed slug is not retried.
pub const DEFAULT_FAILURE_BACKOFF: Duration = Duration::from_secs(2);

/// Default maximum number of Ready tenants.
pub const DEFAULT_MAX_TENANTS: usize = 256;

/// Number of recent failures remembered for backoff.
const FAILURE_MEMORY: usize = 1024;

/// Tunables for [`ConnectionCache`].
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Deadline for one physical connect attempt
    pub connect_timeout: Duration,

    /// Deadline for a caller waiting on an attempt (its own or another caller's)
    pub acquire_timeout: Duration,

    /// How long a failure is returned to new callers before a retry is allowed
    pub failure_backoff: Duration,

    /// Close Ready connections unused for this long (None = never)
    pub idle_timeout: Option<Duration>,

    /// Maximum number of Ready tenants; least recently used are evicted beyond it
    pub max_tenants: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            failure_backoff: DEFAULT_FAILURE_BACKOFF,
            idle_timeout: None,
            max_tenants: DEFAULT_MAX_TENANTS,
        }
    }
}

impl CacheSettings {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_failure_backoff(mut self, backoff: Duration) -> Self {
        self.failure_backoff = backoff;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_tenants(mut self, max_tenants: usize) -> Self {
        self.max_tenants = max_tenants.max(1);
        self
    }
}

// =============================================================================
// Public State Views
// =============================================================================

/// Observable state of one slug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Absent,
    Establishing,
    Ready,
    /// Last attempt failed and the backoff window is still open
    Failed,
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub ready: usize,
    pub establishing: usize,
    pub backing_off: usize,
    pub connect_attempts: u64,
}

// =============================================================================
// Internal State
// =============================================================================

struct CachedConnection {
    facade: RepositoryFacade,
    /// Target the connection was opened against
    target: ConnectionTarget,
    created_at: Instant,
    /// Milliseconds since the cache epoch
    last_used_ms: AtomicU64,
}

impl CachedConnection {
    fn new(facade: RepositoryFacade, target: ConnectionTarget, epoch: Instant) -> Self {
        let entry = Self {
            facade,
            target,
            created_at: Instant::now(),
            last_used_ms: AtomicU64::new(0),
        };
        entry.touch(epoch);
        entry
    }

    fn touch(&self, epoch: Instant) {
        let now = Instant::now().saturating_duration_since(epoch);
        self.last_used_ms
            .store(now.as_millis() as u64, Ordering::Relaxed);
    }

    fn last_used(&self, epoch: Instant) -> Instant {
        epoch + Duration::from_millis(self.last_used_ms.load(Ordering::Relaxed))
    }
}

/// A connect attempt shared by every caller for its slug.
struct InFlight {
    target: ConnectionTarget,
    notify: Notify,
    outcome: Mutex<Option<Result<RepositoryFacade, ConnectionError>>>,
    /// Set once the attempt may no longer populate the cache; its waiters
    /// receive this error instead of the connection.
    revoked: OnceLock<ConnectionError>,
}

impl InFlight {
    fn new(target: ConnectionTarget) -> Self {
        Self {
            target,
            notify: Notify::new(),
            outcome: Mutex::new(None),
            revoked: OnceLock::new(),
        }
    }

    /// Returns false if the attempt was already revoked.
    fn revoke(&self, reason: ConnectionError) -> bool {
        self.revoked.set(reason).is_ok()
    }

    fn is_revoked(&self) -> bool {
        self.revoked.get().is_some()
    }

    async fn outcome(&self) -> Result<RepositoryFacade, ConnectionError> {
        loop {
            // Register before checking so a publish in between is not missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(outcome) = self.outcome.lock().await.as_ref() {
                return outcome.clone();
            }

            notified.await;
        }
    }

    async fn publish(&self, outcome: Result<RepositoryFacade, ConnectionError>) {
        *self.outcome.lock().await = Some(outcome);
        self.notify.notify_waiters();
    }
}

struct FailedAttempt {
    at: Instant,
    target: ConnectionTarget,
    error: ConnectionError,
}

/// What the slow path does next for a slug.
enum Step {
    Join(Arc<InFlight>),
    /// Wait for a revoked attempt to finish, then look again
    Drain(Arc<InFlight>),
    Fail(ConnectionError),
}

struct Shared<C> {
    connector: C,
    settings: CacheSettings,
    epoch: Instant,
    ready: RwLock<HashMap<String, Arc<CachedConnection>>>,
    in_flight: Mutex<HashMap<String, Arc<InFlight>>>,
    failures: Mutex<LruCache<String, FailedAttempt>>,
    closed: AtomicBool,
    connect_attempts: AtomicU64,
}

// =============================================================================
// ConnectionCache
// =============================================================================

/// Concurrency-safe map from tenant slug to a live [`RepositoryFacade`].
///
/// Cloning is cheap; clones share the same cache.
pub struct ConnectionCache<C: Connector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Clone for ConnectionCache<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connector> ConnectionCache<C> {
    /// Create a cache with default settings.
    pub fn new(connector: C) -> Self {
        Self::with_settings(connector, CacheSettings::default())
    }

    pub fn with_settings(connector: C, settings: CacheSettings) -> Self {
        let failure_memory = NonZeroUsize::new(FAILURE_MEMORY).unwrap_or(NonZeroUsize::MIN);

        Self {
            shared: Arc::new(Shared {
                connector,
                settings,
                epoch: Instant::now(),
                ready: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                failures: Mutex::new(LruCache::new(failure_memory)),
                closed: AtomicBool::new(false),
                connect_attempts: AtomicU64::new(0),
            }),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.shared.settings
    }

    pub fn connector(&self) -> &C {
        &self.shared.connector
    }

    /// Whether [`close_all`](Self::close_all) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Get the facade for a tenant, connecting if necessary.
    ///
    /// 1. Ready slugs bound to the descriptor's target are served under a
    ///    read lock.
    /// 2. Otherwise the caller joins the in-flight attempt for the slug, or
    ///    starts one if there is none and the slug is not backing off.
    /// 3. The attempt runs detached: a caller that times out stops waiting but
    ///    the attempt still completes and populates the cache.
    ///
    /// A cached connection or attempt for a different target than the
    /// descriptor's is stale; it is closed and replaced.
    pub async fn acquire(
        &self,
        descriptor: &TenantDescriptor,
    ) -> Result<RepositoryFacade, ConnectionError> {
        let slug = descriptor.slug();

        // Fast path
        if let Some(facade) = self
            .shared
            .ready_facade(slug, descriptor.connection_target())
            .await
        {
            trace!(slug = %slug, "Tenant connection cache hit");
            return Ok(facade);
        }

        let deadline = self.shared.settings.acquire_timeout;
        match tokio::time::timeout(deadline, self.join_or_start(descriptor)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!(slug = %slug, "Gave up waiting for tenant connection");
                Err(ConnectionError::Timeout(deadline))
            }
        }
    }

    /// Slow path: join the in-flight attempt or become its leader.
    async fn join_or_start(
        &self,
        descriptor: &TenantDescriptor,
    ) -> Result<RepositoryFacade, ConnectionError> {
        let slug = descriptor.slug();
        let target = descriptor.connection_target();

        loop {
            let (step, stale) = {
                let mut in_flight = self.shared.in_flight.lock().await;

                if self.is_closed() {
                    return Err(ConnectionError::Closed);
                }

                // Recheck: an attempt may have completed since the fast path
                let stale = {
                    let mut ready = self.shared.ready.write().await;
                    if let Some(entry) = ready.get(slug).filter(|e| e.target == *target) {
                        entry.touch(self.shared.epoch);
                        return Ok(entry.facade.clone());
                    }
                    ready.remove(slug)
                };

                let step = match in_flight.get(slug).cloned() {
                    Some(attempt) if !attempt.is_revoked() && attempt.target == *target => {
                        Step::Join(attempt)
                    }
                    Some(attempt) => {
                        if attempt.revoke(ConnectionError::Invalidated) {
                            info!(slug = %slug, "Connection target changed; abandoning in-flight attempt");
                        }
                        Step::Drain(attempt)
                    }
                    None => match self.shared.backoff_error(slug, target).await {
                        Some(error) => Step::Fail(error),
                        None => {
                            let attempt = Arc::new(InFlight::new(target.clone()));
                            in_flight.insert(slug.to_string(), Arc::clone(&attempt));
                            self.spawn_attempt(descriptor.clone(), Arc::clone(&attempt));
                            Step::Join(attempt)
                        }
                    },
                };
                (step, stale)
            };

            if let Some(entry) = stale {
                info!(slug = %slug, "Connection target changed; closing cached tenant connection");
                close_facade(&entry.facade).await;
            }

            match step {
                Step::Join(attempt) => return attempt.outcome().await,
                Step::Drain(attempt) => {
                    // Its outcome belongs to the callers that joined it
                    let _ = attempt.outcome().await;
                }
                Step::Fail(error) => {
                    debug!(slug = %slug, error = %error, "Tenant is backing off after a failed connect");
                    return Err(error);
                }
            }
        }
    }

    fn spawn_attempt(&self, descriptor: TenantDescriptor, attempt: Arc<InFlight>) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            // Inner task so a panicking driver still completes the attempt
            let connect = {
                let shared = Arc::clone(&shared);
                let descriptor = descriptor.clone();
                tokio::spawn(async move { shared.establish(&descriptor).await })
            };
            let outcome = match connect.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(slug = %descriptor.slug(), error = %e, "Tenant connect attempt aborted");
                    Err(ConnectionError::Network("connect attempt aborted".to_string()))
                }
            };
            shared.complete(descriptor.slug(), &attempt, outcome).await;
        });
    }

    /// Drop any Ready entry for a slug and close its connection, and revoke
    /// any in-flight attempt.
    ///
    /// Callers waiting on a revoked attempt receive
    /// [`ConnectionError::Invalidated`]; the attempt closes its connection
    /// when it returns. Returns whether anything was removed or revoked.
    pub async fn invalidate(&self, slug: &str) -> bool {
        let (was_establishing, removed) = {
            let in_flight = self.shared.in_flight.lock().await;
            let was_establishing = in_flight
                .get(slug)
                .is_some_and(|attempt| attempt.revoke(ConnectionError::Invalidated));
            let removed = self.shared.ready.write().await.remove(slug);
            self.shared.failures.lock().await.pop(slug);
            (was_establishing, removed)
        };

        if let Some(entry) = removed {
            close_facade(&entry.facade).await;
            info!(slug = %slug, "Invalidated tenant connection");
            true
        } else if was_establishing {
            info!(slug = %slug, "Invalidated in-flight tenant connection attempt");
            true
        } else {
            false
        }
    }

    /// Close every cached connection and refuse further acquires.
    ///
    /// In-flight attempts are revoked with [`ConnectionError::Closed`] and
    /// awaited; they close their own connections before reporting, so nothing
    /// is left open when this returns.
    pub async fn close_all(&self) {
        self.shared.closed.store(true, Ordering::Release);

        let (pending, entries) = {
            let mut in_flight = self.shared.in_flight.lock().await;
            let pending: Vec<_> = in_flight
                .drain()
                .map(|(_, attempt)| {
                    attempt.revoke(ConnectionError::Closed);
                    attempt
                })
                .collect();
            let entries: Vec<_> = self
                .shared
                .ready
                .write()
                .await
                .drain()
                .map(|(_, entry)| entry)
                .collect();
            self.shared.failures.lock().await.clear();
            (pending, entries)
        };

        for entry in &entries {
            close_facade(&entry.facade).await;
        }

        let grace = self.shared.settings.connect_timeout + Duration::from_secs(1);
        for attempt in pending {
            if tokio::time::timeout(grace, attempt.outcome()).await.is_err() {
                warn!("In-flight tenant connection attempt did not finish during shutdown");
            }
        }

        info!(closed = entries.len(), "Closed all tenant connections");
    }

    /// Close Ready connections idle longer than the configured idle timeout.
    ///
    /// Returns the number of connections closed.
    pub async fn evict_idle(&self) -> usize {
        let Some(idle_timeout) = self.shared.settings.idle_timeout else {
            return 0;
        };
        let epoch = self.shared.epoch;
        let now = Instant::now();

        let evicted: Vec<(String, Arc<CachedConnection>)> = {
            let mut ready = self.shared.ready.write().await;
            let idle: Vec<String> = ready
                .iter()
                .filter(|(_, entry)| {
                    now.saturating_duration_since(entry.last_used(epoch)) >= idle_timeout
                })
                .map(|(slug, _)| slug.clone())
                .collect();
            idle.into_iter()
                .filter_map(|slug| ready.remove(&slug).map(|entry| (slug, entry)))
                .collect()
        };

        for (slug, entry) in &evicted {
            debug!(
                slug = %slug,
                age_secs = entry.created_at.elapsed().as_secs(),
                "Evicting idle tenant connection"
            );
            close_facade(&entry.facade).await;
        }

        evicted.len()
    }

    /// Run [`evict_idle`](Self::evict_idle) periodically until the cache closes.
    ///
    /// Returns None when no idle timeout is configured.
    pub fn spawn_idle_sweeper(&self) -> Option<JoinHandle<()>> {
        let idle_timeout = self.shared.settings.idle_timeout?;
        let period = (idle_timeout / 2).max(Duration::from_millis(100));
        let cache = self.clone();

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if cache.is_closed() {
                    break;
                }
                let evicted = cache.evict_idle().await;
                if evicted > 0 {
                    info!(evicted, "Closed idle tenant connections");
                }
            }
        }))
    }

    /// Current state of a slug.
    pub async fn state(&self, slug: &str) -> SlotState {
        let in_flight = self.shared.in_flight.lock().await;
        if in_flight.contains_key(slug) {
            return SlotState::Establishing;
        }
        if self.shared.ready.read().await.contains_key(slug) {
            return SlotState::Ready;
        }
        match self.shared.failures.lock().await.peek(slug) {
            Some(failure) if failure.at.elapsed() < self.shared.settings.failure_backoff => {
                SlotState::Failed
            }
            _ => SlotState::Absent,
        }
    }

    /// Current counters.
    pub async fn stats(&self) -> CacheStats {
        let establishing = self.shared.in_flight.lock().await.len();
        let ready = self.shared.ready.read().await.len();
        let backoff = self.shared.settings.failure_backoff;
        let backing_off = self
            .shared
            .failures
            .lock()
            .await
            .iter()
            .filter(|(_, failure)| failure.at.elapsed() < backoff)
            .count();

        CacheStats {
            ready,
            establishing,
            backing_off,
            connect_attempts: self.shared.connect_attempts.load(Ordering::Relaxed),
        }
    }
}

impl<C: Connector> Shared<C> {
    async fn ready_facade(
        &self,
        slug: &str,
        target: &ConnectionTarget,
    ) -> Option<RepositoryFacade> {
        let ready = self.ready.read().await;
        let entry = ready.get(slug).filter(|entry| entry.target == *target)?;
        entry.touch(self.epoch);
        Some(entry.facade.clone())
    }

    /// Recorded failure for a slug if its backoff window is still open and
    /// it was recorded against the same target.
    async fn backoff_error(
        &self,
        slug: &str,
        target: &ConnectionTarget,
    ) -> Option<ConnectionError> {
        let mut failures = self.failures.lock().await;
        match failures.peek(slug) {
            Some(failure)
                if failure.target == *target
                    && failure.at.elapsed() < self.settings.failure_backoff =>
            {
                Some(failure.error.clone())
            }
            Some(_) => {
                failures.pop(slug);
                None
            }
            None => None,
        }
    }

    /// One bounded physical connect plus schema binding.
    async fn establish(
        &self,
        descriptor: &TenantDescriptor,
    ) -> Result<RepositoryFacade, ConnectionError> {
        let slug = descriptor.slug();
        let timeout = self.settings.connect_timeout;
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let connect = self.connector.connect(descriptor.connection_target());
        match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(db)) => {
                info!(
                    slug = %slug,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Tenant connection established"
                );
                Ok(RepositoryFacade::bind(slug, db))
            }
            Ok(Err(error)) => {
                warn!(slug = %slug, error = %error, "Tenant connection failed");
                Err(error)
            }
            Err(_) => {
                warn!(slug = %slug, timeout_ms = timeout.as_millis() as u64, "Tenant connection timed out");
                Err(ConnectionError::Timeout(timeout))
            }
        }
    }

    /// Record an attempt's outcome and release its waiters.
    ///
    /// A revoked attempt (invalidated or shut down meanwhile) closes its
    /// connection instead of caching it and reports the revocation reason.
    /// The attempt leaves `in_flight` before its waiters are woken.
    async fn complete(
        &self,
        slug: &str,
        attempt: &Arc<InFlight>,
        outcome: Result<RepositoryFacade, ConnectionError>,
    ) {
        let mut to_close = Vec::new();

        let outcome = {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight
                .get(slug)
                .is_some_and(|entry| Arc::ptr_eq(entry, attempt))
            {
                in_flight.remove(slug);
            }

            match (outcome, attempt.revoked.get()) {
                (Ok(facade), None) => {
                    let mut ready = self.ready.write().await;
                    to_close.extend(self.make_room(&mut ready));
                    let replaced = ready.insert(
                        slug.to_string(),
                        Arc::new(CachedConnection::new(
                            facade.clone(),
                            attempt.target.clone(),
                            self.epoch,
                        )),
                    );
                    to_close.extend(replaced.map(|entry| entry.facade.clone()));
                    Ok(facade)
                }
                (Ok(facade), Some(reason)) => {
                    debug!(slug = %slug, reason = %reason, "Discarding connection for revoked attempt");
                    to_close.push(facade);
                    Err(reason.clone())
                }
                (Err(error), None) => {
                    self.failures.lock().await.put(
                        slug.to_string(),
                        FailedAttempt {
                            at: Instant::now(),
                            target: attempt.target.clone(),
                            error: error.clone(),
                        },
                    );
                    Err(error)
                }
                (Err(_), Some(reason)) => Err(reason.clone()),
            }
        };

        for facade in &to_close {
            close_facade(facade).await;
        }

        attempt.publish(outcome).await;
    }

    /// Evict least recently used entries until one more fits.
    fn make_room(
        &self,
        ready: &mut HashMap<String, Arc<CachedConnection>>,
    ) -> Vec<RepositoryFacade> {
        let mut evicted = Vec::new();

        while ready.len() >= self.settings.max_tenants.max(1) {
            let oldest = ready
                .iter()
                .min_by_key(|(_, entry)| entry.last_used_ms.load(Ordering::Relaxed))
                .map(|(slug, _)| slug.clone());
            let Some(slug) = oldest else {
                break;
            };
            if let Some(entry) = ready.remove(&slug) {
                info!(slug = %slug, "Evicting least recently used tenant connection");
                evicted.push(entry.facade.clone());
            }
        }

        evicted
    }
}

async fn close_facade(facade: &RepositoryFacade) {
    if let Err(e) = facade.close().await {
        warn!(slug = %facade.slug(), error = %e, "Failed to close tenant connection");
    }
}

// =============================================================================
// Tests
// =============================================================================
