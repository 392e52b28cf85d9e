//! Pool engine: bounded admission control around a [`Factory`].
//!
//! `Pool<F>` keeps an idle set of resources and hands them out through a
//! fair semaphore, so waiting borrowers are served in FIFO order. Reused
//! resources are validated first; invalid or expired ones are destroyed and
//! replaced without the borrower noticing.

pub mod config;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::events::{DestroyReason, PoolEvent, SharedSink};
use crate::factory::Factory;
use crate::guard::Pooled;
use crate::resource::Resource;

pub use config::PoolConfig;

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// A pool entry wrapping a resource.
pub(crate) struct Entry<R> {
    pub(crate) resource: R,
    created_at: Instant,
    last_used: Instant,
}

impl<R> Entry<R> {
    fn new(resource: R) -> Self {
        let now = Instant::now();
        Self {
            resource,
            created_at: now,
            last_used: now,
        }
    }

    /// Mark the entry as just returned, preserving `created_at`.
    fn returned(mut self) -> Self {
        self.last_used = Instant::now();
        self
    }

    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn expiry(&self, config: &PoolConfig) -> Option<DestroyReason> {
        if self.created_at.elapsed() > config.max_lifetime {
            Some(DestroyReason::Expired)
        } else if self.last_used.elapsed() > config.idle_timeout {
            Some(DestroyReason::IdleTimeout)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Total successful acquisitions.
    pub total_acquisitions: u64,
    /// Total releases back to the pool.
    pub total_releases: u64,
    /// Borrow slots currently held (including acquires still creating).
    pub active: usize,
    /// Resources currently idle.
    pub idle: usize,
    /// Callers currently waiting for a free slot.
    pub waiting: usize,
    /// Total resources ever created.
    pub created: u64,
    /// Total resources ever destroyed.
    pub destroyed: u64,
}

/// What a [`Pool::maintain`] pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Maintenance {
    /// Idle resources destroyed for exceeding `idle_timeout` or `max_lifetime`.
    pub evicted: usize,
    /// Resources created to reach `min_size`.
    pub created: usize,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Inner shared state for the pool.
pub(crate) struct PoolInner<F: Factory> {
    factory: F,
    config: PoolConfig,
    events: SharedSink,
    idle: Mutex<VecDeque<Entry<F::Resource>>>,
    stats: Mutex<PoolStats>,
    /// One permit per borrow slot; tokio's semaphore is fair, which gives
    /// waiters FIFO order.
    semaphore: Arc<Semaphore>,
    draining: AtomicBool,
    /// Signalled every time a slot is freed.
    released: Notify,
    maintenance: CancellationToken,
}

impl<F: Factory> PoolInner<F> {
    async fn discard(&self, resource: F::Resource, reason: DestroyReason) {
        self.factory.destroy(Some(resource), reason).await;
        self.stats.lock().destroyed += 1;
    }

    /// Return a borrowed entry, then free its slot.
    pub(crate) async fn give_back(&self, entry: Entry<F::Resource>, slot: Slot<F>, held: Duration) {
        self.events.emit(PoolEvent::Released {
            resource_id: entry.resource.id().to_string(),
            usage_duration: held,
        });
        self.stats.lock().total_releases += 1;

        if !entry.resource.is_open() {
            self.discard(entry.resource, DestroyReason::Closed).await;
        } else if let Some(entry) = self.park(entry.returned()) {
            self.discard(entry.resource, DestroyReason::Draining).await;
        }

        drop(slot);
    }

    /// Push an entry onto the idle set, or hand it back if the pool is
    /// draining. The flag is read under the idle lock, which `drain` also
    /// holds while setting it.
    fn park(&self, entry: Entry<F::Resource>) -> Option<Entry<F::Resource>> {
        let mut idle = self.idle.lock();
        if self.draining.load(Ordering::Acquire) {
            return Some(entry);
        }
        idle.push_back(entry);
        None
    }

    /// Account for a resource dropped without going through the factory.
    pub(crate) fn abandon(&self) {
        self.stats.lock().destroyed += 1;
    }
}

impl<F: Factory> Drop for PoolInner<F> {
    fn drop(&mut self) {
        self.maintenance.cancel();
    }
}

/// A held borrow slot. Freeing it lets the next waiter in.
pub(crate) struct Slot<F: Factory> {
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner<F>>,
}

impl<F: Factory> Slot<F> {
    fn new(permit: OwnedSemaphorePermit, pool: Arc<PoolInner<F>>) -> Self {
        pool.stats.lock().active += 1;
        Self {
            permit: Some(permit),
            pool,
        }
    }

    pub(crate) fn pool(&self) -> Arc<PoolInner<F>> {
        Arc::clone(&self.pool)
    }
}

impl<F: Factory> Drop for Slot<F> {
    fn drop(&mut self) {
        {
            let mut stats = self.pool.stats.lock();
            stats.active = stats.active.saturating_sub(1);
        }
        drop(self.permit.take());
        self.pool.released.notify_waiters();
    }
}

/// Counts a caller as waiting for as long as it is alive.
struct Waiting<'a> {
    stats: &'a Mutex<PoolStats>,
}

impl<'a> Waiting<'a> {
    fn new(stats: &'a Mutex<PoolStats>) -> Self {
        stats.lock().waiting += 1;
        Self { stats }
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        let mut stats = self.stats.lock();
        stats.waiting = stats.waiting.saturating_sub(1);
    }
}

// ---------------------------------------------------------------------------
// Pool<F>
// ---------------------------------------------------------------------------

/// Generic resource pool.
///
/// Manages a bounded set of `F::Resource` handles, creating, validating and
/// destroying them through the [`Factory`]. Cloning is cheap and yields a
/// handle to the same pool.
pub struct Pool<F: Factory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: Factory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: Factory> std::fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("draining", &self.is_draining())
            .field("stats", &self.stats())
            .finish()
    }
}

impl<F: Factory> Pool<F> {
    /// Create a new pool around `factory`.
    ///
    /// No resources are created until the first [`acquire`](Self::acquire)
    /// or [`maintain`](Self::maintain).
    ///
    /// # Errors
    /// Returns error if `config` is invalid (e.g. `max_size == 0`).
    pub fn new(factory: F, config: PoolConfig, events: SharedSink) -> Result<Self> {
        config.validate()?;
        let max = config.max_size;
        Ok(Self {
            inner: Arc::new(PoolInner {
                factory,
                config,
                events,
                idle: Mutex::new(VecDeque::with_capacity(max)),
                stats: Mutex::new(PoolStats::default()),
                semaphore: Arc::new(Semaphore::new(max)),
                draining: AtomicBool::new(false),
                released: Notify::new(),
                maintenance: CancellationToken::new(),
            }),
        })
    }

    /// The configuration this pool was built with.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// The factory driving this pool.
    #[must_use]
    pub fn factory(&self) -> &F {
        &self.inner.factory
    }

    /// Whether [`drain`](Self::drain) has been called.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::Acquire)
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let idle = self.inner.idle.lock().len();
        let mut stats = self.inner.stats.lock().clone();
        stats.idle = idle;
        stats
    }

    /// Borrow a resource.
    ///
    /// Reuses a validated idle resource when one exists, creates one when
    /// below `max_size`, and otherwise waits in line until a borrower
    /// releases, up to `acquire_timeout`.
    pub async fn acquire(&self) -> Result<Pooled<F>> {
        let inner = &self.inner;
        if self.is_draining() {
            return Err(Error::Draining);
        }

        let waited = {
            let _waiting = Waiting::new(&inner.stats);
            tokio::time::timeout(
                inner.config.acquire_timeout,
                Arc::clone(&inner.semaphore).acquire_owned(),
            )
            .await
        };

        let permit = match waited {
            Ok(Ok(permit)) => permit,
            // The semaphore is only closed by `drain`.
            Ok(Err(_closed)) => return Err(Error::Draining),
            Err(_elapsed) => {
                let stats = self.stats();
                let timeout_ms =
                    u64::try_from(inner.config.acquire_timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(
                    active = stats.active,
                    waiting = stats.waiting,
                    timeout_ms,
                    "acquire timed out"
                );
                inner.events.emit(PoolEvent::PoolExhausted {
                    waiters: stats.waiting,
                    timeout_ms,
                });
                return Err(Error::PoolExhausted {
                    active: stats.active,
                    max_size: inner.config.max_size,
                    waiters: stats.waiting,
                    timeout_ms,
                });
            }
        };

        // On error the slot drops here and the next waiter gets its turn.
        let slot = Slot::new(permit, Arc::clone(inner));
        let entry = self.checkout().await?;

        inner.stats.lock().total_acquisitions += 1;
        tracing::trace!(resource_id = entry.resource.id(), "resource acquired");
        inner.events.emit(PoolEvent::Acquired {
            resource_id: entry.resource.id().to_string(),
        });
        Ok(Pooled::new(entry, slot))
    }

    /// Find a usable idle entry, or create a fresh one.
    async fn checkout(&self) -> Result<Entry<F::Resource>> {
        let inner = &self.inner;
        loop {
            let next = inner.idle.lock().pop_front();
            let Some(entry) = next else {
                return match inner.factory.create().await {
                    Some(resource) => {
                        inner.stats.lock().created += 1;
                        Ok(Entry::new(resource))
                    }
                    None => Err(Error::creation("resource source produced no resource")),
                };
            };

            if let Some(reason) = entry.expiry(&inner.config) {
                inner.discard(entry.resource, reason).await;
                continue;
            }

            if inner.factory.validate(Some(&entry.resource)).await {
                return Ok(entry);
            }
            inner.discard(entry.resource, DestroyReason::Invalid).await;
        }
    }

    /// Return a borrowed resource.
    ///
    /// The resource goes back to the idle set, unless the pool is draining
    /// or the resource was closed while borrowed, in which case it is
    /// destroyed.
    pub async fn release(&self, guard: Pooled<F>) {
        guard.release().await;
    }

    /// Stop handing out resources and wait for every borrow to come back.
    ///
    /// Callers waiting in [`acquire`](Self::acquire) fail with
    /// [`Error::Draining`]. Resources returned from now on are destroyed.
    pub async fn drain(&self) {
        let inner = &self.inner;
        {
            let _idle = inner.idle.lock();
            inner.draining.store(true, Ordering::Release);
        }
        inner.maintenance.cancel();
        inner.semaphore.close();

        loop {
            let mut notified = std::pin::pin!(inner.released.notified());
            notified.as_mut().enable();
            let active = inner.stats.lock().active;
            if active == 0 {
                break;
            }
            tracing::debug!(active, "draining: waiting for borrowed resources");
            notified.await;
        }
    }

    /// Destroy every idle resource. Returns how many were destroyed.
    pub async fn clear(&self) -> usize {
        let entries: Vec<_> = self.inner.idle.lock().drain(..).collect();
        let count = entries.len();
        for entry in entries {
            self.inner
                .discard(entry.resource, DestroyReason::Shutdown)
                .await;
        }
        count
    }

    /// [`drain`](Self::drain) followed by [`clear`](Self::clear).
    pub async fn close(&self) -> usize {
        self.drain().await;
        self.clear().await
    }

    /// Evict expired idle resources, then top the pool up to `min_size`.
    pub async fn maintain(&self) -> Maintenance {
        let inner = &self.inner;

        let expired: Vec<_> = {
            let mut idle = inner.idle.lock();
            let mut kept = VecDeque::with_capacity(idle.len());
            let mut expired = Vec::new();
            while let Some(entry) = idle.pop_front() {
                match entry.expiry(&inner.config) {
                    Some(reason) => expired.push((entry.resource, reason)),
                    None => kept.push_back(entry),
                }
            }
            *idle = kept;
            expired
        };

        let mut report = Maintenance {
            evicted: expired.len(),
            created: 0,
        };
        for (resource, reason) in expired {
            inner.discard(resource, reason).await;
        }

        while !self.is_draining() {
            let idle = inner.idle.lock().len();
            let active = inner.stats.lock().active;
            if idle + active >= inner.config.min_size {
                break;
            }
            // Creating under a borrow slot keeps idle + borrowed within
            // max_size and makes drain wait for the create to finish.
            let Ok(permit) = Arc::clone(&inner.semaphore).try_acquire_owned() else {
                break;
            };
            let slot = Slot::new(permit, Arc::clone(inner));
            let Some(resource) = inner.factory.create().await else {
                break;
            };
            inner.stats.lock().created += 1;
            report.created += 1;

            let refused = inner.park(Entry::new(resource));
            drop(slot);
            if let Some(entry) = refused {
                inner.discard(entry.resource, DestroyReason::Draining).await;
                break;
            }
        }

        report
    }

    /// Run [`maintain`](Self::maintain) every `idle_check_interval` until the
    /// pool drains or is dropped. Returns `None` when no interval is set.
    pub fn spawn_maintenance(&self) -> Option<JoinHandle<()>> {
        let period = self.inner.config.idle_check_interval?;
        let token = self.inner.maintenance.clone();
        let weak = Arc::downgrade(&self.inner);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        let report = Pool { inner }.maintain().await;
                        if report != Maintenance::default() {
                            tracing::debug!(
                                evicted = report.evicted,
                                created = report.created,
                                "pool maintenance"
                            );
                        }
                    }
                }
            }
        }))
    }
}
