//! # Refresh coordinator
//!
//! Background regeneration of entries that reads found close to expiry.
//!
//! Submissions go into a bounded queue drained by a fixed number of Tokio
//! worker tasks shared by every cache of a manager. Each attempt runs:
//!
//! ```text
//! submitted -> lock attempted -> denied
//!                             -> granted -> re-checked -> still fresh
//!                                                      -> stale -> recomputed -> written
//!                                                                             -> failed
//! ```
//!
//! The distributed lock is released on every path once granted. Failures
//! are logged and end the attempt; nothing is retried.

use crate::entry_store::CacheEntryStore;
use crate::invoker::Invoker;
use crate::lock::DistributedMutex;
use crate::registry::RecomputationRegistry;
use crate::store::RemoteStore;
use crate::RecomputeError;
use dashmap::DashSet;
use futures::FutureExt;
use reheat_core::{CacheKey, CacheSettings};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, error, info, trace, warn};

/// How a single refresh attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshOutcome {
    /// A new value was computed and written.
    Refreshed,
    /// The entry was no longer inside its preload window once the lock was
    /// held; another holder refreshed it first.
    StillFresh,
    /// Another holder owns the refresh lock.
    LockDenied,
    /// No recomputation descriptor is registered for the entry.
    DescriptorMissing,
    /// The remote store failed while locking, checking or reading the
    /// descriptor.
    Skipped,
    /// The recomputation failed or panicked, or its result could not be
    /// written.
    Failed,
}

impl fmt::Display for RefreshOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RefreshOutcome::Refreshed => "refreshed",
            RefreshOutcome::StillFresh => "still fresh",
            RefreshOutcome::LockDenied => "lock denied",
            RefreshOutcome::DescriptorMissing => "descriptor missing",
            RefreshOutcome::Skipped => "skipped",
            RefreshOutcome::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Counters of a [`RefreshCoordinator`].
///
/// `submitted`, `deduplicated` and `rejected` describe the queue; the rest
/// count finished attempts by [`RefreshOutcome`], on-demand refreshes
/// included.
#[derive(Debug, Default)]
pub struct RefreshStats {
    submitted: AtomicU64,
    deduplicated: AtomicU64,
    rejected: AtomicU64,
    refreshed: AtomicU64,
    still_fresh: AtomicU64,
    lock_denied: AtomicU64,
    descriptor_missing: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl RefreshStats {
    fn record(&self, outcome: RefreshOutcome) {
        let counter = match outcome {
            RefreshOutcome::Refreshed => &self.refreshed,
            RefreshOutcome::StillFresh => &self.still_fresh,
            RefreshOutcome::LockDenied => &self.lock_denied,
            RefreshOutcome::DescriptorMissing => &self.descriptor_missing,
            RefreshOutcome::Skipped => &self.skipped,
            RefreshOutcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Submissions accepted into the queue.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Submissions ignored because the key was already queued or running.
    pub fn deduplicated(&self) -> u64 {
        self.deduplicated.load(Ordering::Relaxed)
    }

    /// Submissions dropped because the queue was full or the workers had
    /// stopped with their runtime.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Attempts that wrote a new value.
    pub fn refreshed(&self) -> u64 {
        self.refreshed.load(Ordering::Relaxed)
    }

    /// Attempts that found the entry already refreshed.
    pub fn still_fresh(&self) -> u64 {
        self.still_fresh.load(Ordering::Relaxed)
    }

    /// Attempts that lost the refresh lock to another holder.
    pub fn lock_denied(&self) -> u64 {
        self.lock_denied.load(Ordering::Relaxed)
    }

    /// Attempts that found no recomputation descriptor.
    pub fn descriptor_missing(&self) -> u64 {
        self.descriptor_missing.load(Ordering::Relaxed)
    }

    /// Attempts abandoned because the store failed.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Attempts whose recomputation or write-back failed.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshMode {
    /// Triggered by a read; skipped if the entry left its preload window.
    Preload,
    /// Requested explicitly; recomputes regardless of the remaining TTL.
    Forced,
}

struct RefreshJob {
    cache: CacheEntryStore,
    key: CacheKey,
    entry_key: String,
}

struct Shared {
    mutex: DistributedMutex,
    registry: RecomputationRegistry,
    invoker: Arc<dyn Invoker>,
    lease_secs: u64,
    /// Entry keys queued or running
    pending: DashSet<String>,
    in_flight: AtomicUsize,
    idle: Notify,
    stats: RefreshStats,
}

/// Runs refresh attempts on a bounded pool of Tokio tasks.
///
/// Clones share the queue, the workers and the statistics.
#[derive(Clone)]
pub struct RefreshCoordinator {
    shared: Arc<Shared>,
    jobs: mpsc::Sender<RefreshJob>,
}

impl RefreshCoordinator {
    /// Starts `settings.refresh_workers` workers reading a queue of
    /// `settings.refresh_queue_capacity` jobs.
    ///
    /// Workers stop once every clone of the coordinator, and every cache
    /// using it, has been dropped.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(
        store: Arc<dyn RemoteStore>,
        invoker: Arc<dyn Invoker>,
        settings: &CacheSettings,
    ) -> Self {
        let (jobs, receiver) = mpsc::channel(settings.refresh_queue_capacity.max(1));
        let shared = Arc::new(Shared {
            mutex: DistributedMutex::new(store.clone()),
            registry: RecomputationRegistry::new(store),
            invoker,
            lease_secs: settings.lock_lease_secs,
            pending: DashSet::new(),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            stats: RefreshStats::default(),
        });

        let receiver = Arc::new(Mutex::new(receiver));
        for worker in 0..settings.refresh_workers.max(1) {
            let shared = shared.clone();
            let receiver = receiver.clone();
            tokio::spawn(async move {
                loop {
                    let job = receiver.lock().await.recv().await;
                    let Some(job) = job else { break };
                    shared.run(job).await;
                }
                trace!(worker, "refresh worker stopped");
            });
        }

        Self { shared, jobs }
    }

    /// Queues a refresh of `key` in `cache` without waiting for it.
    ///
    /// Returns `false` when the key is already queued or running in this
    /// process, when the queue is full, or when the workers are gone.
    pub fn submit(&self, cache: &CacheEntryStore, key: &CacheKey) -> bool {
        let entry_key = cache.entry_key(key);
        let shared = &self.shared;

        if !shared.pending.insert(entry_key.clone()) {
            shared.stats.deduplicated.fetch_add(1, Ordering::Relaxed);
            debug!(entry_key, "refresh already pending");
            return false;
        }
        shared.in_flight.fetch_add(1, Ordering::AcqRel);

        let job = RefreshJob {
            cache: cache.clone(),
            key: key.clone(),
            entry_key,
        };
        match self.jobs.try_send(job) {
            Ok(()) => {
                shared.stats.submitted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(job)) => {
                shared.reject(&job.entry_key);
                warn!(entry_key = %job.entry_key, "refresh queue full, dropping submission");
                false
            }
            Err(TrySendError::Closed(job)) => {
                shared.reject(&job.entry_key);
                warn!(entry_key = %job.entry_key, "refresh workers stopped, dropping submission");
                false
            }
        }
    }

    /// Refreshes `key` in `cache` now, on the calling task, and reports how
    /// the attempt ended.
    ///
    /// The remaining TTL is not consulted, but the distributed lock still
    /// is: a refresh running elsewhere yields [`RefreshOutcome::LockDenied`].
    pub async fn refresh_now(&self, cache: &CacheEntryStore, key: &CacheKey) -> RefreshOutcome {
        self.shared.attempt(cache, key, RefreshMode::Forced).await
    }

    /// Waits until no submitted refresh is queued or running.
    pub async fn drain(&self) {
        loop {
            let idle = self.shared.idle.notified();
            if self.shared.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Counters shared by every clone of this coordinator.
    pub fn stats(&self) -> &RefreshStats {
        &self.shared.stats
    }
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("lease_secs", &self.shared.lease_secs)
            .field("in_flight", &self.shared.in_flight.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Shared {
    async fn run(&self, job: RefreshJob) {
        self.attempt(&job.cache, &job.key, RefreshMode::Preload).await;
        self.pending.remove(&job.entry_key);
        self.finish_one();
    }

    /// Undoes the bookkeeping of a submission that never reached the queue.
    fn reject(&self, entry_key: &str) {
        self.pending.remove(entry_key);
        self.finish_one();
        self.stats.rejected.fetch_add(1, Ordering::Relaxed);
    }

    fn finish_one(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn attempt(
        &self,
        cache: &CacheEntryStore,
        key: &CacheKey,
        mode: RefreshMode,
    ) -> RefreshOutcome {
        let entry_key = cache.entry_key(key);
        let lock_key = DistributedMutex::lock_key(&entry_key);

        let outcome = match self.mutex.try_acquire(&lock_key, self.lease_secs).await {
            Err(err) => {
                warn!(entry_key, error = %err, "skipping refresh, lock unavailable");
                RefreshOutcome::Skipped
            }
            Ok(handle) if !handle.is_acquired() => {
                debug!(entry_key, "refresh lock held elsewhere");
                RefreshOutcome::LockDenied
            }
            Ok(mut handle) => {
                let outcome = self.refresh_locked(cache, key, &entry_key, mode).await;
                if let Err(err) = self.mutex.release(&mut handle).await {
                    warn!(entry_key, error = %err, "failed to release refresh lock");
                }
                outcome
            }
        };

        self.stats.record(outcome);
        outcome
    }

    async fn refresh_locked(
        &self,
        cache: &CacheEntryStore,
        key: &CacheKey,
        entry_key: &str,
        mode: RefreshMode,
    ) -> RefreshOutcome {
        if mode == RefreshMode::Preload {
            match cache.needs_refresh(key).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(entry_key, "entry already refreshed");
                    return RefreshOutcome::StillFresh;
                }
                Err(err) => {
                    warn!(entry_key, error = %err, "failed to re-check entry TTL");
                    return RefreshOutcome::Skipped;
                }
            }
        }

        let descriptor = match self.registry.lookup(entry_key).await {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => {
                debug!(entry_key, "no recomputation descriptor registered");
                return RefreshOutcome::DescriptorMissing;
            }
            Err(err) => {
                warn!(entry_key, error = %err, "failed to read recomputation descriptor");
                return RefreshOutcome::Skipped;
            }
        };

        let result = AssertUnwindSafe(self.invoker.invoke(&descriptor))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                Err(RecomputeError::Panicked {
                    operation: descriptor.operation.clone(),
                })
            });
        let value = match result {
            Ok(value) => value,
            Err(err) => {
                error!(
                    entry_key,
                    target = %descriptor.target,
                    operation = %descriptor.operation,
                    error = %err,
                    "recomputation failed"
                );
                return RefreshOutcome::Failed;
            }
        };

        if let Err(err) = cache.put(key, &value).await {
            warn!(entry_key, error = %err, "failed to write refreshed value");
            return RefreshOutcome::Failed;
        }

        let ttl_secs = cache.config().ttl_secs;
        match self.registry.renew_ttl(entry_key, ttl_secs).await {
            Ok(true) => {}
            Ok(false) => {
                // Expired alongside the entry; the descriptor in hand is
                // still the right one.
                if let Err(err) = self.registry.register(entry_key, &descriptor, ttl_secs).await {
                    warn!(entry_key, error = %err, "failed to re-register descriptor");
                }
            }
            Err(err) => {
                warn!(entry_key, error = %err, "failed to renew descriptor TTL");
            }
        }

        info!(entry_key, ttl_secs, "entry refreshed");
        RefreshOutcome::Refreshed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BoxError, MemoryStore, OperationTable};
    use reheat_core::{CacheConfig, Invocation};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryStore>,
        calls: Arc<AtomicU32>,
        coordinator: RefreshCoordinator,
        cache: CacheEntryStore,
        registry: RecomputationRegistry,
    }

    fn fixture(settings: CacheSettings) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let calls = Arc::new(AtomicU32::new(0));
        let table = OperationTable::new();
        let counter = calls.clone();
        table.register("Orders", "load", move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(format!("v{n}").into_bytes()) }
        });
        table.register("Orders", "slow", |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(b"slow".to_vec())
        });
        table.register("Orders", "broken", |_| async {
            Err::<Vec<u8>, BoxError>("backend down".into())
        });

        let coordinator = RefreshCoordinator::new(store.clone(), Arc::new(table), &settings);
        let cache = CacheEntryStore::new(
            CacheConfig::new("orders", 100, 20),
            store.clone(),
            coordinator.clone(),
        );
        let registry = RecomputationRegistry::new(store.clone());
        Fixture {
            store,
            calls,
            coordinator,
            cache,
            registry,
        }
    }

    async fn seed(fx: &Fixture, key: &CacheKey, operation: &str) {
        fx.cache.put(key, b"v0").await.unwrap();
        let descriptor = Invocation::new("Orders", operation).descriptor(key.clone());
        fx.registry
            .register(&fx.cache.entry_key(key), &descriptor, 100)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entry_is_refreshed_in_background() {
        let fx = fixture(CacheSettings::default());
        let key = CacheKey::from("1");
        seed(&fx, &key, "load").await;

        tokio::time::advance(Duration::from_secs(85)).await;
        assert!(fx.coordinator.submit(&fx.cache, &key));
        fx.coordinator.drain().await;

        assert_eq!(fx.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.store.get("orders:1").await.unwrap(), Some(b"v1".to_vec()));
        assert_eq!(fx.coordinator.stats().refreshed(), 1);
        // lock released
        assert_eq!(fx.store.get("orders:1_lock").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_entry_is_left_alone() {
        let fx = fixture(CacheSettings::default());
        let key = CacheKey::from("1");
        seed(&fx, &key, "load").await;

        fx.coordinator.submit(&fx.cache, &key);
        fx.coordinator.drain().await;

        assert_eq!(fx.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fx.coordinator.stats().still_fresh(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_refresh_ignores_remaining_ttl() {
        let fx = fixture(CacheSettings::default());
        let key = CacheKey::from("1");
        seed(&fx, &key, "load").await;

        let outcome = fx.coordinator.refresh_now(&fx.cache, &key).await;
        assert_eq!(outcome, RefreshOutcome::Refreshed);
        assert_eq!(fx.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_lock_denies_refresh() {
        let fx = fixture(CacheSettings::default());
        let key = CacheKey::from("1");
        seed(&fx, &key, "load").await;
        fx.store
            .set_nx_ex("orders:1_lock", b"someone-else", 60)
            .await
            .unwrap();

        let outcome = fx.coordinator.refresh_now(&fx.cache, &key).await;
        assert_eq!(outcome, RefreshOutcome::LockDenied);
        assert_eq!(fx.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            fx.store.get("orders:1_lock").await.unwrap(),
            Some(b"someone-else".to_vec())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_descriptor_is_a_noop() {
        let fx = fixture(CacheSettings::default());
        let key = CacheKey::from("1");
        fx.cache.put(&key, b"v0").await.unwrap();

        let outcome = fx.coordinator.refresh_now(&fx.cache, &key).await;
        assert_eq!(outcome, RefreshOutcome::DescriptorMissing);
        assert_eq!(fx.store.get("orders:1").await.unwrap(), Some(b"v0".to_vec()));
        assert_eq!(fx.store.get("orders:1_lock").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_recompute_keeps_value_and_releases_lock() {
        let fx = fixture(CacheSettings::default());
        let key = CacheKey::from("1");
        seed(&fx, &key, "broken").await;

        let outcome = fx.coordinator.refresh_now(&fx.cache, &key).await;
        assert_eq!(outcome, RefreshOutcome::Failed);
        assert_eq!(fx.store.get("orders:1").await.unwrap(), Some(b"v0".to_vec()));
        assert_eq!(fx.store.get("orders:1_lock").await.unwrap(), None);
        assert_eq!(fx.coordinator.stats().failed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_submissions_are_collapsed() {
        let fx = fixture(CacheSettings::default());
        let key = CacheKey::from("1");
        seed(&fx, &key, "load").await;
        tokio::time::advance(Duration::from_secs(85)).await;

        // Nothing runs until this task yields
        assert!(fx.coordinator.submit(&fx.cache, &key));
        assert!(!fx.coordinator.submit(&fx.cache, &key));
        fx.coordinator.drain().await;

        assert_eq!(fx.coordinator.stats().submitted(), 1);
        assert_eq!(fx.coordinator.stats().deduplicated(), 1);
        assert_eq!(fx.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_rejects_submissions() {
        let fx = fixture(CacheSettings {
            refresh_workers: 1,
            refresh_queue_capacity: 1,
            ..CacheSettings::default()
        });
        let first = CacheKey::from("1");
        let second = CacheKey::from("2");

        assert!(fx.coordinator.submit(&fx.cache, &first));
        assert!(!fx.coordinator.submit(&fx.cache, &second));
        assert_eq!(fx.coordinator.stats().rejected(), 1);

        fx.coordinator.drain().await;
        // A rejected key can be submitted again
        assert!(fx.coordinator.submit(&fx.cache, &second));
        fx.coordinator.drain().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_descriptor_is_registered_again() {
        let fx = fixture(CacheSettings::default());
        let key = CacheKey::from("1");
        seed(&fx, &key, "slow").await;
        let descriptor_key = RecomputationRegistry::descriptor_key("orders:1");

        // Descriptor expires while the recomputation runs
        fx.store.expire(&descriptor_key, 1).await.unwrap();

        let outcome = fx.coordinator.refresh_now(&fx.cache, &key).await;
        assert_eq!(outcome, RefreshOutcome::Refreshed);
        assert_eq!(
            fx.store.ttl(&descriptor_key).await.unwrap(),
            crate::KeyTtl::Expires(100)
        );
        assert!(fx.registry.lookup("orders:1").await.unwrap().is_some());
    }

    #[test]
    fn test_submission_after_workers_stopped_is_rejected() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let fx = {
            let _guard = runtime.enter();
            fixture(CacheSettings::default())
        };
        // Dropping the runtime drops the workers and closes the queue
        drop(runtime);

        let key = CacheKey::from("1");
        assert!(!fx.coordinator.submit(&fx.cache, &key));
        assert_eq!(fx.coordinator.stats().rejected(), 1);
        assert_eq!(fx.coordinator.stats().submitted(), 0);

        // Bookkeeping was undone, so the key is not reported as pending
        assert!(!fx.coordinator.submit(&fx.cache, &key));
        assert_eq!(fx.coordinator.stats().deduplicated(), 0);
        assert_eq!(fx.coordinator.stats().rejected(), 2);
    }

    #[tokio::test]
    async fn test_drain_returns_immediately_when_idle() {
        let fx = fixture(CacheSettings::default());
        fx.coordinator.drain().await;
        assert_eq!(fx.coordinator.stats().submitted(), 0);
    }
}
