//! Shared helpers for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use reheat::{
    BoxError, Invoker, KeyTtl, MemoryStore, RecomputationRegistry, RecomputeError, RemoteStore,
    StoreError,
};
use reheat_core::RecomputationDescriptor;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tracing_subscriber::EnvFilter;

/// Installs a test-writer subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Invoker producing `v1`, `v2`, ... and counting its calls.
///
/// Optionally sleeps on the Tokio clock, or waits for [`release`](Self::release)
/// before answering.
#[derive(Default)]
pub struct CountingInvoker {
    calls: AtomicU32,
    delay: Option<Duration>,
    gate: Option<Semaphore>,
    started: Notify,
    fail: bool,
    panic: bool,
}

impl CountingInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Blocks every call until [`release`](Self::release) is called.
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn panicking() -> Self {
        Self {
            panic: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Resolves once a call has started.
    pub async fn started(&self) {
        self.started.notified().await;
    }

    /// Lets one gated call finish.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }
}

#[async_trait]
impl Invoker for CountingInvoker {
    async fn invoke(
        &self,
        descriptor: &RecomputationDescriptor,
    ) -> Result<Vec<u8>, RecomputeError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.started.notify_one();

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic {
            panic!("recomputation of {} blew up", descriptor.key);
        }
        if self.fail {
            return Err(RecomputeError::Failed {
                operation: descriptor.operation.clone(),
                source: BoxError::from("backend unavailable"),
            });
        }
        Ok(format!("v{n}").into_bytes())
    }
}

/// [`MemoryStore`] whose commands can be made to fail.
///
/// - `set_down(true)` fails every command, as if the store were unreachable
/// - `fail_ttl(true)` fails only `TTL`
/// - `fail_descriptor_reads(true)` fails `GET` of recomputation descriptors
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    down: AtomicBool,
    ttl_failing: AtomicBool,
    descriptor_reads_failing: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn fail_ttl(&self, failing: bool) {
        self.ttl_failing.store(failing, Ordering::SeqCst);
    }

    pub fn fail_descriptor_reads(&self, failing: bool) {
        self.descriptor_reads_failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check()?;
        if key.ends_with(RecomputationRegistry::DESCRIPTOR_SUFFIX)
            && self.descriptor_reads_failing.load(Ordering::SeqCst)
        {
            return Err(StoreError::Unavailable("read timed out".to_string()));
        }
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set_ex(key, value, ttl_secs).await
    }

    async fn set_nx_ex(
        &self,
        key: &str,
        value: &[u8],
        ttl_secs: u64,
    ) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.set_nx_ex(key, value, ttl_secs).await
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, StoreError> {
        self.check()?;
        if self.ttl_failing.load(Ordering::SeqCst) {
            return Err(StoreError::Command("TTL rejected".to_string()));
        }
        self.inner.ttl(key).await
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.expire(key, ttl_secs).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn delete_if_eq(&self, key: &str, expected: &[u8]) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.delete_if_eq(key, expected).await
    }

    fn register_cache_name(&self, name: &str) {
        self.inner.register_cache_name(name);
    }

    fn cache_names(&self) -> Vec<String> {
        self.inner.cache_names()
    }
}
