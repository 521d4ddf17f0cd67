//! # Distributed mutex
//!
//! A named, lease-bounded lock kept in the remote store so that at most one
//! process refreshes a given key at a time.
//!
//! Acquisition is one atomic `SET lock token NX EX lease`: it never waits.
//! A caller that does not get the lock skips its refresh, since someone else
//! is already doing it. Release deletes the lock only while it still holds
//! the caller's owner token, so a lock that expired and was taken by another
//! holder is left alone.

use crate::store::RemoteStore;
use crate::LockError;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Identifies this process among all holders of the remote store.
static PROCESS_NONCE: Lazy<String> =
    Lazy::new(|| format!("{:x}-{:016x}", std::process::id(), fastrand::u64(..)));

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(0);

fn next_owner_token() -> String {
    format!(
        "{}:{}",
        *PROCESS_NONCE,
        NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)
    )
}

/// Result of one acquisition attempt.
///
/// Owned by the refresh attempt that created it and released before that
/// attempt ends.
#[derive(Debug)]
pub struct LockHandle {
    lock_key: String,
    owner_token: String,
    acquired: bool,
}

impl LockHandle {
    /// Store key the lock lives under.
    pub fn lock_key(&self) -> &str {
        &self.lock_key
    }

    /// Value written to the lock key; release only deletes a matching value.
    pub fn owner_token(&self) -> &str {
        &self.owner_token
    }

    /// Whether this handle currently holds the lock.
    pub fn is_acquired(&self) -> bool {
        self.acquired
    }
}

/// Lock manager on top of a [`RemoteStore`].
#[derive(Clone)]
pub struct DistributedMutex {
    store: Arc<dyn RemoteStore>,
}

impl DistributedMutex {
    /// Suffix appended to an entry key to form its lock key.
    pub const LOCK_SUFFIX: &'static str = "_lock";

    /// Mutex taking its locks in `store`.
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// Lock key guarding refreshes of `entry_key`.
    ///
    /// ```
    /// assert_eq!(reheat::DistributedMutex::lock_key("orders:42"), "orders:42_lock");
    /// ```
    pub fn lock_key(entry_key: &str) -> String {
        format!("{entry_key}{}", Self::LOCK_SUFFIX)
    }

    /// Tries to take `lock_key` for `lease_secs` seconds without waiting.
    ///
    /// The returned handle reports whether the lock was granted. A lease of 0
    /// is raised to one second.
    ///
    /// # Errors
    ///
    /// [`LockError::Acquire`] if the store could not be reached.
    pub async fn try_acquire(
        &self,
        lock_key: &str,
        lease_secs: u64,
    ) -> Result<LockHandle, LockError> {
        let owner_token = next_owner_token();
        let acquired = self
            .store
            .set_nx_ex(lock_key, owner_token.as_bytes(), lease_secs.max(1))
            .await
            .map_err(|source| LockError::Acquire {
                lock_key: lock_key.to_string(),
                source,
            })?;

        Ok(LockHandle {
            lock_key: lock_key.to_string(),
            owner_token,
            acquired,
        })
    }

    /// Releases `handle` if it still holds the lock.
    ///
    /// Returns `true` when the lock key was deleted. Releasing a handle that
    /// was never granted, or was already released, is a no-op returning
    /// `false`. So is releasing after the lease ran out: whatever now sits
    /// under the key belongs to another holder and is not touched.
    ///
    /// # Errors
    ///
    /// [`LockError::Release`] if the store could not be reached; the handle
    /// stays acquired and the lease bounds how long the lock lingers.
    pub async fn release(&self, handle: &mut LockHandle) -> Result<bool, LockError> {
        if !handle.acquired {
            return Ok(false);
        }

        let deleted = self
            .store
            .delete_if_eq(&handle.lock_key, handle.owner_token.as_bytes())
            .await
            .map_err(|source| LockError::Release {
                lock_key: handle.lock_key.clone(),
                source,
            })?;
        handle.acquired = false;

        if !deleted {
            debug!(lock_key = %handle.lock_key, "lock lease expired before release");
        }
        Ok(deleted)
    }
}
