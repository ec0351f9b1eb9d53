//! ---
//! corral_section: "03-registry-state"
//! corral_subsection: "module"
//! corral_type: "source"
//! corral_scope: "code"
//! corral_description: "Registry-owned mutable state and immutable snapshots."
//! corral_version: "v0.1.0-alpha"
//! corral_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

/// Owned shared guard over a registry entity.
pub type ReadGuard<T> = ArcRwLockReadGuard<RawRwLock, T>;

/// Owned exclusive guard over a registry entity.
pub type WriteGuard<T> = ArcRwLockWriteGuard<RawRwLock, T>;

/// Read/write lock with bounded acquisition.
///
/// Acquisition attempts a non-blocking try first and falls back to a timed
/// wait, so a stuck holder surfaces as a timeout instead of an indefinite
/// hang. Guards are owned (`Arc`-backed) and may outlive the registry lookup
/// that produced them. The lock is not reentrant; nested acquisition from the
/// same call chain is a programming error.
#[derive(Debug)]
pub struct TimedRwLock<T> {
    inner: Arc<RwLock<T>>,
}

impl<T> TimedRwLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(value)),
        }
    }

    /// Acquire a shared guard within `timeout`, or `None` on expiry.
    pub fn read(&self, timeout: Duration) -> Option<ReadGuard<T>> {
        self.inner
            .try_read_arc()
            .or_else(|| self.inner.try_read_arc_for(timeout))
    }

    /// Acquire an exclusive guard within `timeout`, or `None` on expiry.
    pub fn write(&self, timeout: Duration) -> Option<WriteGuard<T>> {
        self.inner
            .try_write_arc()
            .or_else(|| self.inner.try_write_arc_for(timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_times_out_while_read_held() {
        let lock = TimedRwLock::new(0u32);
        let read = lock.read(Duration::from_millis(10)).expect("read acquired");
        assert!(lock.write(Duration::from_millis(20)).is_none());
        drop(read);
        assert!(lock.write(Duration::from_millis(20)).is_some());
    }

    #[test]
    fn reads_are_shared() {
        let lock = TimedRwLock::new(0u32);
        let first = lock.read(Duration::from_millis(10));
        let second = lock.read(Duration::from_millis(10));
        assert!(first.is_some());
        assert!(second.is_some());
    }
}
