//! ---
//! corral_section: "04-provisioning-orchestration"
//! corral_subsection: "module"
//! corral_type: "source"
//! corral_scope: "code"
//! corral_description: "Orchestration services coupling containers, profiles, and provisioning."
//! corral_version: "v0.1.0-alpha"
//! corral_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::debug;

/// Errors raised while acquiring or swapping permits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermitError {
    /// The backing service was not active within the timeout.
    #[error("service '{0}' unavailable")]
    Unavailable(&'static str),
    /// Other permits held the slot past the timeout.
    #[error("permit for service '{0}' not obtained in time")]
    Timeout(&'static str),
}

impl PermitError {
    /// Whether the error indicates transient contention; safe to retry.
    pub fn is_busy(&self) -> bool {
        matches!(self, PermitError::Timeout(_))
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u64,
    instance: Option<Arc<T>>,
    shared: usize,
    exclusive: bool,
}

/// Guards access to a swappable service instance.
///
/// Shared permits pin the current instance and generation for their duration;
/// an exclusive holder serialises with all other permits and is the only path
/// allowed to swap or clear the instance. Acquisition against an inactive
/// slot blocks until activation or times out with
/// [`PermitError::Unavailable`].
///
/// Permits are not reentrant: acquiring a second permit for the same manager
/// from within a held one is a programming error and risks deadlock against a
/// concurrent exclusive acquisition.
#[derive(Debug)]
pub struct PermitManager<T> {
    name: &'static str,
    slot: Mutex<Slot<T>>,
    changed: Condvar,
}

impl<T> PermitManager<T> {
    /// Create an inactive manager; `name` labels errors and log lines.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Mutex::new(Slot {
                generation: 0,
                instance: None,
                shared: 0,
                exclusive: false,
            }),
            changed: Condvar::new(),
        }
    }

    /// Acquire a shared permit, waiting up to `timeout` for the slot to be
    /// active and free of exclusive holders.
    pub fn acquire(self: &Arc<Self>, timeout: Duration) -> Result<Permit<T>, PermitError> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        loop {
            if !slot.exclusive {
                if let Some(instance) = slot.instance.clone() {
                    slot.shared += 1;
                    return Ok(Permit {
                        manager: self.clone(),
                        instance,
                        generation: slot.generation,
                        mode: PermitMode::Shared,
                        released: false,
                    });
                }
            }
            if self.changed.wait_until(&mut slot, deadline).timed_out() {
                return Err(if slot.instance.is_none() {
                    PermitError::Unavailable(self.name)
                } else {
                    PermitError::Timeout(self.name)
                });
            }
        }
    }

    /// Acquire an exclusive permit, waiting up to `timeout` for the slot to
    /// be active and completely unheld.
    pub fn acquire_exclusive(self: &Arc<Self>, timeout: Duration) -> Result<Permit<T>, PermitError> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        loop {
            if !slot.exclusive && slot.shared == 0 {
                if let Some(instance) = slot.instance.clone() {
                    slot.exclusive = true;
                    slot.generation += 1;
                    return Ok(Permit {
                        manager: self.clone(),
                        instance,
                        generation: slot.generation,
                        mode: PermitMode::Exclusive,
                        released: false,
                    });
                }
            }
            if self.changed.wait_until(&mut slot, deadline).timed_out() {
                return Err(if slot.instance.is_none() {
                    PermitError::Unavailable(self.name)
                } else {
                    PermitError::Timeout(self.name)
                });
            }
        }
    }

    /// Install (or swap) the backing instance, waiting for current holders to
    /// drain. Bumps the generation.
    pub fn activate(&self, instance: Arc<T>, timeout: Duration) -> Result<(), PermitError> {
        let mut slot = self.swap_slot(timeout)?;
        slot.generation += 1;
        slot.instance = Some(instance);
        debug!(service = self.name, generation = slot.generation, "permit slot activated");
        drop(slot);
        self.changed.notify_all();
        Ok(())
    }

    /// Clear the backing instance, waiting for current holders to drain.
    /// Subsequent acquisitions block until the next activation.
    pub fn deactivate(&self, timeout: Duration) -> Result<(), PermitError> {
        let mut slot = self.swap_slot(timeout)?;
        slot.generation += 1;
        slot.instance = None;
        debug!(service = self.name, generation = slot.generation, "permit slot deactivated");
        drop(slot);
        self.changed.notify_all();
        Ok(())
    }

    /// Whether an instance is currently installed.
    pub fn is_active(&self) -> bool {
        self.slot.lock().instance.is_some()
    }

    fn swap_slot(&self, timeout: Duration) -> Result<parking_lot::MutexGuard<'_, Slot<T>>, PermitError> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        while slot.exclusive || slot.shared > 0 {
            if self.changed.wait_until(&mut slot, deadline).timed_out() {
                return Err(PermitError::Timeout(self.name));
            }
        }
        Ok(slot)
    }

    fn release(&self, mode: PermitMode) {
        let mut slot = self.slot.lock();
        match mode {
            PermitMode::Shared => slot.shared = slot.shared.saturating_sub(1),
            PermitMode::Exclusive => slot.exclusive = false,
        }
        drop(slot);
        self.changed.notify_all();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PermitMode {
    Shared,
    Exclusive,
}

/// Scoped access token for a permit-managed service instance.
///
/// Released exactly once: either explicitly via [`Permit::release`] or on
/// drop, covering every code path including unwinds.
#[derive(Debug)]
pub struct Permit<T> {
    manager: Arc<PermitManager<T>>,
    instance: Arc<T>,
    generation: u64,
    mode: PermitMode,
    released: bool,
}

impl<T> Permit<T> {
    /// The pinned service instance.
    pub fn instance(&self) -> &Arc<T> {
        &self.instance
    }

    /// Generation of the slot this permit pinned.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Release the permit explicitly.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.manager.release(self.mode);
        }
    }
}

impl<T> std::ops::Deref for Permit<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.instance
    }
}

impl<T> Drop for Permit<T> {
    fn drop(&mut self) {
        self.release_once();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(50);
    const LONG: Duration = Duration::from_secs(2);

    #[test]
    fn acquire_fails_unavailable_until_activated() {
        let manager: Arc<PermitManager<u32>> = Arc::new(PermitManager::new("svc"));
        let err = manager.acquire(SHORT).unwrap_err();
        assert_eq!(err, PermitError::Unavailable("svc"));

        manager.activate(Arc::new(7), SHORT).unwrap();
        let permit = manager.acquire(SHORT).unwrap();
        assert_eq!(**permit.instance(), 7);
    }

    #[test]
    fn shared_permits_coexist_exclusive_serialises() {
        let manager: Arc<PermitManager<u32>> = Arc::new(PermitManager::new("svc"));
        manager.activate(Arc::new(1), SHORT).unwrap();

        let first = manager.acquire(SHORT).unwrap();
        let second = manager.acquire(SHORT).unwrap();
        let err = manager.acquire_exclusive(SHORT).unwrap_err();
        assert!(err.is_busy());

        drop(first);
        drop(second);
        let exclusive = manager.acquire_exclusive(SHORT).unwrap();
        let err = manager.acquire(SHORT).unwrap_err();
        assert_eq!(err, PermitError::Timeout("svc"));
        drop(exclusive);
    }

    #[test]
    fn blocked_acquire_succeeds_once_activated() {
        let manager: Arc<PermitManager<u32>> = Arc::new(PermitManager::new("svc"));
        let waiter = {
            let manager = manager.clone();
            thread::spawn(move || manager.acquire(LONG).map(|permit| **permit.instance()))
        };
        thread::sleep(Duration::from_millis(30));
        manager.activate(Arc::new(42), SHORT).unwrap();
        assert_eq!(waiter.join().unwrap().unwrap(), 42);
    }

    #[test]
    fn deactivate_waits_for_holders() {
        let manager: Arc<PermitManager<u32>> = Arc::new(PermitManager::new("svc"));
        manager.activate(Arc::new(1), SHORT).unwrap();
        let held = manager.acquire(SHORT).unwrap();
        let err = manager.deactivate(SHORT).unwrap_err();
        assert_eq!(err, PermitError::Timeout("svc"));

        held.release();
        manager.deactivate(SHORT).unwrap();
        assert!(!manager.is_active());
    }

    #[test]
    fn generation_advances_on_swap() {
        let manager: Arc<PermitManager<u32>> = Arc::new(PermitManager::new("svc"));
        manager.activate(Arc::new(1), SHORT).unwrap();
        let before = manager.acquire(SHORT).unwrap();
        let pinned = before.generation();
        before.release();

        manager.activate(Arc::new(2), SHORT).unwrap();
        let after = manager.acquire(SHORT).unwrap();
        assert!(after.generation() > pinned);
        assert_eq!(**after.instance(), 2);
    }
}
