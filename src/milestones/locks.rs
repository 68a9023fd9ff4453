//! Per-record exclusive locks.
//!
//! A lock covers exactly one record id, so unrelated milestones never wait
//! on each other. Acquisition backs off exponentially and gives up with a
//! contention error once the attempts run out.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::TrackingError;
use crate::progress::retry::backoff_delay;

/// Backoff settings for lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(200),
        }
    }
}

/// Table of currently held record locks.
#[derive(Debug, Default)]
pub struct RecordLocks {
    held: DashMap<Uuid, ()>,
    policy: LockPolicy,
}

impl RecordLocks {
    pub fn new(policy: LockPolicy) -> Self {
        Self {
            held: DashMap::new(),
            policy,
        }
    }

    /// Take the lock if it is free.
    pub fn try_acquire(&self, id: Uuid) -> Option<RecordGuard<'_>> {
        match self.held.entry(id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(RecordGuard { locks: self, id })
            }
        }
    }

    /// Take the lock, backing off while another holder has it.
    pub fn acquire(&self, id: Uuid) -> Result<RecordGuard<'_>, TrackingError> {
        let attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(guard) = self.try_acquire(id) {
                return Ok(guard);
            }
            if attempt < attempts {
                let delay = backoff_delay(self.policy.initial_backoff, self.policy.max_backoff, attempt);
                tracing::debug!("Record {} is locked, retrying in {:?}", id, delay);
                std::thread::sleep(delay);
            }
        }
        Err(TrackingError::Contention(format!(
            "record {} stayed locked for {} attempts",
            id, attempts
        )))
    }

    pub fn is_held(&self, id: Uuid) -> bool {
        self.held.contains_key(&id)
    }
}

/// Releases its lock on drop.
#[derive(Debug)]
pub struct RecordGuard<'a> {
    locks: &'a RecordLocks,
    id: Uuid,
}

impl RecordGuard<'_> {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for RecordGuard<'_> {
    fn drop(&mut self) {
        self.locks.held.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn fast() -> LockPolicy {
        LockPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_lock_is_exclusive_per_record() {
        let locks = RecordLocks::new(fast());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let guard = locks.try_acquire(a).unwrap();
        assert!(locks.try_acquire(a).is_none());
        assert!(locks.try_acquire(b).is_some());

        drop(guard);
        assert!(!locks.is_held(a));
        assert!(locks.try_acquire(a).is_some());
    }

    #[test]
    fn test_acquire_gives_up_with_contention() {
        let locks = RecordLocks::new(fast());
        let id = Uuid::new_v4();
        let _held = locks.acquire(id).unwrap();

        let err = locks.acquire(id).unwrap_err();
        assert!(matches!(err, TrackingError::Contention(_)));
    }

    #[test]
    fn test_acquire_waits_for_release() {
        let locks = Arc::new(RecordLocks::new(LockPolicy {
            max_attempts: 50,
            initial_backoff: Duration::from_millis(2),
            max_backoff: Duration::from_millis(10),
        }));
        let id = Uuid::new_v4();
        let guard = locks.try_acquire(id).unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            std::thread::spawn(move || locks.acquire(id).map(|g| g.id()))
        };
        std::thread::sleep(Duration::from_millis(20));
        drop(guard);

        assert_eq!(waiter.join().unwrap().unwrap(), id);
    }
}
