use crate::{Error, Result};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicU32, Ordering::Relaxed};
use std::time::Duration;

/// Single-writer / multi-reader coordination with acquire timeouts.
///
/// A writer bumps the change counter when its commit lands; a reader that
/// sees the counter move since its last shared acquisition must drop its
/// cached pages before reading (snapshot-at-acquire).
pub(crate) struct LockService {
    state: RwLock<()>,
    change_counter: AtomicU32,
    timeout: Duration,
}

/// Scoped shared (read) lock; released on drop on every exit path.
pub(crate) struct SharedScope<'a> {
    _guard: RwLockReadGuard<'a, ()>,
}

/// Scoped exclusive (write) lock.
pub(crate) struct ExclusiveScope<'a> {
    _guard: RwLockWriteGuard<'a, ()>,
}

impl LockService {
    pub fn new(timeout: Duration) -> Self {
        LockService {
            state: RwLock::new(()),
            change_counter: AtomicU32::new(0),
            timeout,
        }
    }

    pub fn enter_shared(&self) -> Result<SharedScope<'_>> {
        let guard = self
            .state
            .try_read_for(self.timeout)
            .ok_or(Error::LockTimeout("shared"))?;

        Ok(SharedScope { _guard: guard })
    }

    pub fn enter_exclusive(&self) -> Result<ExclusiveScope<'_>> {
        let guard = self
            .state
            .try_write_for(self.timeout)
            .ok_or(Error::LockTimeout("exclusive"))?;

        Ok(ExclusiveScope { _guard: guard })
    }

    pub fn change_counter(&self) -> u32 {
        self.change_counter.load(Relaxed)
    }

    pub fn set_change_counter(&self, value: u32) {
        self.change_counter.store(value, Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_excludes_readers_until_timeout() {
        let locker = LockService::new(Duration::from_millis(20));

        let writer = locker.enter_exclusive().unwrap();
        assert!(matches!(
            locker.enter_shared(),
            Err(Error::LockTimeout("shared"))
        ));

        drop(writer);
        assert!(locker.enter_shared().is_ok());
    }

    #[test]
    fn readers_share() {
        let locker = LockService::new(Duration::from_millis(20));

        let a = locker.enter_shared().unwrap();
        let b = locker.enter_shared().unwrap();
        assert!(matches!(
            locker.enter_exclusive(),
            Err(Error::LockTimeout("exclusive"))
        ));

        drop(a);
        drop(b);
        assert!(locker.enter_exclusive().is_ok());
    }
}
