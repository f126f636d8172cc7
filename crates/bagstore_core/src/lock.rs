//! Bag-wide lifecycle gate.
//!
//! Data-path operations hold the lock shared; lifecycle transitions (close,
//! remove, flush) hold it exclusively. The underlying `parking_lot` lock is
//! task-fair: once a writer waits, new readers queue behind it.
//!
//! Releasing an exclusive guard as terminal tears the bag down. Every later
//! acquisition fails with [`CoreError::BagClosed`].

use crate::error::{CoreError, CoreResult};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct LockState {
    closed: bool,
}

/// Shared/exclusive gate over one bag.
#[derive(Debug, Default)]
pub struct BagLock {
    state: RwLock<LockState>,
}

/// Held by data-path operations.
#[must_use = "the lock is released when the guard is dropped"]
pub struct SharedGuard<'a> {
    _guard: RwLockReadGuard<'a, LockState>,
}

/// Held by lifecycle operations.
#[must_use = "the lock is released when the guard is dropped"]
pub struct ExclusiveGuard<'a> {
    guard: RwLockWriteGuard<'a, LockState>,
}

impl BagLock {
    /// Creates an open gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the gate shared, blocking while an exclusive holder or
    /// waiter exists.
    pub fn shared(&self) -> CoreResult<SharedGuard<'_>> {
        let guard = self.state.read();
        if guard.closed {
            return Err(CoreError::BagClosed);
        }
        Ok(SharedGuard { _guard: guard })
    }

    /// Acquires the gate exclusively, blocking until every shared holder
    /// has released.
    pub fn exclusive(&self) -> CoreResult<ExclusiveGuard<'_>> {
        let guard = self.state.write();
        if guard.closed {
            return Err(CoreError::BagClosed);
        }
        Ok(ExclusiveGuard { guard })
    }

    /// Whether a terminal release happened.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }
}

impl ExclusiveGuard<'_> {
    /// Releases the gate. With `terminal` the bag can never be acquired again.
    pub fn release(mut self, terminal: bool) {
        if terminal {
            self.guard.closed = true;
        }
    }
}

impl std::fmt::Debug for SharedGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedGuard")
    }
}

impl std::fmt::Debug for ExclusiveGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ExclusiveGuard")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn shared_holders_run_together() {
        let lock = Arc::new(BagLock::new());
        let threads = 4;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let _guard = lock.shared().unwrap();
                    // Every thread must hold the lock at once to pass.
                    barrier.wait();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn exclusive_waits_for_shared_holders() {
        let lock = Arc::new(BagLock::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let reader = lock.shared().unwrap();
        let writer = {
            let lock = Arc::clone(&lock);
            let log = Arc::clone(&log);
            thread::spawn(move || {
                let guard = lock.exclusive().unwrap();
                log.lock().push("exclusive");
                guard.release(false);
            })
        };

        thread::sleep(Duration::from_millis(50));
        log.lock().push("shared released");
        drop(reader);
        writer.join().unwrap();

        assert_eq!(*log.lock(), vec!["shared released", "exclusive"]);
    }

    #[test]
    fn waiting_writer_blocks_new_readers() {
        let lock = Arc::new(BagLock::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let late_reader_in = Arc::new(AtomicBool::new(false));

        let first = lock.shared().unwrap();
        let writer = {
            let lock = Arc::clone(&lock);
            let log = Arc::clone(&log);
            thread::spawn(move || {
                let guard = lock.exclusive().unwrap();
                thread::sleep(Duration::from_millis(20));
                log.lock().push("exclusive");
                guard.release(false);
            })
        };
        thread::sleep(Duration::from_millis(50));

        let late = {
            let lock = Arc::clone(&lock);
            let log = Arc::clone(&log);
            let flag = Arc::clone(&late_reader_in);
            thread::spawn(move || {
                let _guard = lock.shared().unwrap();
                flag.store(true, Ordering::SeqCst);
                log.lock().push("late shared");
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!late_reader_in.load(Ordering::SeqCst));

        drop(first);
        writer.join().unwrap();
        late.join().unwrap();
        assert_eq!(*log.lock(), vec!["exclusive", "late shared"]);
    }

    #[test]
    fn terminal_release_closes_for_good() {
        let lock = BagLock::new();
        lock.exclusive().unwrap().release(false);
        assert!(!lock.is_closed());
        drop(lock.shared().unwrap());

        lock.exclusive().unwrap().release(true);
        assert!(lock.is_closed());
        assert!(matches!(lock.shared(), Err(CoreError::BagClosed)));
        assert!(matches!(lock.exclusive(), Err(CoreError::BagClosed)));
    }
}
