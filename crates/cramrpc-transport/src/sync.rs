//! Counting semaphore used to bound concurrent clients and calls.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A counting semaphore built on `Mutex` + `Condvar`.
///
/// Cloning shares the same counter.
#[derive(Debug, Clone)]
pub struct Semaphore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    available: Mutex<usize>,
    freed: Condvar,
    limit: usize,
}

/// One acquired unit; released on drop.
#[derive(Debug)]
pub struct Permit {
    inner: Arc<Inner>,
}

impl Semaphore {
    /// Create a semaphore with `limit` units (at least one).
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            inner: Arc::new(Inner {
                available: Mutex::new(limit),
                freed: Condvar::new(),
                limit,
            }),
        }
    }

    /// Take a unit without waiting.
    pub fn try_acquire(&self) -> Option<Permit> {
        let mut available = self
            .inner
            .available
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *available == 0 {
            return None;
        }
        *available -= 1;
        Some(Permit {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Take a unit, waiting at most `timeout`.
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<Permit> {
        let deadline = Instant::now() + timeout;
        let mut available = self
            .inner
            .available
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *available == 0 {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .inner
                .freed
                .wait_timeout(available, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            available = guard;
        }
        *available -= 1;
        Some(Permit {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Units currently free.
    pub fn available(&self) -> usize {
        *self
            .inner
            .available
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Total units.
    pub fn limit(&self) -> usize {
        self.inner.limit
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut available = self
            .inner
            .available
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *available += 1;
        self.inner.freed.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permits_are_bounded_and_returned() {
        let sem = Semaphore::new(2);
        let a = sem.try_acquire().unwrap();
        let _b = sem.try_acquire().unwrap();
        assert!(sem.try_acquire().is_none());
        drop(a);
        assert_eq!(sem.available(), 1);
        assert!(sem.try_acquire().is_some());
    }

    #[test]
    fn acquire_waits_for_release() {
        let sem = Semaphore::new(1);
        let held = sem.try_acquire().unwrap();
        let waiter = {
            let sem = sem.clone();
            std::thread::spawn(move || sem.acquire_timeout(Duration::from_secs(5)).is_some())
        };
        std::thread::sleep(Duration::from_millis(20));
        drop(held);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn acquire_gives_up_after_timeout() {
        let sem = Semaphore::new(1);
        let _held = sem.try_acquire().unwrap();
        assert!(sem.acquire_timeout(Duration::from_millis(20)).is_none());
    }
}
