//! Counting semaphore with a close protocol.
//!
//! Waiters block on a condition variable rather than spinning. Closing the
//! semaphore wakes every waiter and makes all further acquisitions fail, which
//! is how [`ResourcePool::shutdown`](crate::ResourcePool::shutdown) cancels
//! blocked callers.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Returned when acquiring from a closed semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("semaphore is closed")]
pub struct AcquireError;

#[derive(Debug)]
struct State {
    permits: usize,
    closed: bool,
}

/// A counting semaphore built on a mutex and a condition variable.
#[derive(Debug)]
pub struct Semaphore {
    state: Mutex<State>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(State {
                permits,
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Takes one permit, blocking until one is posted or the semaphore closes.
    pub fn acquire(&self) -> Result<(), AcquireError> {
        let mut state = self.state.lock();
        while state.permits == 0 && !state.closed {
            self.cond.wait(&mut state);
        }
        if state.closed {
            return Err(AcquireError);
        }
        state.permits -= 1;
        Ok(())
    }

    /// Takes one permit if one is available right now.
    pub fn try_acquire(&self) -> Result<bool, AcquireError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(AcquireError);
        }
        if state.permits == 0 {
            return Ok(false);
        }
        state.permits -= 1;
        Ok(true)
    }

    /// Like [`acquire`](Self::acquire), but gives up after `timeout`.
    ///
    /// Returns `Ok(false)` if the deadline passed without a permit. A timeout
    /// too large to express as a deadline waits like `acquire`.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<bool, AcquireError> {
        let deadline = match Instant::now().checked_add(timeout) {
            Some(deadline) => deadline,
            None => return self.acquire().map(|()| true),
        };
        let mut state = self.state.lock();
        while state.permits == 0 && !state.closed {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        if state.closed {
            return Err(AcquireError);
        }
        if state.permits == 0 {
            return Ok(false);
        }
        state.permits -= 1;
        Ok(true)
    }

    /// Posts one permit and wakes a single waiter.
    pub fn release(&self) {
        let mut state = self.state.lock();
        state.permits += 1;
        self.cond.notify_one();
    }

    /// Fails every pending and future acquisition. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Permits currently available.
    pub fn available(&self) -> usize {
        self.state.lock().permits
    }
}
