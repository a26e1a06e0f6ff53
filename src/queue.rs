//! Bounded blocking queue for handing work between threads.
//!
//! The queue is a mutex-protected deque with a fixed capacity and two
//! condition variables: producers wait on "not full", consumers wait on
//! "not empty". A full queue blocks producers, so a slow consumer applies
//! backpressure instead of letting memory grow without bound.
//!
//! # Shutdown
//!
//! [`BoundedQueue::close`] drops whatever is still queued, wakes every waiter
//! and makes all blocking calls return promptly from then on: pushes hand the
//! item back in a [`PushError`], pops report [`PopError::Closed`] (or `None`).

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Returned by a push on a closed queue, carrying the rejected item.
#[derive(PartialEq, Eq, thiserror::Error)]
#[error("pushing onto a closed queue")]
pub struct PushError<T>(pub T);

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PushError(..)")
    }
}

/// Why a pop returned without an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PopError {
    #[error("timed out waiting for an item")]
    Timeout,
    #[error("queue is closed")]
    Closed,
}

struct Inner<T> {
    deque: VecDeque<T>,
    closed: bool,
}

/// A bounded, thread-safe double-ended queue with blocking push and pop.
///
/// All operations take the one internal lock, so callers never need their
/// own synchronization. `push_back`/`pop` pairs are FIFO; `push_front`
/// jumps the line and should be reserved for deliberate priority insertion.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
/// use serverkit::BoundedQueue;
///
/// let queue = Arc::new(BoundedQueue::new(2));
///
/// let producer = {
///     let queue = queue.clone();
///     thread::spawn(move || {
///         for i in 0..5 {
///             queue.push_back(i).unwrap();
///         }
///     })
/// };
///
/// let received: Vec<i32> = (0..5).map(|_| queue.pop().unwrap()).collect();
/// producer.join().unwrap();
/// assert_eq!(received, vec![0, 1, 2, 3, 4]);
/// ```
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    /// Signalled when an item is inserted.
    not_empty: Condvar,
    /// Signalled when an item is removed.
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Creates an empty queue holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be greater than zero");
        Self {
            inner: Mutex::new(Inner {
                deque: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Appends `item`, blocking while the queue is full.
    pub fn push_back(&self, item: T) -> Result<(), PushError<T>> {
        self.push(item, VecDeque::push_back)
    }

    /// Prepends `item`, blocking while the queue is full.
    pub fn push_front(&self, item: T) -> Result<(), PushError<T>> {
        self.push(item, VecDeque::push_front)
    }

    fn push(&self, item: T, insert: fn(&mut VecDeque<T>, T)) -> Result<(), PushError<T>> {
        let mut inner = self.inner.lock();
        while inner.deque.len() >= self.capacity && !inner.closed {
            self.not_full.wait(&mut inner);
        }
        if inner.closed {
            return Err(PushError(item));
        }
        insert(&mut inner.deque, item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Removes the front item, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue is closed.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return None;
            }
            if let Some(item) = inner.deque.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Removes the front item, waiting at most `timeout` for one to arrive.
    ///
    /// The deadline is fixed on entry; wakeups from [`flush`](Self::flush)
    /// or spurious wakeups do not extend it.
    ///
    /// A timeout too large to express as a deadline waits like [`pop`](Self::pop).
    pub fn pop_timeout(&self, timeout: Duration) -> Result<T, PopError> {
        let deadline = match Instant::now().checked_add(timeout) {
            Some(deadline) => deadline,
            None => return self.pop().ok_or(PopError::Closed),
        };
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return Err(PopError::Closed);
            }
            if let Some(item) = inner.deque.pop_front() {
                self.not_full.notify_one();
                return Ok(item);
            }
            if self.not_empty.wait_until(&mut inner, deadline).timed_out() {
                // One last look: an item may have landed as the deadline hit.
                if inner.closed {
                    return Err(PopError::Closed);
                }
                return match inner.deque.pop_front() {
                    Some(item) => {
                        self.not_full.notify_one();
                        Ok(item)
                    }
                    None => Err(PopError::Timeout),
                };
            }
        }
    }

    /// Removes the front item if there is one, without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        let item = inner.deque.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Drops all queued items and wakes blocked producers.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.deque.clear();
        self.not_full.notify_all();
    }

    /// Clears the queue and releases every waiter. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.deque.clear();
        inner.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Closes the queue like [`close`](Self::close), but hands back the
    /// items that were still queued instead of dropping them.
    pub fn close_and_drain(&self) -> Vec<T> {
        let mut inner = self.inner.lock();
        let remaining = inner.deque.drain(..).collect();
        inner.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
        remaining
    }

    /// Wakes one waiting consumer without inserting anything, so it can
    /// re-check state kept outside the queue.
    pub fn flush(&self) {
        self.not_empty.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().deque.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner.lock().deque.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().deque.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone> BoundedQueue<T> {
    /// A copy of the item that the next pop would return.
    pub fn front(&self) -> Option<T> {
        self.inner.lock().deque.front().cloned()
    }

    /// A copy of the most recently appended item.
    pub fn back(&self) -> Option<T> {
        self.inner.lock().deque.back().cloned()
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BoundedQueue")
            .field("len", &inner.deque.len())
            .field("capacity", &self.capacity)
            .field("closed", &inner.closed)
            .finish()
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = BoundedQueue::new(4);
        queue.push_back(1).unwrap();
        queue.push_back(2).unwrap();
        queue.push_back(3).unwrap();

        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_front_jumps_the_line() {
        let queue = BoundedQueue::new(4);
        queue.push_back("bulk-1").unwrap();
        queue.push_back("bulk-2").unwrap();
        queue.push_front("urgent").unwrap();

        assert_eq!(queue.front(), Some("urgent"));
        assert_eq!(queue.back(), Some("bulk-2"));
        assert_eq!(queue.pop(), Some("urgent"));
        assert_eq!(queue.pop(), Some("bulk-1"));
        assert_eq!(queue.pop(), Some("bulk-2"));
    }

    #[test]
    fn test_queries() {
        let queue = BoundedQueue::new(2);
        assert_eq!(queue.capacity(), 2);
        assert!(queue.is_empty());
        assert!(!queue.is_full());

        queue.push_back(10).unwrap();
        queue.push_back(20).unwrap();
        assert_eq!(queue.len(), 2);
        assert!(queue.is_full());

        queue.clear();
        assert!(queue.is_empty());
        assert!(!queue.is_closed());
    }

    #[test]
    #[should_panic(expected = "queue capacity must be greater than zero")]
    fn test_zero_capacity_panics() {
        let _ = BoundedQueue::<u8>::new(0);
    }

    #[test]
    fn test_blocking_when_full() {
        let queue = Arc::new(BoundedQueue::new(2));
        let published = Arc::new(AtomicBool::new(false));

        queue.push_back(1).unwrap();
        queue.push_back(2).unwrap();

        let publisher = {
            let queue = queue.clone();
            let published = published.clone();
            thread::spawn(move || {
                queue.push_back(3).unwrap();
                published.store(true, Ordering::Release);
            })
        };

        thread::sleep(Duration::from_millis(200));
        assert!(!published.load(Ordering::Acquire));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop(), Some(1));
        publisher.join().unwrap();
        assert!(published.load(Ordering::Acquire));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let queue = Arc::new(BoundedQueue::new(1));

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop())
        };

        thread::sleep(Duration::from_millis(100));
        queue.push_back("wake").unwrap();
        assert_eq!(consumer.join().unwrap(), Some("wake"));
    }

    #[test]
    fn test_pop_timeout_on_empty_queue() {
        let queue = BoundedQueue::<u32>::new(1);
        let start = Instant::now();

        assert_eq!(
            queue.pop_timeout(Duration::from_millis(150)),
            Err(PopError::Timeout)
        );
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn test_flush_does_not_extend_timeout_or_yield_items() {
        let queue = Arc::new(BoundedQueue::<u32>::new(1));

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let result = queue.pop_timeout(Duration::from_millis(300));
                (result, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(50));
        queue.flush();

        let (result, elapsed) = consumer.join().unwrap();
        assert_eq!(result, Err(PopError::Timeout));
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn test_pop_timeout_receives_item() {
        let queue = Arc::new(BoundedQueue::new(1));

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                queue.push_back(42).unwrap();
            })
        };

        assert_eq!(queue.pop_timeout(Duration::from_secs(5)), Ok(42));
        producer.join().unwrap();
    }

    #[test]
    fn test_pop_timeout_with_unbounded_wait() {
        let queue = Arc::new(BoundedQueue::new(1));

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop_timeout(Duration::MAX))
        };

        thread::sleep(Duration::from_millis(50));
        queue.push_back(7).unwrap();
        assert_eq!(consumer.join().unwrap(), Ok(7));

        let closer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                queue.close();
            })
        };
        assert_eq!(queue.pop_timeout(Duration::MAX), Err(PopError::Closed));
        closer.join().unwrap();
    }

    #[test]
    fn test_close_releases_blocked_consumers() {
        let queue = Arc::new(BoundedQueue::<u32>::new(1));

        let untimed = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop())
        };
        let timed = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop_timeout(Duration::from_secs(30)))
        };

        thread::sleep(Duration::from_millis(100));
        let start = Instant::now();
        queue.close();

        assert_eq!(untimed.join().unwrap(), None);
        assert_eq!(timed.join().unwrap(), Err(PopError::Closed));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_close_releases_blocked_producers() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.push_back(1).unwrap();

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push_back(2))
        };

        thread::sleep(Duration::from_millis(100));
        queue.close();

        let err = producer.join().unwrap().unwrap_err();
        assert_eq!(err.into_inner(), 2);
    }

    #[test]
    fn test_close_is_idempotent_and_clears() {
        let queue = BoundedQueue::new(4);
        queue.push_back(1).unwrap();
        queue.push_back(2).unwrap();

        queue.close();
        assert!(queue.is_empty());
        assert!(queue.is_closed());
        queue.close();

        assert_eq!(queue.pop(), None);
        assert_eq!(queue.try_pop(), None);
        assert_eq!(queue.push_back(3), Err(PushError(3)));
        assert_eq!(queue.push_front(4), Err(PushError(4)));

        let err = queue.push_back(5).unwrap_err();
        assert_eq!(err.to_string(), "pushing onto a closed queue");
        assert_eq!(err.into_inner(), 5);
    }

    #[test]
    fn test_close_and_drain_returns_leftovers() {
        let queue = BoundedQueue::new(4);
        queue.push_back('a').unwrap();
        queue.push_back('b').unwrap();

        assert_eq!(queue.close_and_drain(), vec!['a', 'b']);
        assert!(queue.is_closed());
        assert!(queue.close_and_drain().is_empty());
    }

    #[test]
    fn test_multiple_producers_single_consumer() {
        let queue = Arc::new(BoundedQueue::new(4));
        let messages_per_thread = 50;
        let num_threads = 4;

        let producers: Vec<_> = (0..num_threads)
            .map(|thread_id| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..messages_per_thread {
                        queue.push_back((thread_id, i)).unwrap();
                    }
                })
            })
            .collect();

        let received = Arc::new(AtomicUsize::new(0));
        let consumer = {
            let queue = queue.clone();
            let received = received.clone();
            thread::spawn(move || {
                let mut last_seen = vec![None; num_threads];
                for _ in 0..num_threads * messages_per_thread {
                    let (thread_id, i) = queue
                        .pop_timeout(Duration::from_secs(5))
                        .expect("producer stalled");
                    // Per-producer order survives interleaving.
                    if let Some(prev) = last_seen[thread_id] {
                        assert!(i > prev);
                    }
                    last_seen[thread_id] = Some(i);
                    received.fetch_add(1, Ordering::Relaxed);
                }
            })
        };

        for producer in producers {
            producer.join().unwrap();
        }
        consumer.join().unwrap();
        assert_eq!(received.load(Ordering::Relaxed), 200);
        assert!(queue.is_empty());
    }
}
