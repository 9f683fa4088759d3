//! Job queue - thread-safe FIFO with bounded blocking dequeue.
//!
//! One queue per team. Enqueue never blocks; dequeue either returns
//! immediately or waits up to a caller-supplied bound, waking as soon as
//! a job is enqueued.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// FIFO queue drained by the workers of one team.
pub struct JobQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
}

impl<T> JobQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Append to the tail and wake one waiting worker.
    pub fn enqueue(&self, item: T) {
        self.items.lock().push_back(item);
        self.available.notify_one();
    }

    /// Pop the head without blocking.
    pub fn dequeue(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Pop the head, waiting up to `wait` for one to arrive.
    ///
    /// Returns `None` on timeout or when woken by [`JobQueue::wake_all`]
    /// with nothing queued.
    pub fn dequeue_timeout(&self, wait: Duration) -> Option<T> {
        let deadline = Instant::now() + wait;
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            if self.available.wait_until(&mut items, deadline).timed_out() {
                return items.pop_front();
            }
            // Woken without an item (wake_all or a racing worker took it).
            if items.is_empty() {
                return None;
            }
        }
    }

    /// Wake every waiting worker, e.g. so they observe a shutdown flag.
    pub fn wake_all(&self) {
        self.available.notify_all();
    }

    /// Remove and return everything queued.
    pub fn drain(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl<T> Default for JobQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JobQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_dequeue_empty_returns_none() {
        let queue: JobQueue<u32> = JobQueue::new();
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_fifo_order() {
        let queue = JobQueue::new();
        queue.enqueue(1);
        queue.enqueue(2);
        queue.enqueue(3);
        assert_eq!(queue.dequeue(), Some(1));
        assert_eq!(queue.dequeue(), Some(2));
        assert_eq!(queue.dequeue(), Some(3));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_dequeue_timeout_expires() {
        let queue: JobQueue<u32> = JobQueue::new();
        let started = Instant::now();
        assert!(queue.dequeue_timeout(Duration::from_millis(30)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_dequeue_timeout_wakes_on_enqueue() {
        let queue = Arc::new(JobQueue::new());
        let producer = queue.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.enqueue(7u32);
        });

        let started = Instant::now();
        let item = queue.dequeue_timeout(Duration::from_secs(5));
        assert_eq!(item, Some(7));
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_wake_all_releases_waiters() {
        let queue: Arc<JobQueue<u32>> = Arc::new(JobQueue::new());
        let waiter = queue.clone();
        let handle = thread::spawn(move || waiter.dequeue_timeout(Duration::from_secs(10)));

        thread::sleep(Duration::from_millis(20));
        queue.wake_all();
        assert_eq!(handle.join().unwrap(), None);
    }

    #[test]
    fn test_drain_empties_queue() {
        let queue = JobQueue::new();
        queue.enqueue("a");
        queue.enqueue("b");
        assert_eq!(queue.drain(), vec!["a", "b"]);
        assert_eq!(queue.len(), 0);
    }

    proptest! {
        #[test]
        fn prop_preserves_enqueue_order(items in proptest::collection::vec(any::<u16>(), 0..64)) {
            let queue = JobQueue::new();
            for item in &items {
                queue.enqueue(*item);
            }
            let drained: Vec<u16> = std::iter::from_fn(|| queue.dequeue()).collect();
            prop_assert_eq!(drained, items);
        }
    }
}
