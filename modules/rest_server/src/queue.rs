//! Blocking FIFO hand-off between the listener and the worker pool

use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

struct QueueState<T> {
    items: VecDeque<T>,
    shutdown: bool,
}

pub struct RequestQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> Default for RequestQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RequestQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item and wake one waiting consumer.
    pub fn enqueue(&self, item: T) {
        self.lock().items.push_back(item);
        self.available.notify_one();
    }

    /// Take the oldest item, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout, or straight away once the queue has been
    /// shut down and drained. Items queued before shutdown are still handed
    /// out.
    pub fn dequeue(&self, timeout: Duration) -> Option<T> {
        let state = self.lock();
        let (mut state, _) = self
            .available
            .wait_timeout_while(state, timeout, |s| s.items.is_empty() && !s.shutdown)
            .unwrap_or_else(PoisonError::into_inner);
        state.items.pop_front()
    }

    /// Mark the queue shut down and wake every waiter.
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.available.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::Arc,
        thread,
        time::Instant,
    };

    #[test]
    fn test_fifo_order() {
        let queue = RequestQueue::new();
        queue.enqueue(1);
        queue.enqueue(2);
        queue.enqueue(3);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dequeue(Duration::ZERO), Some(1));
        assert_eq!(queue.dequeue(Duration::ZERO), Some(2));
        assert_eq!(queue.dequeue(Duration::ZERO), Some(3));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_dequeue_times_out() {
        let queue: RequestQueue<u32> = RequestQueue::new();
        let started = Instant::now();
        assert_eq!(queue.dequeue(Duration::from_millis(100)), None);
        assert!(started.elapsed() >= Duration::from_millis(90));
    }

    #[test]
    fn test_drains_after_shutdown() {
        let queue = RequestQueue::new();
        queue.enqueue("a");
        queue.enqueue("b");
        queue.shutdown();
        assert!(queue.is_shutdown());

        assert_eq!(queue.dequeue(Duration::from_secs(5)), Some("a"));
        assert_eq!(queue.dequeue(Duration::from_secs(5)), Some("b"));

        // Drained and shut down: returns at once rather than waiting
        let started = Instant::now();
        assert_eq!(queue.dequeue(Duration::from_secs(5)), None);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_shutdown_wakes_waiters() {
        let queue: Arc<RequestQueue<u32>> = Arc::new(RequestQueue::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || queue.dequeue(Duration::from_secs(30)))
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        queue.shutdown();
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), None);
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_enqueue_wakes_consumer() {
        let queue: Arc<RequestQueue<u32>> = Arc::new(RequestQueue::new());
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.dequeue(Duration::from_secs(30)))
        };
        thread::sleep(Duration::from_millis(50));
        queue.enqueue(42);
        assert_eq!(consumer.join().unwrap(), Some(42));
    }
}
