//! Bounded blocking queue with a single consumer
//!
//! Non-blocking `enqueue` never waits: when the queue grows beyond capacity the
//! oldest item is handed to the drop callback. `blocking_enqueue` waits for
//! room instead. A stopped queue rejects new items (also through the drop
//! callback) until `start` is called again.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Callback receiving items the queue had to drop
pub type QueueDropCallback<T> = Box<dyn Fn(T) + Send + Sync>;

struct QueueState<T> {
    items: VecDeque<T>,
    accepting: bool,
}

/// Bounded multi-producer / single-consumer queue
pub struct SingleConsumerQueue<T> {
    state: Mutex<QueueState<T>>,
    /// Not-empty signal
    deq_cv: Condvar,
    /// Not-full signal
    enq_cv: Condvar,
    cap: usize,
    on_drop: Option<QueueDropCallback<T>>,
}

impl<T> SingleConsumerQueue<T> {
    /// Create a queue holding at most `cap` items (at least one)
    pub fn new(cap: usize, on_drop: Option<QueueDropCallback<T>>) -> Self {
        let cap = cap.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(cap + 1),
                accepting: true,
            }),
            deq_cv: Condvar::new(),
            enq_cv: Condvar::new(),
            cap,
            on_drop,
        }
    }

    /// Capacity
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Enqueue without waiting, evicting the oldest item on overflow
    ///
    /// Returns false if the queue is stopped (the item goes to the drop callback).
    pub fn enqueue(&self, item: T) -> bool {
        let mut state = self.state.lock();
        if !state.accepting {
            drop(state);
            self.dropped(item);
            return false;
        }

        state.items.push_back(item);
        let evicted = if state.items.len() > self.cap {
            state.items.pop_front()
        } else {
            None
        };
        drop(state);

        self.deq_cv.notify_one();
        if let Some(old) = evicted {
            self.dropped(old);
        }
        true
    }

    /// Enqueue, waiting for room if the queue is full
    ///
    /// Returns false if the queue is (or becomes) stopped.
    pub fn blocking_enqueue(&self, item: T) -> bool {
        let mut state = self.state.lock();
        while state.accepting && state.items.len() >= self.cap {
            self.enq_cv.wait(&mut state);
        }
        if !state.accepting {
            drop(state);
            self.dropped(item);
            return false;
        }

        state.items.push_back(item);
        drop(state);

        self.deq_cv.notify_one();
        true
    }

    /// Enqueue, waiting for room no later than `deadline`
    ///
    /// `Ok(true)` once queued, `Ok(false)` if the queue is (or becomes)
    /// stopped. On timeout the item is handed back untouched as `Err`, the
    /// drop callback is not told.
    pub fn blocking_enqueue_until(&self, item: T, deadline: Instant) -> Result<bool, T> {
        let mut state = self.state.lock();
        while state.accepting && state.items.len() >= self.cap {
            if self.enq_cv.wait_until(&mut state, deadline).timed_out()
                && state.accepting
                && state.items.len() >= self.cap
            {
                return Err(item);
            }
        }
        if !state.accepting {
            drop(state);
            self.dropped(item);
            return Ok(false);
        }

        state.items.push_back(item);
        drop(state);

        self.deq_cv.notify_one();
        Ok(true)
    }

    /// Remove the front item, waiting up to `timeout` for one
    pub fn dequeue(&self, timeout: Duration) -> Option<T> {
        let mut state = self.state.lock();
        if state.items.is_empty() && state.accepting {
            self.deq_cv
                .wait_while_for(&mut state, |s| s.accepting && s.items.is_empty(), timeout);
        }
        let item = state.items.pop_front()?;
        drop(state);

        self.enq_cv.notify_one();
        Some(item)
    }

    /// Remove the front item if there is one
    pub fn try_dequeue(&self) -> Option<T> {
        let item = self.state.lock().items.pop_front()?;
        self.enq_cv.notify_one();
        Some(item)
    }

    /// Inspect the front item
    pub fn peek<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.state.lock().items.front().map(f)
    }

    /// Stop accepting items and discard everything pending
    pub fn stop(&self) {
        let pending = {
            let mut state = self.state.lock();
            state.accepting = false;
            std::mem::take(&mut state.items)
        };
        self.wake_all();
        // Discarded, not dropped-by-policy: the drop callback is not told.
        drop(pending);
    }

    /// Discard everything pending, keep accepting
    pub fn clear(&self) {
        let pending = std::mem::take(&mut self.state.lock().items);
        self.wake_all();
        drop(pending);
    }

    /// Accept items again
    pub fn start(&self) {
        self.state.lock().accepting = true;
    }

    /// Whether the queue accepts items
    pub fn started(&self) -> bool {
        self.state.lock().accepting
    }

    /// Number of pending items
    pub fn size(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    fn wake_all(&self) {
        self.enq_cv.notify_all();
        self.deq_cv.notify_all();
    }

    fn dropped(&self, item: T) {
        if let Some(on_drop) = &self.on_drop {
            on_drop(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn counting_queue(cap: usize) -> (Arc<SingleConsumerQueue<u32>>, Arc<AtomicUsize>) {
        let drops = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&drops);
        let queue = SingleConsumerQueue::new(
            cap,
            Some(Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );
        (Arc::new(queue), drops)
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let (queue, drops) = counting_queue(3);

        for i in 0..5 {
            assert!(queue.enqueue(i));
        }

        assert_eq!(drops.load(Ordering::SeqCst), 2);
        assert_eq!(queue.size(), 3);
        assert_eq!(queue.try_dequeue(), Some(2));
        assert_eq!(queue.try_dequeue(), Some(3));
        assert_eq!(queue.try_dequeue(), Some(4));
        assert_eq!(queue.try_dequeue(), None);
    }

    #[test]
    fn test_stopped_queue_rejects() {
        let (queue, drops) = counting_queue(3);
        queue.enqueue(1);
        queue.stop();

        assert!(queue.is_empty());
        assert!(!queue.enqueue(2));
        assert!(!queue.blocking_enqueue(3));
        assert_eq!(drops.load(Ordering::SeqCst), 2);

        queue.start();
        assert!(queue.enqueue(4));
        assert_eq!(queue.peek(|v| *v), Some(4));
    }

    #[test]
    fn test_blocking_enqueue_waits_for_room() {
        let (queue, drops) = counting_queue(2);
        queue.enqueue(1);
        queue.enqueue(2);

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.blocking_enqueue(3))
        };

        thread::sleep(Duration::from_millis(30));
        assert_eq!(queue.size(), 2);

        assert_eq!(queue.dequeue(Duration::from_millis(100)), Some(1));
        assert!(producer.join().unwrap());
        assert_eq!(queue.size(), 2);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stop_releases_blocked_producer() {
        let (queue, drops) = counting_queue(1);
        queue.enqueue(1);

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.blocking_enqueue(2))
        };

        thread::sleep(Duration::from_millis(30));
        queue.stop();

        assert!(!producer.join().unwrap());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_blocking_enqueue_until_gives_up_at_deadline() {
        let (queue, drops) = counting_queue(1);
        queue.enqueue(1);

        let started = Instant::now();
        let deadline = started + Duration::from_millis(50);
        assert_eq!(queue.blocking_enqueue_until(2, deadline), Err(2));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        assert_eq!(queue.size(), 1);

        queue.try_dequeue();
        let deadline = Instant::now() + Duration::from_millis(50);
        assert_eq!(queue.blocking_enqueue_until(3, deadline), Ok(true));
        assert_eq!(queue.peek(|v| *v), Some(3));
    }

    #[test]
    fn test_dequeue_times_out() {
        let (queue, _) = counting_queue(1);
        assert_eq!(queue.dequeue(Duration::from_millis(20)), None);
    }
}
