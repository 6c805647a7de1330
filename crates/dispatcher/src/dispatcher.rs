//! Dispatcher - single worker thread draining a bounded action queue
//!
//! A dispatcher starts out started after construction. `stop()` discards
//! everything pending and waits for the action in flight; `start()` opens it
//! again. Dropping the dispatcher stops it and joins the worker, or detaches
//! when the drop happens on the worker itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, instrument, warn};

use contracts::{invoke_guarded, CallbackResult, DispatcherConfig};

use crate::error::DispatcherError;
use crate::metrics::{DispatcherMetrics, MetricsSnapshot};
use crate::queue::SingleConsumerQueue;
use crate::waiting_on::WaitingOn;

/// Deferred unit of work run on the dispatcher thread
pub type Action = Box<dyn FnOnce(&CancellableTimer) -> CallbackResult + Send + 'static>;

/// Receives actions the dispatcher could not queue
pub type DropCallback = Arc<dyn Fn(Action) + Send + Sync>;

/// Started/stopped flag shared with every [`CancellableTimer`]
struct RunState {
    was_stopped: AtomicBool,
    lock: Mutex<()>,
    cv: Condvar,
}

impl RunState {
    fn was_stopped(&self) -> bool {
        self.was_stopped.load(Ordering::Acquire)
    }

    /// Set the flag, returning the previous value
    fn swap_stopped(&self, stopped: bool) -> bool {
        let guard = self.lock.lock();
        let previous = self.was_stopped.swap(stopped, Ordering::AcqRel);
        drop(guard);
        self.cv.notify_all();
        previous
    }

    fn notify_all(&self) {
        let _guard = self.lock.lock();
        self.cv.notify_all();
    }
}

/// Sleep helper handed to every action
///
/// Lets long-running actions bail out as soon as the dispatcher stops.
pub struct CancellableTimer {
    state: Arc<RunState>,
}

impl CancellableTimer {
    /// Whether the owning dispatcher has been stopped
    pub fn was_stopped(&self) -> bool {
        self.state.was_stopped()
    }

    /// Sleep for `duration` unless the dispatcher stops first
    ///
    /// Returns false if the dispatcher was stopped, true otherwise.
    pub fn try_sleep(&self, duration: Duration) -> bool {
        let mut guard = self.state.lock.lock();
        if self.state.was_stopped() {
            return false;
        }
        self.state
            .cv
            .wait_while_for(&mut guard, |_| !self.state.was_stopped(), duration);
        !self.state.was_stopped()
    }
}

struct Shared {
    name: String,
    queue: SingleConsumerQueue<Action>,
    run: Arc<RunState>,
    /// Cleared only when the owning `Dispatcher` is dropped
    alive: AtomicBool,
    /// Held while an action executes
    dispatch_lock: Mutex<()>,
    metrics: Arc<DispatcherMetrics>,
    poll_timeout: Duration,
}

impl Shared {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Wait up to the poll timeout for "started"
    fn wait_for_start(&self) -> bool {
        let mut guard = self.run.lock.lock();
        self.run.cv.wait_while_for(
            &mut guard,
            |_| self.run.was_stopped() && self.is_alive(),
            self.poll_timeout,
        );
        !self.run.was_stopped() && self.is_alive()
    }
}

/// Active-object dispatcher
pub struct Dispatcher {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
    flush_timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher with the given queue capacity and drop callback
    pub fn new(capacity: usize, on_drop: Option<DropCallback>) -> Result<Self, DispatcherError> {
        let config = DispatcherConfig {
            queue_capacity: capacity,
            ..Default::default()
        };
        Self::with_config("dispatcher", &config, on_drop)
    }

    /// Create a named dispatcher from configuration
    pub fn with_config(
        name: impl Into<String>,
        config: &DispatcherConfig,
        on_drop: Option<DropCallback>,
    ) -> Result<Self, DispatcherError> {
        let name = name.into();
        let metrics = Arc::new(DispatcherMetrics::new());

        let drop_metrics = Arc::clone(&metrics);
        let drop_name = name.clone();
        let queue = SingleConsumerQueue::new(
            config.queue_capacity,
            Some(Box::new(move |action: Action| {
                drop_metrics.inc_dropped_count();
                counter!("depthcore_dispatcher_dropped_total", "dispatcher" => drop_name.clone())
                    .increment(1);
                warn!(dispatcher = %drop_name, "Action dropped");
                if let Some(on_drop) = &on_drop {
                    on_drop(action);
                }
            })),
        );

        let shared = Arc::new(Shared {
            name: name.clone(),
            queue,
            run: Arc::new(RunState {
                was_stopped: AtomicBool::new(false),
                lock: Mutex::new(()),
                cv: Condvar::new(),
            }),
            alive: AtomicBool::new(true),
            dispatch_lock: Mutex::new(()),
            metrics,
            poll_timeout: Duration::from_millis(config.poll_timeout_ms.max(1)),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(worker_shared))
            .map_err(|e| DispatcherError::spawn(&name, e))?;
        let worker_id = worker.thread().id();

        debug!(
            dispatcher = %name,
            capacity = config.queue_capacity,
            "Dispatcher created"
        );

        Ok(Self {
            shared,
            worker: Some(worker),
            worker_id,
            flush_timeout: Duration::from_millis(config.flush_timeout_ms),
        })
    }

    /// Dispatcher name (also the worker thread name)
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Queue capacity
    pub fn capacity(&self) -> usize {
        self.shared.queue.capacity()
    }

    /// Configured default flush timeout
    pub fn flush_timeout(&self) -> Duration {
        self.flush_timeout
    }

    /// Get current metrics
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Whether no action is pending
    pub fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }

    /// Whether the dispatcher is stopped
    pub fn was_stopped(&self) -> bool {
        self.shared.run.was_stopped()
    }

    fn on_worker_thread(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    /// Queue an action
    ///
    /// Non-blocking: a full queue drops its oldest action to make room.
    /// Blocking: waits until there is room. Either way, an action the queue
    /// rejects (e.g. after `stop`) goes to the drop callback.
    ///
    /// Returns whether the action was queued.
    pub fn invoke<F>(&self, action: F, blocking: bool) -> bool
    where
        F: FnOnce(&CancellableTimer) -> CallbackResult + Send + 'static,
    {
        self.invoke_boxed(Box::new(action), blocking)
    }

    /// Queue an already boxed action
    pub fn invoke_boxed(&self, action: Action, blocking: bool) -> bool {
        let queue = &self.shared.queue;
        let accepted = if blocking {
            queue.blocking_enqueue(action)
        } else {
            queue.enqueue(action)
        };

        self.record_enqueue(accepted);
        accepted
    }

    fn record_enqueue(&self, accepted: bool) {
        if accepted {
            self.shared.metrics.inc_enqueued_count();
            counter!("depthcore_dispatcher_enqueued_total", "dispatcher" => self.shared.name.clone())
                .increment(1);
        }
        self.shared.metrics.set_queue_len(self.shared.queue.size());
    }

    /// Queue an action and block until it ran or `exit_condition` holds
    ///
    /// `exit_condition` is checked on every poll interval. Returns true if the
    /// action completed. Called from the worker thread itself, the action runs
    /// inline.
    pub fn invoke_and_wait<F, C>(&self, action: F, mut exit_condition: C, blocking: bool) -> bool
    where
        F: FnOnce(&CancellableTimer) -> CallbackResult + Send + 'static,
        C: FnMut() -> bool,
    {
        if self.on_worker_thread() {
            let timer = CancellableTimer {
                state: Arc::clone(&self.shared.run),
            };
            return match invoke_guarded(|| action(&timer)) {
                Ok(()) => true,
                Err(e) => {
                    error!(dispatcher = %self.shared.name, error = %e, "Inline action failed");
                    false
                }
            };
        }

        let done = WaitingOn::new(false);
        let signal = done.in_thread();
        self.invoke(
            move |timer| {
                let result = action(timer);
                signal.signal(true);
                result
            },
            blocking,
        );

        loop {
            if done.wait_until(self.shared.poll_timeout, |ran| *ran) {
                return true;
            }
            if !done.is_valid() || exit_condition() {
                return false;
            }
        }
    }

    /// Open the queue and let the worker dispatch again
    #[instrument(name = "dispatcher_start", skip(self), fields(dispatcher = %self.shared.name))]
    pub fn start(&self) {
        self.shared.queue.start();
        if self.shared.run.swap_stopped(false) {
            debug!("Dispatcher started");
        }
    }

    /// Discard pending actions and wait for the one in flight
    ///
    /// Safe to call from inside an action: the worker does not wait on itself.
    #[instrument(name = "dispatcher_stop", skip(self), fields(dispatcher = %self.shared.name))]
    pub fn stop(&self) {
        let already_stopped = self.shared.run.swap_stopped(true);
        self.shared.queue.stop();

        if !self.on_worker_thread() {
            let _in_flight = self.shared.dispatch_lock.lock();
        }
        self.shared.metrics.set_queue_len(0);

        if !already_stopped {
            debug!("Dispatcher stopped");
        }
    }

    /// Wait until every action queued before this call has run
    ///
    /// Returns true once they ran (or immediately when stopped), false if the
    /// timeout elapsed or the dispatcher stopped meanwhile.
    #[instrument(name = "dispatcher_flush", skip(self), fields(dispatcher = %self.shared.name))]
    pub fn flush(&self, timeout: Duration) -> bool {
        if self.shared.run.was_stopped() {
            return true;
        }
        if self.on_worker_thread() {
            warn!("flush called from the dispatcher thread");
            return false;
        }

        let started = Instant::now();
        let deadline = started + timeout;
        let invoked = WaitingOn::new(false);
        let signal = invoked.in_thread();
        let marker: Action = Box::new(move |_| {
            signal.signal(true);
            Ok(())
        });

        // Waits for room, so the marker never evicts an action queued before it
        let flushed = match self.shared.queue.blocking_enqueue_until(marker, deadline) {
            Ok(accepted) => {
                self.record_enqueue(accepted);
                let remaining = deadline.saturating_duration_since(Instant::now());
                invoked.wait_until(remaining, |ran| *ran || self.shared.run.was_stopped());
                invoked.get()
            }
            Err(_marker) => false,
        };

        histogram!("depthcore_dispatcher_flush_ms", "dispatcher" => self.shared.name.clone())
            .record(started.elapsed().as_secs_f64() * 1000.0);
        if !flushed {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                stopped = self.shared.run.was_stopped(),
                "Dispatcher flush did not complete"
            );
        }
        flushed
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shared.alive.store(false, Ordering::Release);
        self.stop();
        self.shared.run.notify_all();

        if let Some(worker) = self.worker.take() {
            if self.on_worker_thread() {
                debug!(dispatcher = %self.shared.name, "Dropped on worker thread, detaching");
            } else if worker.join().is_err() {
                error!(dispatcher = %self.shared.name, "Dispatcher worker panicked");
            }
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    let timer = CancellableTimer {
        state: Arc::clone(&shared.run),
    };
    debug!(dispatcher = %shared.name, "Dispatcher worker started");

    while shared.is_alive() {
        if !shared.wait_for_start() {
            continue;
        }
        let Some(action) = shared.queue.dequeue(shared.poll_timeout) else {
            continue;
        };
        shared.metrics.set_queue_len(shared.queue.size());

        let _dispatching = shared.dispatch_lock.lock();
        if shared.run.was_stopped() {
            // Stopped between dequeue and dispatch: discard
            drop(action);
            continue;
        }

        match invoke_guarded(|| action(&timer)) {
            Ok(()) => {
                shared.metrics.inc_executed_count();
                counter!("depthcore_dispatcher_executed_total", "dispatcher" => shared.name.clone())
                    .increment(1);
            }
            Err(e) => {
                shared.metrics.inc_failure_count();
                counter!("depthcore_dispatcher_failed_total", "dispatcher" => shared.name.clone())
                    .increment(1);
                error!(dispatcher = %shared.name, error = %e, "Dispatched action failed");
            }
        }
    }

    debug!(dispatcher = %shared.name, "Dispatcher worker stopped");
}
