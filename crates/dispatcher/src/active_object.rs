//! Active object and watchdog built on a one-slot dispatcher

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, instrument};

use contracts::{CallbackResult, DispatcherConfig};

use crate::dispatcher::{CancellableTimer, Dispatcher};
use crate::error::DispatcherError;

/// Operation repeated by an [`ActiveObject`]
pub type Operation = Arc<dyn Fn(&CancellableTimer) -> CallbackResult + Send + Sync>;

struct ActiveInner {
    name: String,
    operation: Operation,
    dispatcher: Dispatcher,
    stopped: AtomicBool,
}

/// Runs an operation over and over on its own thread while active
///
/// Each run gets the dispatcher's [`CancellableTimer`], so an operation that
/// sleeps between iterations returns promptly on `stop`.
pub struct ActiveObject {
    inner: Arc<ActiveInner>,
}

impl ActiveObject {
    /// Create an inactive object around `operation`
    pub fn new<F>(name: impl Into<String>, operation: F) -> Result<Self, DispatcherError>
    where
        F: Fn(&CancellableTimer) -> CallbackResult + Send + Sync + 'static,
    {
        let name = name.into();
        let config = DispatcherConfig {
            queue_capacity: 1,
            ..Default::default()
        };
        let dispatcher = Dispatcher::with_config(name.clone(), &config, None)?;

        Ok(Self {
            inner: Arc::new(ActiveInner {
                name,
                operation: Arc::new(operation),
                dispatcher,
                stopped: AtomicBool::new(true),
            }),
        })
    }

    /// Begin running the operation
    #[instrument(name = "active_object_start", skip(self), fields(name = %self.inner.name))]
    pub fn start(&self) {
        if self.inner.stopped.swap(false, Ordering::AcqRel) {
            self.inner.dispatcher.start();
            schedule(&self.inner);
            debug!("Active object started");
        }
    }

    /// Stop after the current run completes
    #[instrument(name = "active_object_stop", skip(self), fields(name = %self.inner.name))]
    pub fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::AcqRel) {
            self.inner.dispatcher.stop();
            debug!("Active object stopped");
        }
    }

    /// Whether the operation is being repeated
    pub fn is_active(&self) -> bool {
        !self.inner.stopped.load(Ordering::Acquire)
    }
}

impl Drop for ActiveObject {
    fn drop(&mut self) {
        self.stop();
    }
}

fn schedule(inner: &Arc<ActiveInner>) {
    let weak: Weak<ActiveInner> = Arc::downgrade(inner);
    inner.dispatcher.invoke(
        move |timer| {
            let Some(inner) = weak.upgrade() else {
                return Ok(());
            };
            let result = (inner.operation)(timer);
            if !inner.stopped.load(Ordering::Acquire) {
                schedule(&inner);
            }
            result
        },
        false,
    );
}

struct WatchdogState {
    timeout: Mutex<Duration>,
    kicked: AtomicBool,
    running: AtomicBool,
}

/// Calls an operation when not kicked within the timeout
pub struct Watchdog {
    state: Arc<WatchdogState>,
    watcher: ActiveObject,
}

impl Watchdog {
    /// Create a stopped watchdog
    pub fn new<F>(operation: F, timeout: Duration) -> Result<Self, DispatcherError>
    where
        F: Fn() -> CallbackResult + Send + Sync + 'static,
    {
        let state = Arc::new(WatchdogState {
            timeout: Mutex::new(timeout),
            kicked: AtomicBool::new(false),
            running: AtomicBool::new(false),
        });

        let watched = Arc::clone(&state);
        let watcher = ActiveObject::new("watchdog", move |timer: &CancellableTimer| {
            let timeout = *watched.timeout.lock();
            if !timer.try_sleep(timeout) {
                return Ok(());
            }
            if watched.kicked.swap(false, Ordering::AcqRel) {
                Ok(())
            } else {
                operation()
            }
        })?;

        Ok(Self { state, watcher })
    }

    /// Start watching
    pub fn start(&self) {
        self.watcher.start();
        self.state.running.store(true, Ordering::Release);
    }

    /// Stop watching
    pub fn stop(&self) {
        self.state.running.store(false, Ordering::Release);
        self.watcher.stop();
    }

    /// Whether the watchdog is running
    pub fn running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    /// Change the timeout, effective from the next period
    pub fn set_timeout(&self, timeout: Duration) {
        *self.state.timeout.lock() = timeout;
    }

    /// Postpone the operation by one period
    pub fn kick(&self) {
        self.state.kicked.store(true, Ordering::Release);
    }
}
