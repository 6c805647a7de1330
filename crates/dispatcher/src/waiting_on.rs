//! Cross-thread wait/signal cell that survives its waiter
//!
//! A [`WaitingOn`] owns the shared state; background threads get an
//! [`InThread`] handle holding only a weak reference. When the waiter has
//! already returned (timeout) and gone out of scope, a late `signal` from the
//! background thread simply does nothing.
//!
//! When the last clone of an [`InThread`] handle is dropped without having
//! signalled, the state is invalidated and every waiter is woken, so
//! `wait_until` never blocks past the signalling side's death.
//!
//! ```ignore
//! let invoked = WaitingOn::new(false);
//! let signal = invoked.in_thread();
//! std::thread::spawn(move || signal.signal(true));
//! invoked.wait_until(Duration::from_secs(1), |done| *done);
//! ```

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

struct Slot<T> {
    value: T,
    valid: bool,
}

struct WaitState<T> {
    slot: Mutex<Slot<T>>,
    cv: Condvar,
}

impl<T> WaitState<T> {
    fn invalidate(&self) {
        let mut slot = self.slot.lock();
        slot.valid = false;
        drop(slot);
        self.cv.notify_all();
    }
}

/// Waiting side: owns the shared state
pub struct WaitingOn<T> {
    state: Arc<WaitState<T>>,
}

impl<T> WaitingOn<T> {
    /// Create the shared cell with an initial value
    pub fn new(value: T) -> Self {
        Self {
            state: Arc::new(WaitState {
                slot: Mutex::new(Slot { value, valid: true }),
                cv: Condvar::new(),
            }),
        }
    }

    /// Handle for the signalling thread
    ///
    /// All clones of the returned handle share one destruction guard.
    pub fn in_thread(&self) -> InThread<T> {
        let weak = Arc::downgrade(&self.state);
        InThread {
            state: weak.clone(),
            _guard: Arc::new(InvalidateGuard { state: weak }),
        }
    }

    /// Lock and access the current value
    pub fn lock(&self) -> ValueGuard<'_, T> {
        ValueGuard {
            slot: self.state.slot.lock(),
        }
    }

    /// Whether no signalling handle has been dropped unsignalled
    pub fn is_valid(&self) -> bool {
        self.state.slot.lock().valid
    }

    /// Set the value and wake one waiter
    pub fn signal(&self, value: T) {
        self.state.slot.lock().value = value;
        self.state.cv.notify_one();
    }

    /// Block until `predicate` holds, the state is invalidated, or `timeout` elapses
    ///
    /// Returns the final value of `predicate`.
    pub fn wait_until<P>(&self, timeout: Duration, mut predicate: P) -> bool
    where
        P: FnMut(&T) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut slot = self.state.slot.lock();
        loop {
            if predicate(&slot.value) {
                return true;
            }
            if !slot.valid {
                return false;
            }
            if self.state.cv.wait_until(&mut slot, deadline).timed_out() {
                return predicate(&slot.value);
            }
        }
    }
}

impl<T: Clone> WaitingOn<T> {
    /// Copy of the current value
    pub fn get(&self) -> T {
        self.state.slot.lock().value.clone()
    }
}

/// Locked access to the value of a [`WaitingOn`]
pub struct ValueGuard<'a, T> {
    slot: MutexGuard<'a, Slot<T>>,
}

impl<T> std::ops::Deref for ValueGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.slot.value
    }
}

impl<T> std::ops::DerefMut for ValueGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.slot.value
    }
}

struct InvalidateGuard<T> {
    state: Weak<WaitState<T>>,
}

impl<T> Drop for InvalidateGuard<T> {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.invalidate();
        }
    }
}

/// Signalling side: weak reference plus shared destruction guard
pub struct InThread<T> {
    state: Weak<WaitState<T>>,
    _guard: Arc<InvalidateGuard<T>>,
}

impl<T> Clone for InThread<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            _guard: Arc::clone(&self._guard),
        }
    }
}

impl<T> InThread<T> {
    /// Set the value and wake one waiter; no-op once the waiter is gone
    pub fn signal(&self, value: T) {
        if let Some(state) = self.state.upgrade() {
            state.slot.lock().value = value;
            state.cv.notify_one();
        }
    }

    /// Mutate the value under the lock and wake one waiter
    pub fn signal_with<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        if let Some(state) = self.state.upgrade() {
            f(&mut state.slot.lock().value);
            state.cv.notify_one();
        }
    }

    /// Wake one waiter without changing the value
    pub fn notify(&self) {
        if let Some(state) = self.state.upgrade() {
            state.cv.notify_one();
        }
    }

    /// Invalidate the state and wake all waiters
    pub fn invalidate(&self) {
        if let Some(state) = self.state.upgrade() {
            state.invalidate();
        }
    }

    /// Whether the waiting side still exists
    pub fn is_alive(&self) -> bool {
        self.state.strong_count() > 0
    }
}
