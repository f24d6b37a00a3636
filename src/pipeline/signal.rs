use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Lock a mutex, recovering the data if another thread panicked holding it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One-shot completion signal.
///
/// Clones observe the same latch; `set` is idempotent and wakes every waiter.
#[derive(Clone, Default)]
pub struct Latch {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the latch; returns false if it had already fired
    pub fn set(&self) -> bool {
        let (flag, cond) = &*self.inner;
        let mut fired = lock(flag);
        if *fired {
            return false;
        }
        *fired = true;
        cond.notify_all();
        true
    }

    pub fn is_set(&self) -> bool {
        *lock(&self.inner.0)
    }

    pub fn wait(&self) {
        let (flag, cond) = &*self.inner;
        let guard = lock(flag);
        let _fired = cond
            .wait_while(guard, |fired| !*fired)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Waits up to `timeout`; true if the latch fired
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cond) = &*self.inner;
        let guard = lock(flag);
        let (fired, _) = cond
            .wait_timeout_while(guard, timeout, |fired| !*fired)
            .unwrap_or_else(PoisonError::into_inner);
        *fired
    }
}
