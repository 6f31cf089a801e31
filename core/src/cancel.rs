//! Cancellation and deadlines for a blocking orchestration run.
//!
//! A `CancelToken` is shared between the thread running the retry loop and
//! whoever may want to stop it. Clones share the cancelled flag; a deadline is
//! attached per clone with [`CancelToken::with_deadline`].

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Why a run stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Cancelled,
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Cancelled => write!(f, "cancelled by caller"),
            CancelReason::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a deadline. An earlier existing deadline is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock();
        *cancelled = true;
        self.inner.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// `Err` once the token is cancelled or its deadline has passed.
    pub fn check(&self) -> Result<(), CancelReason> {
        if self.is_cancelled() {
            return Err(CancelReason::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(CancelReason::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Time left before the deadline, `None` if there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Block for `duration` unless cancelled first.
    ///
    /// Returns `DeadlineExceeded` straight away when the deadline would pass
    /// before the sleep ends, since nothing useful can follow it.
    pub fn sleep(&self, duration: Duration) -> Result<(), CancelReason> {
        let wake_at = Instant::now() + duration;
        if matches!(self.deadline, Some(deadline) if deadline <= wake_at) {
            self.check()?;
            return Err(CancelReason::DeadlineExceeded);
        }

        let mut cancelled = self.inner.cancelled.lock();
        loop {
            if *cancelled {
                return Err(CancelReason::Cancelled);
            }
            if Instant::now() >= wake_at {
                return Ok(());
            }
            // Spurious wakeups land back at the top of the loop.
            self.inner.wake.wait_until(&mut cancelled, wake_at);
        }
    }

    /// Run `work` on a helper thread and wait for it, giving up as soon as the
    /// token is cancelled or its deadline passes.
    ///
    /// An abandoned helper keeps running until `work` returns; its result is
    /// dropped. If no thread can be spawned, `work` runs on the caller's thread.
    pub fn run<T, F>(&self, work: F) -> Result<T, CancelReason>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.check()?;

        let handoff = Arc::new(Handoff {
            work: Mutex::new(Some(work)),
            value: Mutex::new(None),
        });
        let worker = Arc::clone(&handoff);
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("cancellable-work".to_string())
            .spawn(move || {
                let Some(work) = worker.work.lock().take() else {
                    return;
                };
                let value = work();
                *worker.value.lock() = Some(value);
                // Notify under the flag lock so the waiter cannot miss it.
                let _cancelled = inner.cancelled.lock();
                inner.wake.notify_all();
            });

        if spawned.is_err() {
            let work = handoff.work.lock().take();
            // The closure never ran, so the work is still in the slot.
            let value = work.map(|work| work()).ok_or(CancelReason::Cancelled)?;
            self.check()?;
            return Ok(value);
        }

        let mut cancelled = self.inner.cancelled.lock();
        loop {
            if *cancelled {
                return Err(CancelReason::Cancelled);
            }
            if matches!(self.deadline, Some(deadline) if Instant::now() >= deadline) {
                return Err(CancelReason::DeadlineExceeded);
            }
            if let Some(value) = handoff.value.lock().take() {
                return Ok(value);
            }
            match self.deadline {
                Some(deadline) => {
                    self.inner.wake.wait_until(&mut cancelled, deadline);
                }
                None => self.inner.wake.wait(&mut cancelled),
            }
        }
    }

    /// A guard that cancels this token when dropped, unless disarmed.
    pub fn drop_guard(&self) -> DropGuard {
        DropGuard {
            token: Some(self.clone()),
        }
    }
}

struct Handoff<F, T> {
    work: Mutex<Option<F>>,
    value: Mutex<Option<T>>,
}

/// Cancels its token on drop. Used to stop a blocking run when the async task
/// that spawned it goes away.
#[derive(Debug)]
pub struct DropGuard {
    token: Option<CancelToken>,
}

impl DropGuard {
    pub fn disarm(mut self) -> CancelToken {
        // Always `Some` until drop.
        self.token.take().unwrap_or_default()
    }
}

impl Drop for DropGuard {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }
}
