//! Cancellation and deadline propagation.
//!
//! Every statement-level call takes a [`Context`]. A context carries an optional
//! deadline and an optional cancel signal; cloning is cheap and clones observe the
//! same signal. Derived contexts never extend their parent's lifetime: a derived
//! deadline is the earlier of the two, and cancelling a parent cancels every
//! context derived from it with [`Context::with_cancel`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

/// Why a context stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextError {
    /// The context was cancelled through a [`CancelHandle`].
    Cancelled,
    /// The context deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextError::Cancelled => write!(f, "context cancelled"),
            ContextError::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

impl std::error::Error for ContextError {}

struct CancelSignal {
    cancelled: Arc<AtomicBool>,
    children: Mutex<Vec<Weak<CancelSignal>>>,
    wake: Condvar,
}

impl CancelSignal {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            children: Mutex::new(Vec::new()),
            wake: Condvar::new(),
        })
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        let children = {
            let mut guard = self.children.lock().unwrap_or_else(PoisonError::into_inner);
            self.cancelled.store(true, Ordering::SeqCst);
            self.wake.notify_all();
            std::mem::take(&mut *guard)
        };
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }

    fn adopt(&self, child: &Arc<CancelSignal>) {
        let mut guard = self.children.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_cancelled() {
            drop(guard);
            child.cancel();
            return;
        }
        guard.retain(|w| w.strong_count() > 0);
        guard.push(Arc::downgrade(child));
    }
}

/// Request-scoped cancellation context.
#[derive(Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    signal: Option<Arc<CancelSignal>>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.deadline)
            .field("cancellable", &self.signal.is_some())
            .field("done", &self.err())
            .finish()
    }
}

impl Context {
    /// A context that never ends on its own.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context that ends `timeout` from now (or earlier, if this one does).
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let at = Instant::now().checked_add(timeout);
        match at {
            Some(at) => self.with_deadline(at),
            None => self.clone(),
        }
    }

    /// Derive a context that ends at `deadline` (or earlier, if this one does).
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing <= deadline => existing,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            signal: self.signal.clone(),
        }
    }

    /// Derive a cancellable context.
    ///
    /// The returned handle cancels the new context and everything derived from it;
    /// cancelling this context's own parent also cancels the new one.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let signal = CancelSignal::new();
        if let Some(parent) = &self.signal {
            parent.adopt(&signal);
        }
        let ctx = Self {
            deadline: self.deadline,
            signal: Some(Arc::clone(&signal)),
        };
        (ctx, CancelHandle { signal })
    }

    /// Apply `timeout` only if this context carries no deadline yet.
    ///
    /// A deadline supplied by the caller always wins over a configured default.
    pub fn or_timeout(&self, timeout: Option<Duration>) -> Self {
        match (self.deadline, timeout) {
            (None, Some(timeout)) if !timeout.is_zero() => self.with_timeout(timeout),
            _ => self.clone(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Whether this context can ever end.
    pub fn can_end(&self) -> bool {
        self.deadline.is_some() || self.signal.is_some()
    }

    /// The reason this context ended, or `None` while it is still live.
    ///
    /// Cancellation is reported before an expired deadline.
    pub fn err(&self) -> Option<ContextError> {
        if self.signal.as_ref().is_some_and(|s| s.is_cancelled()) {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// A lightweight, thread-safe view of this context's liveness.
    ///
    /// Drivers install it into interruption callbacks that must not hold the full context.
    pub fn watcher(&self) -> DoneWatcher {
        DoneWatcher {
            deadline: self.deadline,
            cancelled: self.signal.as_ref().map(|s| Arc::clone(&s.cancelled)),
        }
    }

    /// Block for `duration`, returning early with an error if the context ends first.
    pub fn sleep(&self, duration: Duration) -> Result<(), ContextError> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        let wake_at = Instant::now().checked_add(duration);
        let (until, hits_deadline) = match (wake_at, self.deadline) {
            (Some(wake), Some(deadline)) if deadline <= wake => (Some(deadline), true),
            (Some(wake), _) => (Some(wake), false),
            (None, Some(deadline)) => (Some(deadline), true),
            (None, None) => (None, false),
        };

        match &self.signal {
            Some(signal) => {
                let mut guard = signal
                    .children
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                loop {
                    if signal.is_cancelled() {
                        return Err(ContextError::Cancelled);
                    }
                    let now = Instant::now();
                    match until {
                        Some(until) if now >= until => break,
                        Some(until) => {
                            guard = signal
                                .wake
                                .wait_timeout(guard, until - now)
                                .unwrap_or_else(PoisonError::into_inner)
                                .0;
                        }
                        None => {
                            guard = signal
                                .wake
                                .wait(guard)
                                .unwrap_or_else(PoisonError::into_inner);
                        }
                    }
                }
            }
            None => match until {
                Some(until) => std::thread::sleep(until.saturating_duration_since(Instant::now())),
                // An uncancellable context with no deadline and an unbounded sleep
                // would never return; treat it as a zero-length wait.
                None => {}
            },
        }

        if hits_deadline {
            Err(ContextError::DeadlineExceeded)
        } else {
            Ok(())
        }
    }
}

/// Cancels the context it was created with.
#[derive(Clone)]
pub struct CancelHandle {
    signal: Arc<CancelSignal>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.signal.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Snapshot of a context's deadline and cancel flag.
#[derive(Debug, Clone)]
pub struct DoneWatcher {
    deadline: Option<Instant>,
    cancelled: Option<Arc<AtomicBool>>,
}

impl DoneWatcher {
    pub fn is_done(&self) -> bool {
        self.cancelled
            .as_ref()
            .is_some_and(|c| c.load(Ordering::SeqCst))
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_never_ends() {
        let ctx = Context::background();
        assert!(!ctx.can_end());
        assert_eq!(ctx.err(), None);
        assert_eq!(ctx.remaining(), None);
    }

    #[test]
    fn test_child_deadline_never_extends_parent() {
        let parent = Context::background().with_timeout(Duration::from_millis(50));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());

        let tighter = parent.with_timeout(Duration::from_millis(1));
        assert!(tighter.deadline().unwrap() < parent.deadline().unwrap());
    }

    #[test]
    fn test_or_timeout_keeps_existing_deadline() {
        let caller = Context::background().with_timeout(Duration::from_millis(10));
        let effective = caller.or_timeout(Some(Duration::from_secs(30)));
        assert_eq!(effective.deadline(), caller.deadline());

        let defaulted = Context::background().or_timeout(Some(Duration::from_secs(30)));
        assert!(defaulted.deadline().is_some());

        let untouched = Context::background().or_timeout(None);
        assert!(untouched.deadline().is_none());
    }

    #[test]
    fn test_expired_deadline_reports_error() {
        let ctx = Context::background().with_deadline(Instant::now());
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
        assert!(ctx.watcher().is_done());
    }

    #[test]
    fn test_cancel_propagates_to_children() {
        let (parent, handle) = Context::background().with_cancel();
        let (child, _child_handle) = parent.with_cancel();
        let clone = child.clone();
        assert!(!child.is_done());

        handle.cancel();
        assert_eq!(child.err(), Some(ContextError::Cancelled));
        assert_eq!(clone.err(), Some(ContextError::Cancelled));
        assert!(child.watcher().is_done());
    }

    #[test]
    fn test_child_of_cancelled_parent_starts_cancelled() {
        let (parent, handle) = Context::background().with_cancel();
        handle.cancel();
        let (child, _) = parent.with_cancel();
        assert_eq!(child.err(), Some(ContextError::Cancelled));
    }

    #[test]
    fn test_sleep_completes_without_signal() {
        let ctx = Context::background();
        assert_eq!(ctx.sleep(Duration::from_millis(5)), Ok(()));
    }

    #[test]
    fn test_sleep_stops_at_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_millis(20));
        let start = Instant::now();
        assert_eq!(
            ctx.sleep(Duration::from_secs(10)),
            Err(ContextError::DeadlineExceeded)
        );
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_sleep_wakes_on_cancel() {
        let (ctx, handle) = Context::background().with_cancel();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            handle.cancel();
        });
        let start = Instant::now();
        assert_eq!(
            ctx.sleep(Duration::from_secs(10)),
            Err(ContextError::Cancelled)
        );
        assert!(start.elapsed() < Duration::from_secs(5));
        canceller.join().unwrap();
    }
}
