//! Completion events
//!
//! Every submission yields an event. Events move through a one-shot state
//! machine, `Pending -> {Resolved | Failed | Cancelled}`, and terminal states
//! are sticky: re-entrant waits return immediately once a terminal state is
//! reached. Cancellation is advisory; a back-end that has already started
//! the work may ignore the request and the event then resolves or fails
//! normally.
//!
//! [`EventCell`] is the shared state-machine implementation back-ends build
//! on. The host back-end creates cells that are already terminal when
//! `launch` returns; asynchronous back-ends create pending cells and drive
//! them from completion callbacks.

use crate::error::{Error, Result};
use crate::memory::BackendKind;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle state of an event
#[derive(Clone, Debug)]
pub enum EventState {
    Pending,
    Resolved,
    Failed(Error),
    Cancelled,
}

impl EventState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventState::Pending)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, EventState::Resolved)
    }

    fn as_result(&self) -> Result<()> {
        match self {
            EventState::Resolved => Ok(()),
            EventState::Failed(e) => Err(e.clone()),
            EventState::Cancelled => Err(Error::Cancelled),
            EventState::Pending => unreachable!("terminal state expected"),
        }
    }
}

/// Timestamps of a submission's lifecycle, in nanoseconds since an arbitrary
/// process-local origin
///
/// Absent fields mean the back-end does not expose that timestamp.
/// Serializes to the profiling JSON form:
/// `{"queued":<ns>,"submitted":<ns>,"started":<ns>,"ended":<ns>}`.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct ProfilingInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended: Option<u64>,
}

/// Nanoseconds since the first call in this process; the shared origin for
/// profiling timestamps
pub fn profile_now() -> u64 {
    static ORIGIN: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let origin = ORIGIN.get_or_init(Instant::now);
    origin.elapsed().as_nanos() as u64
}

/// A future over kernel completion
pub trait ComputeEvent: Send + Sync + std::fmt::Debug {
    /// Back-end this event belongs to
    fn backend(&self) -> BackendKind;

    /// Current state; terminal states are sticky
    fn state(&self) -> EventState;

    /// Block until the event is terminal
    fn wait(&self) -> Result<()>;

    /// Block until the event is terminal or the timeout elapses
    ///
    /// A timeout yields `TimedOut` and leaves the event's state untouched.
    fn wait_for(&self, timeout: Duration) -> Result<()>;

    /// Request cancellation; best-effort, may be ignored once work has begun
    fn cancel(&self);

    /// Register a continuation; returns an event that completes after `f`
    ///
    /// The continuation observes the source's terminal state: a failed or
    /// cancelled source skips `f` and propagates the failure to the returned
    /// event.
    fn then(&self, f: Box<dyn FnOnce() + Send>) -> Arc<dyn ComputeEvent>;

    /// Profiling timestamps, when the back-end collects them
    fn profiling(&self) -> Option<ProfilingInfo>;
}

type Continuation = Box<dyn FnOnce(&EventState) + Send>;

struct CellInner {
    state: EventState,
    profiling: Option<ProfilingInfo>,
    cancel_requested: bool,
    continuations: Vec<Continuation>,
}

/// Shared event state machine
pub struct EventCell {
    backend: BackendKind,
    inner: Mutex<CellInner>,
    cond: Condvar,
}

impl std::fmt::Debug for EventCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCell")
            .field("backend", &self.backend)
            .field("state", &self.state())
            .finish()
    }
}

impl EventCell {
    /// A pending event
    pub fn new(backend: BackendKind) -> Arc<Self> {
        Arc::new(Self {
            backend,
            inner: Mutex::new(CellInner {
                state: EventState::Pending,
                profiling: None,
                cancel_requested: false,
                continuations: Vec::new(),
            }),
            cond: Condvar::new(),
        })
    }

    /// An already-resolved event
    pub fn resolved(backend: BackendKind) -> Arc<Self> {
        let cell = Self::new(backend);
        cell.resolve();
        cell
    }

    /// An already-failed event
    pub fn failed(backend: BackendKind, err: Error) -> Arc<Self> {
        let cell = Self::new(backend);
        cell.fail(err);
        cell
    }

    /// Whether cancellation has been requested; back-ends check this before
    /// starting work
    pub fn is_cancel_requested(&self) -> bool {
        self.inner.lock().cancel_requested
    }

    /// Attach profiling timestamps
    pub fn set_profiling(&self, info: ProfilingInfo) {
        self.inner.lock().profiling = Some(info);
    }

    /// Transition to `Resolved`; a no-op once terminal
    pub fn resolve(&self) {
        self.transition(EventState::Resolved);
    }

    /// Transition to `Failed`; a no-op once terminal
    pub fn fail(&self, err: Error) {
        self.transition(EventState::Failed(err));
    }

    /// Transition to `Cancelled`; a no-op once terminal
    pub fn mark_cancelled(&self) {
        self.transition(EventState::Cancelled);
    }

    fn transition(&self, next: EventState) {
        let continuations = {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() {
                return;
            }
            inner.state = next;
            self.cond.notify_all();
            std::mem::take(&mut inner.continuations)
        };
        if !continuations.is_empty() {
            let state = self.state();
            tracing::trace!(backend = %self.backend, n = continuations.len(), "running continuations");
            for f in continuations {
                f(&state);
            }
        }
    }
}

impl ComputeEvent for EventCell {
    fn backend(&self) -> BackendKind {
        self.backend
    }

    fn state(&self) -> EventState {
        self.inner.lock().state.clone()
    }

    fn wait(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        while !inner.state.is_terminal() {
            self.cond.wait(&mut inner);
        }
        inner.state.as_result()
    }

    fn wait_for(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while !inner.state.is_terminal() {
            if self.cond.wait_until(&mut inner, deadline).timed_out() {
                return if inner.state.is_terminal() {
                    inner.state.as_result()
                } else {
                    Err(Error::TimedOut)
                };
            }
        }
        inner.state.as_result()
    }

    fn cancel(&self) {
        let mut inner = self.inner.lock();
        if !inner.state.is_terminal() {
            inner.cancel_requested = true;
        }
    }

    fn then(&self, f: Box<dyn FnOnce() + Send>) -> Arc<dyn ComputeEvent> {
        let child = EventCell::new(self.backend);

        let run: Continuation = {
            let child = Arc::clone(&child);
            Box::new(move |state: &EventState| match state {
                EventState::Resolved => {
                    f();
                    child.resolve();
                }
                EventState::Failed(e) => child.fail(e.clone()),
                EventState::Cancelled => child.fail(Error::Cancelled),
                EventState::Pending => unreachable!("continuation before terminal state"),
            })
        };

        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            // Source already terminal: run the continuation on the calling
            // thread, the host back-end's definition of `then`.
            let state = inner.state.clone();
            drop(inner);
            run(&state);
        } else {
            inner.continuations.push(run);
        }
        child
    }

    fn profiling(&self) -> Option<ProfilingInfo> {
        self.inner.lock().profiling
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_resolved_cell_is_sticky() {
        let cell = EventCell::resolved(BackendKind::Host);
        assert!(cell.state().is_resolved());
        cell.fail(Error::execution("late failure"));
        assert!(cell.state().is_resolved());
        // Re-entrant waits return immediately.
        cell.wait().unwrap();
        cell.wait().unwrap();
    }

    #[test]
    fn test_failed_cell_surfaces_error() {
        let cell = EventCell::failed(BackendKind::Host, Error::execution("boom"));
        let err = cell.wait().unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed(_)));
    }

    #[test]
    fn test_wait_for_times_out_without_state_change() {
        let cell = EventCell::new(BackendKind::Host);
        let err = cell.wait_for(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, Error::TimedOut));
        assert!(!cell.state().is_terminal());
    }

    #[test]
    fn test_wait_blocks_until_resolution() {
        let cell = EventCell::new(BackendKind::Host);
        let waiter = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || cell.wait())
        };
        thread::sleep(Duration::from_millis(20));
        cell.resolve();
        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn test_then_on_resolved_runs_inline() {
        let cell = EventCell::resolved(BackendKind::Host);
        let ran = Arc::new(AtomicBool::new(false));
        let child = {
            let ran = Arc::clone(&ran);
            cell.then(Box::new(move || ran.store(true, Ordering::SeqCst)))
        };
        // Host semantics: the continuation has already run.
        assert!(ran.load(Ordering::SeqCst));
        assert!(child.state().is_resolved());
    }

    #[test]
    fn test_then_on_failed_skips_continuation() {
        let cell = EventCell::failed(BackendKind::Host, Error::execution("boom"));
        let ran = Arc::new(AtomicBool::new(false));
        let child = {
            let ran = Arc::clone(&ran);
            cell.then(Box::new(move || ran.store(true, Ordering::SeqCst)))
        };
        assert!(!ran.load(Ordering::SeqCst));
        let err = child.wait().unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed(_)));
    }

    #[test]
    fn test_then_on_pending_runs_at_resolution() {
        let cell = EventCell::new(BackendKind::Host);
        let count = Arc::new(AtomicUsize::new(0));
        let child = {
            let count = Arc::clone(&count);
            cell.then(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }))
        };
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!child.state().is_terminal());
        cell.resolve();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        child.wait().unwrap();
    }

    #[test]
    fn test_cancel_is_advisory() {
        let cell = EventCell::new(BackendKind::Host);
        cell.cancel();
        assert!(cell.is_cancel_requested());
        assert!(!cell.state().is_terminal());
        // Back-end chose to ignore the request; the event still resolves.
        cell.resolve();
        cell.wait().unwrap();
    }

    #[test]
    fn test_cancel_honored_by_backend() {
        let cell = EventCell::new(BackendKind::Host);
        cell.cancel();
        if cell.is_cancel_requested() {
            cell.mark_cancelled();
        }
        let err = cell.wait().unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        // Cancel after terminal is a no-op.
        cell.cancel();
        assert!(matches!(cell.state(), EventState::Cancelled));
    }

    #[test]
    fn test_profiling_json_shape() {
        let info = ProfilingInfo {
            queued: Some(1),
            submitted: Some(2),
            started: Some(3),
            ended: None,
        };
        let json = serde_json::to_value(info).unwrap();
        assert_eq!(json["queued"], 1);
        assert_eq!(json["submitted"], 2);
        assert_eq!(json["started"], 3);
        assert!(json.get("ended").is_none());
    }

    #[test]
    fn test_profile_now_is_monotonic() {
        let a = profile_now();
        let b = profile_now();
        assert!(b >= a);
    }
}
