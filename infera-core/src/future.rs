use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use parking_lot::Condvar;
use parking_lot::Mutex;

use crate::error::ErrorKind;
use crate::error::Result;

/// Timing of one completed device command.
#[derive(Debug, Clone, Copy)]
pub struct CallStats {
    pub enqueued_at: Instant,
    pub started_at: Instant,
    pub finished_at: Instant,
}

impl CallStats {
    /// an already finished call, used by synchronous devices.
    pub fn immediate(started_at: Instant) -> Self {
        Self {
            enqueued_at: started_at,
            started_at,
            finished_at: Instant::now(),
        }
    }

    pub fn run_time(&self) -> Duration {
        self.finished_at.duration_since(self.started_at)
    }

    pub fn queue_time(&self) -> Duration {
        self.started_at.duration_since(self.enqueued_at)
    }
}

#[derive(Debug)]
enum CompletionState {
    Pending,
    Done(CallStats),
    Abandoned,
}

#[derive(Debug)]
struct CompletionInner {
    state: Mutex<CompletionState>,
    cond: Condvar,
}

/// Creates the two halves of one completion: the signal is handed to whoever
/// runs the work, the completion to whoever waits on it.
pub fn completion_pair() -> (CompletionSignal, Completion) {
    let inner = Arc::new(CompletionInner {
        state: Mutex::new(CompletionState::Pending),
        cond: Condvar::new(),
    });
    (
        CompletionSignal {
            inner: Some(inner.clone()),
        },
        Completion { inner },
    )
}

/// The producer half. `complete` consumes it, so a command can only be
/// signalled once; dropping it unsignalled wakes the waiters with an error.
#[derive(Debug)]
pub struct CompletionSignal {
    inner: Option<Arc<CompletionInner>>,
}

impl CompletionSignal {
    pub fn complete(mut self, stats: CallStats) {
        if let Some(inner) = self.inner.take() {
            Self::finish(&inner, CompletionState::Done(stats));
        }
    }

    fn finish(inner: &CompletionInner, state: CompletionState) {
        let mut guard = inner.state.lock();
        *guard = state;
        inner.cond.notify_all();
    }
}

impl Drop for CompletionSignal {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            Self::finish(&inner, CompletionState::Abandoned);
        }
    }
}

/// The waiting half of a completion. Cloning it gives another waiter of the
/// same work.
#[derive(Debug, Clone)]
pub struct Completion {
    inner: Arc<CompletionInner>,
}

impl Completion {
    /// a completion that is already done.
    pub fn ready(stats: CallStats) -> Self {
        let (signal, completion) = completion_pair();
        signal.complete(stats);
        completion
    }

    pub fn is_complete(&self) -> bool {
        !matches!(*self.inner.state.lock(), CompletionState::Pending)
    }

    /// blocks until the work is done. fails if the work was dropped without
    /// running, like when its device shut down.
    pub fn wait(&self) -> Result<CallStats> {
        let mut guard = self.inner.state.lock();
        while matches!(*guard, CompletionState::Pending) {
            self.inner.cond.wait(&mut guard);
        }
        match *guard {
            CompletionState::Done(stats) => Ok(stats),
            _ => Err((
                ErrorKind::ResourceError,
                "the device command was abandoned before it completed",
            )
                .into()),
        }
    }
}

/// The optional out-parameter of `Operator::run`. When the caller passes one,
/// the operator stores the completion of the work it submitted, and the caller
/// can wait for exactly that work instead of syncing the whole device.
#[derive(Debug, Default)]
pub struct OpFuture {
    completion: Option<Completion>,
}

impl OpFuture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, completion: Completion) {
        self.completion = Some(completion);
    }

    pub fn is_set(&self) -> bool {
        self.completion.is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.completion
            .as_ref()
            .map(|c| c.is_complete())
            .unwrap_or(true)
    }

    /// waits for the operator's work. a future that was never set has nothing
    /// to wait for and returns `None`.
    pub fn wait(&self) -> Result<Option<CallStats>> {
        match &self.completion {
            Some(c) => c.wait().map(Some),
            None => Ok(None),
        }
    }
}
