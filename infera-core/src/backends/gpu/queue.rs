use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;

use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::future::completion_pair;
use crate::future::CallStats;
use crate::future::Completion;
use crate::future::CompletionSignal;
use crate::runtime::affinity;
use crate::runtime::GpuPriorityHint;

type Work = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

struct Command {
    name: &'static str,
    work: Work,
    signal: CompletionSignal,
    enqueued_at: Instant,
}

/// The niceness of the threads serving a gpu device for a priority hint.
pub(crate) fn priority_nice(hint: GpuPriorityHint) -> Option<i32> {
    match hint {
        GpuPriorityHint::Default => None,
        GpuPriorityHint::Low => Some(10),
        GpuPriorityHint::Normal => Some(5),
        GpuPriorityHint::High => Some(-5),
    }
}

pub(crate) fn apply_priority(hint: GpuPriorityHint) {
    if let Some(nice) = priority_nice(hint) {
        // raising the priority usually needs privileges, so it's best effort
        if let Err(err) = affinity::set_current_thread_nice(nice) {
            tracing::warn!(?hint, nice, "failed to apply gpu priority hint: {}", err);
        }
    }
}

/// An in-order command queue served by one thread. Every command gets exactly
/// one completion; a command that fails, or is still queued when the queue
/// stops, is dropped and its completion is abandoned.
pub(crate) struct CommandQueue {
    tx: Option<Sender<Command>>,
    handle: Option<JoinHandle<()>>,
}

impl CommandQueue {
    pub fn new(priority: GpuPriorityHint) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded::<Command>();
        let handle = std::thread::Builder::new()
            .name("infera-gpu-queue".to_string())
            .spawn(move || {
                apply_priority(priority);
                Self::serve(rx);
            })
            .map_err(|err| {
                Error::from((ErrorKind::ResourceError, "failed to spawn the gpu command queue"))
                    .with_cause(err)
            })?;

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    fn serve(rx: Receiver<Command>) {
        while let Ok(cmd) = rx.recv() {
            let started_at = Instant::now();
            if let Err(err) = (cmd.work)() {
                tracing::error!(command = cmd.name, "gpu command failed: {}", err);
                continue;
            }
            let stats = CallStats {
                enqueued_at: cmd.enqueued_at,
                started_at,
                finished_at: Instant::now(),
            };
            tracing::trace!(
                command = cmd.name,
                queue_us = stats.queue_time().as_micros() as u64,
                run_us = stats.run_time().as_micros() as u64,
                "gpu command done"
            );
            cmd.signal.complete(stats);
        }
    }

    pub fn enqueue(&self, name: &'static str, work: Work) -> Result<Completion> {
        let (signal, completion) = completion_pair();
        let cmd = Command {
            name,
            work,
            signal,
            enqueued_at: Instant::now(),
        };
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| Error::from((ErrorKind::ResourceError, "gpu command queue is closed")))?;
        // a failed send drops the command, which abandons its completion
        tx.send(cmd).map_err(|_| {
            Error::from((
                ErrorKind::ResourceError,
                format!("gpu command queue is stopped, {} is not enqueued", name),
            ))
        })?;
        Ok(completion)
    }

    /// blocks until every command enqueued so far has run.
    pub fn finish(&self) -> Result<()> {
        self.enqueue("finish", Box::new(|| Ok(())))?.wait()?;
        Ok(())
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        // closing the channel lets the thread drain the queue and exit
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("gpu command queue thread panicked");
            }
        }
    }
}
