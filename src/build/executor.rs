//! Single-threaded executor that owns the build engine state.
//!
//! The engine keeps mutable state (loaded projects, logger registrations)
//! that must never be touched from two threads at once. The executor owns
//! that state on one dedicated thread and runs submitted actions against it
//! one at a time, in submission order. Callers block until their action
//! has finished.
//!
//! ```text
//!   caller A ──┐                       ┌──▶ reply A
//!   caller B ──┼──▶ job queue ──▶ build thread (owns S) ──┼──▶ reply B
//!   caller C ──┘                       └──▶ reply C
//! ```

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{unbounded, Sender};

use super::error::ExecutorError;

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;
type JobResult<R> = Result<R, Box<dyn Any + Send>>;

/// Runs actions against an owned state `S` on a dedicated thread.
pub struct SingleThreadedExecutor<S> {
    /// Job queue. `None` once shutdown has started.
    sender: Option<Sender<Job<S>>>,
    /// Handle of the build thread, joined on drop.
    handle: Option<JoinHandle<()>>,
    /// Id of the build thread, used to reject re-entrant calls.
    thread_id: ThreadId,
}

impl<S: Send + 'static> SingleThreadedExecutor<S> {
    /// Starts the build thread, moving `state` onto it.
    ///
    /// # Errors
    ///
    /// Returns an error if the operating system refuses to create the thread.
    pub fn spawn(name: &str, state: S) -> io::Result<Self> {
        let (sender, receiver) = unbounded::<Job<S>>();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut state = state;
                for job in &receiver {
                    job(&mut state);
                }
                tracing::debug!("Build thread job queue closed");
            })?;

        let thread_id = handle.thread().id();
        tracing::debug!(thread = name, "Build thread started");

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            thread_id,
        })
    }

    /// Runs `action` on the build thread and waits for its result.
    ///
    /// Actions run strictly one after another. A panic inside `action` is
    /// resumed on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::Reentrant`] when called from the build thread
    /// itself, and [`ExecutorError::Stopped`] when the thread has exited.
    pub fn run<R, F>(&self, action: F) -> Result<R, ExecutorError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_build_thread() {
            return Err(ExecutorError::Reentrant);
        }
        let sender = self.sender.as_ref().ok_or(ExecutorError::Stopped)?;

        let (reply_tx, reply_rx) = crossbeam_channel::bounded::<JobResult<R>>(1);
        let job: Job<S> = Box::new(move |state| {
            let result = panic::catch_unwind(AssertUnwindSafe(|| action(state)));
            let _ = reply_tx.send(result);
        });

        sender.send(job).map_err(|_| ExecutorError::Stopped)?;

        match reply_rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(_) => Err(ExecutorError::Stopped),
        }
    }
}

impl<S> SingleThreadedExecutor<S> {
    /// Returns `true` when called from the build thread.
    #[must_use]
    pub fn is_build_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

impl<S> Drop for SingleThreadedExecutor<S> {
    fn drop(&mut self) {
        // Closing the queue lets the thread drain remaining jobs and exit.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if self.is_build_thread() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!("Build thread terminated with a panic");
            }
        }
    }
}
