//! Repeating job runner bound to one OS thread.
//!
//! A [`WorkerTask`] calls its handler over and over while started. Control
//! calls move it between [`TaskState`]s; the synchronous forms return only
//! once the worker thread has acknowledged the new state, so after
//! [`WorkerTask::pause`] returns no handler invocation is in progress.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Default interval at which a paused worker re-checks its state.
pub const DEFAULT_PAUSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Run state of a worker task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Started,
    Pausing,
    Paused,
    Stopping,
    Stopped,
}

type Handler = Box<dyn FnMut() + Send>;

struct Shared {
    name: String,
    state: Mutex<TaskState>,
    cond: Condvar,
    handler: Mutex<Option<Handler>>,
    pause_timeout: Duration,
}

impl Shared {
    fn set(&self, state: TaskState) {
        *self.state.lock() = state;
        self.cond.notify_all();
    }
}

/// Marks the task stopped if the handler unwinds out of the worker loop.
struct PanicGuard(Arc<Shared>);

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            warn!(task = %self.0.name, "worker handler panicked");
            self.0.set(TaskState::Stopped);
        }
    }
}

/// A cooperatively controlled worker thread.
pub struct WorkerTask {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_pause_timeout(name, DEFAULT_PAUSE_TIMEOUT)
    }

    pub fn with_pause_timeout(name: impl Into<String>, pause_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                state: Mutex::new(TaskState::Stopped),
                cond: Condvar::new(),
                handler: Mutex::new(None),
                pause_timeout,
            }),
            thread: Mutex::new(None),
        }
    }

    /// Build a task with its handler already registered.
    pub fn with_handler<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let task = Self::new(name);
        task.register_handler(handler);
        task
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> TaskState {
        *self.shared.state.lock()
    }

    /// Replace the handler. Must not race with an active iteration.
    pub fn register_handler<F>(&self, handler: F)
    where
        F: FnMut() + Send + 'static,
    {
        *self.shared.handler.lock() = Some(Box::new(handler));
        debug!(task = %self.shared.name, "handler registered");
    }

    /// Start or resume the task, spawning its thread if needed.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.thread.lock();
        let previous = {
            let mut state = self.shared.state.lock();
            let previous = *state;
            *state = TaskState::Started;
            previous
        };
        self.shared.cond.notify_all();

        // A stopped task has no live loop; reap the old thread first.
        if previous == TaskState::Stopped {
            if let Some(handle) = worker.take() {
                if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                    warn!(task = %self.shared.name, "previous worker thread panicked");
                }
            }
        }
        if worker.is_none() {
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(self.shared.name.clone())
                .spawn(move || run(shared));
            match spawned {
                Ok(handle) => *worker = Some(handle),
                Err(e) => {
                    self.shared.set(TaskState::Stopped);
                    return Err(Error::no_memory(format!(
                        "spawn worker {}: {e}",
                        self.shared.name
                    )));
                }
            }
        }
        debug!(task = %self.shared.name, ?previous, "task started");
        Ok(())
    }

    /// Stop the task and join its thread. No-op if already stopped.
    ///
    /// Called from the worker thread itself, this only requests the stop.
    pub fn stop(&self) {
        let mut worker = self.thread.lock();
        let on_worker = self.on_worker(&worker);
        {
            let mut state = self.shared.state.lock();
            if *state != TaskState::Stopped {
                if worker.is_none() {
                    *state = TaskState::Stopped;
                    return;
                }
                *state = TaskState::Stopping;
                self.shared.cond.notify_all();
                if on_worker {
                    return;
                }
                self.shared
                    .cond
                    .wait_while(&mut state, |s| *s != TaskState::Stopped);
            }
        }
        if on_worker {
            return;
        }
        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                warn!(task = %self.shared.name, "worker thread panicked");
            }
        }
        debug!(task = %self.shared.name, "task stopped");
    }

    /// Request a stop without waiting.
    pub fn stop_async(&self) {
        let mut state = self.shared.state.lock();
        if *state != TaskState::Stopped {
            *state = TaskState::Stopping;
            self.shared.cond.notify_all();
        }
        trace!(task = %self.shared.name, "stop requested");
    }

    /// Pause the task, waiting until the worker acknowledges.
    pub fn pause(&self) {
        let on_worker = self.on_worker(&self.thread.lock());
        let mut state = self.shared.state.lock();
        match *state {
            TaskState::Started => {
                *state = TaskState::Pausing;
                self.shared.cond.notify_all();
                if !on_worker {
                    self.shared.cond.wait_while(&mut state, |s| {
                        !matches!(s, TaskState::Paused | TaskState::Stopped)
                    });
                }
            }
            TaskState::Stopping if !on_worker => {
                self.shared
                    .cond
                    .wait_while(&mut state, |s| *s != TaskState::Stopped);
            }
            TaskState::Pausing if !on_worker => {
                self.shared.cond.wait_while(&mut state, |s| {
                    !matches!(s, TaskState::Paused | TaskState::Stopped)
                });
            }
            _ => {}
        }
        trace!(task = %self.shared.name, state = ?*state, "pause returned");
    }

    /// Request a pause without waiting. Only acts on a started task.
    pub fn pause_async(&self) {
        let mut state = self.shared.state.lock();
        if *state == TaskState::Started {
            *state = TaskState::Pausing;
            self.shared.cond.notify_all();
        }
    }

    fn on_worker(&self, worker: &Option<JoinHandle<()>>) -> bool {
        worker
            .as_ref()
            .is_some_and(|h| h.thread().id() == thread::current().id())
    }
}

impl Drop for WorkerTask {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for WorkerTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerTask")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

fn run(shared: Arc<Shared>) {
    let _guard = PanicGuard(Arc::clone(&shared));
    trace!(task = %shared.name, "worker loop entered");
    loop {
        let mut state = shared.state.lock();
        match *state {
            TaskState::Started => {
                drop(state);
                let mut slot = shared.handler.lock();
                if let Some(handler) = slot.as_mut() {
                    handler();
                    continue;
                }
                drop(slot);
                let mut state = shared.state.lock();
                shared.cond.wait_while_for(
                    &mut state,
                    |s| *s == TaskState::Started,
                    shared.pause_timeout,
                );
            }
            TaskState::Pausing | TaskState::Paused => {
                *state = TaskState::Paused;
                shared.cond.notify_all();
                shared.cond.wait_while_for(
                    &mut state,
                    |s| *s == TaskState::Paused,
                    shared.pause_timeout,
                );
            }
            TaskState::Stopping | TaskState::Stopped => {
                *state = TaskState::Stopped;
                shared.cond.notify_all();
                break;
            }
        }
    }
    trace!(task = %shared.name, "worker loop exited");
}
