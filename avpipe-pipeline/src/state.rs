//! Pipeline lifecycle states and the operations each one admits.

use avpipe_core::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

/// Lifecycle state of a [`CodecPipeline`](crate::CodecPipeline).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum PipelineState {
    /// Created or fully released.
    Uninitialized = 0,
    /// Configuration in progress.
    Initialized,
    /// Pools allocated and engine session open; workers idle.
    Configured,
    Starting,
    /// Workers moving buffers.
    Running,
    Flushing,
    /// Workers paused, all slots reclaimed.
    Flushed,
    Stopping,
    Resuming,
    Releasing,
    /// The engine emitted its last output; no more output until flush or reset.
    EndOfStream,
    /// Unrecoverable failure; only reset or release are accepted.
    Error,
}

impl PipelineState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PipelineState::Uninitialized,
            1 => PipelineState::Initialized,
            2 => PipelineState::Configured,
            3 => PipelineState::Starting,
            4 => PipelineState::Running,
            5 => PipelineState::Flushing,
            6 => PipelineState::Flushed,
            7 => PipelineState::Stopping,
            8 => PipelineState::Resuming,
            9 => PipelineState::Releasing,
            10 => PipelineState::EndOfStream,
            _ => PipelineState::Error,
        }
    }

    /// Check if buffers are flowing (or have just finished flowing).
    pub fn is_active(self) -> bool {
        matches!(
            self,
            PipelineState::Running | PipelineState::Flushed | PipelineState::EndOfStream
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Client-visible operations, for legality checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Configure,
    Start,
    Stop,
    Flush,
    SetParameter,
    NotifyEos,
    SetCallback,
    SetSurface,
    OutputFormat,
    QueueInput,
    GetInputBuffer,
    GetOutputBuffer,
    ReleaseOutput,
    RenderOutput,
}

impl Op {
    pub(crate) fn allowed_in(self, state: PipelineState) -> bool {
        use PipelineState as S;
        match self {
            Op::Configure => state == S::Uninitialized,
            Op::Start => matches!(state, S::Configured | S::Flushed),
            Op::Stop => matches!(
                state,
                S::Configured | S::Running | S::Flushed | S::EndOfStream
            ),
            Op::Flush => matches!(state, S::Running | S::Flushed | S::EndOfStream),
            Op::SetParameter => matches!(state, S::Configured | S::Running | S::Flushed),
            Op::NotifyEos => state == S::Running,
            Op::SetCallback => {
                matches!(state, S::Uninitialized | S::Initialized | S::Configured)
            }
            Op::SetSurface => matches!(
                state,
                S::Uninitialized | S::Configured | S::Running | S::Flushed
            ),
            Op::OutputFormat => matches!(
                state,
                S::Configured
                    | S::Starting
                    | S::Running
                    | S::Flushing
                    | S::Flushed
                    | S::Resuming
                    | S::EndOfStream
            ),
            Op::QueueInput | Op::GetInputBuffer => {
                matches!(state, S::Running | S::Flushed)
            }
            Op::GetOutputBuffer | Op::ReleaseOutput | Op::RenderOutput => state.is_active(),
        }
    }

    /// `Ok` if this operation is legal in `state`, `InvalidState` otherwise.
    pub(crate) fn check(self, state: PipelineState) -> Result<()> {
        if self.allowed_in(state) {
            Ok(())
        } else {
            Err(Error::invalid_state(format!("{self:?} not allowed in {state}")))
        }
    }
}

/// Atomic lifecycle cell that workers can wait on.
///
/// Reads are lock-free. Writes go through a small mutex so waiters never
/// miss a change.
pub(crate) struct StateCell {
    value: AtomicU8,
    lock: Mutex<()>,
    changed: Condvar,
}

impl StateCell {
    pub(crate) fn new(state: PipelineState) -> Self {
        Self {
            value: AtomicU8::new(state as u8),
            lock: Mutex::new(()),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn get(&self) -> PipelineState {
        PipelineState::from_u8(self.value.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: PipelineState) {
        let _guard = self.lock.lock();
        self.value.store(state as u8, Ordering::Release);
        self.changed.notify_all();
    }

    /// Move from `from` to `to`; returns false if the state was not `from`.
    pub(crate) fn transition(&self, from: PipelineState, to: PipelineState) -> bool {
        let _guard = self.lock.lock();
        let ok = self
            .value
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if ok {
            self.changed.notify_all();
        }
        ok
    }

    /// Block while the state equals `state`, at most `timeout`.
    pub(crate) fn wait_while_eq(&self, state: PipelineState, timeout: Duration) {
        let mut guard = self.lock.lock();
        self.changed
            .wait_while_for(&mut guard, |_| self.get() == state, timeout);
    }
}
