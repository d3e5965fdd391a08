//! # avpipe core
//!
//! Building blocks shared by the avpipe codec pipeline:
//! - Error taxonomy
//! - Buffer slots, attributes and ownership tags
//! - Bounded buffer pools with blocking acquire
//! - Worker tasks with start/pause/stop control
//! - Format key/value maps

pub mod buffer;
pub mod error;
pub mod format;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod task;

pub use buffer::{BufferAttrs, BufferFlags, BufferSlot, MemoryKind, Owner, OwnedBuffer};
pub use error::{Error, ErrorKind, Result};
pub use format::{FormatMap, FormatValue};
pub use pool::{AcquireMode, BufferPool, PoolConfig, PoolPolicy, PoolStats};
pub use queue::SignalQueue;
pub use task::{TaskState, WorkerTask};

#[doc(hidden)]
#[cfg(feature = "metrics")]
pub use ::metrics as __metrics;
