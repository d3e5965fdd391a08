//! Bounded pools of buffer slots.
//!
//! A pool owns every [`BufferSlot`] of one direction (input or output). Each
//! pool has a *home* owner: the role that picks up free slots from the
//! `ready` list (the client for an input pool, the codec for an output pool).
//! An index sits in `ready` only while its slot is held by the home owner and
//! never appears there twice.

use crate::buffer::{BufferAttrs, BufferSlot, MemoryKind, Owner, OwnedBuffer};
use crate::error::{Error, Result};
use crate::{record_counter, record_gauge, record_histogram};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Minimum number of slots a pipeline pool may be configured with.
pub const MIN_BUFFER_COUNT: usize = 2;

/// Default number of slots per pool.
pub const DEFAULT_BUFFER_COUNT: usize = 8;

/// What a pool does when `ready` is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PoolPolicy {
    /// Never allocate after construction; acquirers wait or fail.
    #[default]
    Fixed,
    /// Allocate a new slot on exhaustion until `max` slots exist.
    Growable { max: usize },
}

/// How long an acquirer is prepared to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    NonBlocking,
    Blocking(Duration),
}

/// Pool construction parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolConfig {
    /// Number of slots allocated up front.
    pub count: usize,
    /// Capacity of each slot in bytes.
    pub buffer_size: usize,
    pub policy: PoolPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            count: DEFAULT_BUFFER_COUNT,
            buffer_size: 0,
            policy: PoolPolicy::Fixed,
        }
    }
}

impl PoolConfig {
    pub fn new(count: usize, buffer_size: usize) -> Self {
        Self {
            count,
            buffer_size,
            policy: PoolPolicy::Fixed,
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_policy(mut self, policy: PoolPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Upper bound on the number of slots.
    pub fn max_slots(&self) -> usize {
        match self.policy {
            PoolPolicy::Fixed => self.count,
            PoolPolicy::Growable { max } => max.max(self.count),
        }
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub ready: usize,
    pub busy: usize,
    pub max: usize,
}

struct Entry {
    slot: BufferSlot,
    queued: bool,
}

struct PoolState {
    entries: Vec<Entry>,
    ready: VecDeque<u32>,
    closed: bool,
}

impl PoolState {
    fn entry(&self, index: u32) -> Result<&Entry> {
        self.entries
            .get(index as usize)
            .ok_or_else(|| out_of_range(index, self.entries.len()))
    }

    fn entry_mut(&mut self, index: u32) -> Result<&mut Entry> {
        let len = self.entries.len();
        self.entries
            .get_mut(index as usize)
            .ok_or_else(|| out_of_range(index, len))
    }

    fn dequeue(&mut self, index: u32) {
        if let Some(pos) = self.ready.iter().position(|&i| i == index) {
            self.ready.remove(pos);
        }
    }

    fn busy(&self) -> usize {
        self.entries.len() - self.ready.len()
    }
}

fn out_of_range(index: u32, len: usize) -> Error {
    Error::invalid_value(format!("buffer index {index} out of range (pool has {len})"))
}

struct Inner {
    name: String,
    home: Owner,
    memory_kind: MemoryKind,
    config: PoolConfig,
    state: Mutex<PoolState>,
    available: Condvar,
}

/// A thread-safe pool of buffer slots.
///
/// Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Inner>,
}

impl BufferPool {
    /// Create a pool and allocate `config.count` slots owned by `home`.
    pub fn new(
        name: impl Into<String>,
        home: Owner,
        memory_kind: MemoryKind,
        config: PoolConfig,
    ) -> Result<Self> {
        let name = name.into();
        if config.count == 0 {
            return Err(Error::invalid_value(format!("pool {name}: zero buffer count")));
        }
        let mut entries = Vec::with_capacity(config.count);
        let mut ready = VecDeque::with_capacity(config.max_slots());
        for index in 0..config.count as u32 {
            let memory = OwnedBuffer::new(config.buffer_size, memory_kind)?;
            entries.push(Entry {
                slot: BufferSlot::new(index, memory, home),
                queued: true,
            });
            ready.push_back(index);
        }
        debug!(
            pool = %name,
            count = config.count,
            buffer_size = config.buffer_size,
            policy = ?config.policy,
            "buffer pool allocated"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                name,
                home,
                memory_kind,
                config,
                state: Mutex::new(PoolState {
                    entries,
                    ready,
                    closed: false,
                }),
                available: Condvar::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Role that picks up slots from the ready list.
    pub fn home(&self) -> Owner {
        self.inner.home
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Take the next ready slot.
    ///
    /// The slot stays with the home owner but leaves the ready list. A
    /// growable pool allocates a fresh slot instead of waiting while it is
    /// below its bound.
    pub fn acquire(&self, mode: AcquireMode) -> Result<u32> {
        let started = Instant::now();
        let deadline = match mode {
            AcquireMode::NonBlocking => None,
            AcquireMode::Blocking(timeout) => Some(started + timeout),
        };
        let mut state = self.inner.state.lock();
        let mut timed_out = false;
        loop {
            if state.closed {
                return Err(Error::Closed);
            }
            if let Some(index) = state.ready.pop_front() {
                state.entries[index as usize].queued = false;
                record_counter!("avpipe.pool.acquire", 1);
                record_histogram!(
                    "avpipe.pool.acquire_wait_ms",
                    started.elapsed().as_secs_f64() * 1000.0
                );
                record_gauge!("avpipe.pool.ready", state.ready.len() as f64);
                trace!(pool = %self.inner.name, index, "acquired");
                return Ok(index);
            }
            if let PoolPolicy::Growable { .. } = self.inner.config.policy {
                if state.entries.len() < self.inner.config.max_slots() {
                    let index = self.push_slot(&mut state)?;
                    debug!(pool = %self.inner.name, index, "pool grew on demand");
                    return Ok(index);
                }
            }
            let Some(deadline) = deadline else {
                return Err(Error::WouldBlock);
            };
            if timed_out {
                return Err(Error::WouldBlock);
            }
            timed_out = self
                .inner
                .available
                .wait_until(&mut state, deadline)
                .timed_out();
        }
    }

    /// Return a slot to the home owner and the ready list.
    ///
    /// Attributes are cleared. Releasing an already ready slot is a no-op.
    pub fn release(&self, index: u32) -> Result<()> {
        let mut state = self.inner.state.lock();
        self.release_locked(&mut state, index)?;
        drop(state);
        self.inner.available.notify_one();
        Ok(())
    }

    /// Like [`release`](Self::release) but only if `expected` holds the slot.
    pub fn release_from(&self, index: u32, expected: Owner) -> Result<()> {
        let mut state = self.inner.state.lock();
        check_owner(state.entry(index)?, index, expected)?;
        self.release_locked(&mut state, index)?;
        drop(state);
        self.inner.available.notify_one();
        Ok(())
    }

    fn release_locked(&self, state: &mut PoolState, index: u32) -> Result<()> {
        let home = self.inner.home;
        let entry = state.entry_mut(index)?;
        entry.slot.reset(home);
        if !entry.queued {
            entry.queued = true;
            state.ready.push_back(index);
        }
        trace!(pool = %self.inner.name, index, "released");
        Ok(())
    }

    /// Move a slot from `from` to `to`.
    ///
    /// Fails with `InvalidValue` if the index is out of range or `from` does
    /// not hold the slot. The slot leaves the ready list if it was there.
    pub fn transfer(&self, index: u32, from: Owner, to: Owner) -> Result<()> {
        let mut state = self.inner.state.lock();
        let entry = state.entry_mut(index)?;
        check_owner(entry, index, from)?;
        entry.slot.owner = to;
        if entry.queued {
            entry.queued = false;
            state.dequeue(index);
        }
        trace!(pool = %self.inner.name, index, %from, %to, "transferred");
        Ok(())
    }

    /// Move a slot from `from` to `to` and store new attributes in one step.
    pub fn transfer_with(&self, index: u32, from: Owner, to: Owner, attrs: BufferAttrs) -> Result<()> {
        let mut state = self.inner.state.lock();
        let entry = state.entry_mut(index)?;
        check_owner(entry, index, from)?;
        entry.slot.owner = to;
        entry.slot.attrs = attrs;
        if entry.queued {
            entry.queued = false;
            state.dequeue(index);
        }
        Ok(())
    }

    pub fn owner(&self, index: u32) -> Result<Owner> {
        Ok(self.inner.state.lock().entry(index)?.slot.owner)
    }

    pub fn attrs(&self, index: u32) -> Result<BufferAttrs> {
        Ok(self.inner.state.lock().entry(index)?.slot.attrs)
    }

    /// Overwrite the attributes of a slot held by `owner`.
    pub fn set_attrs(&self, index: u32, owner: Owner, attrs: BufferAttrs) -> Result<()> {
        let mut state = self.inner.state.lock();
        let entry = state.entry_mut(index)?;
        check_owner(entry, index, owner)?;
        entry.slot.attrs = attrs;
        Ok(())
    }

    /// Memory handle of a slot, regardless of owner.
    pub fn memory(&self, index: u32) -> Result<OwnedBuffer> {
        Ok(self.inner.state.lock().entry(index)?.slot.memory.clone())
    }

    /// Memory handle of a slot, only if `owner` holds it.
    pub fn memory_for(&self, index: u32, owner: Owner) -> Result<OwnedBuffer> {
        let state = self.inner.state.lock();
        let entry = state.entry(index)?;
        check_owner(entry, index, owner)?;
        Ok(entry.slot.memory.clone())
    }

    /// Copy of a slot's bookkeeping.
    pub fn slot(&self, index: u32) -> Result<BufferSlot> {
        Ok(self.inner.state.lock().entry(index)?.slot.clone())
    }

    /// Grow the pool to `target` slots, capped at the configured maximum.
    ///
    /// Returns the resulting slot count.
    pub fn grow(&self, target: usize) -> Result<usize> {
        let mut state = self.inner.state.lock();
        let target = target.min(self.inner.config.max_slots());
        let mut added = 0;
        while state.entries.len() < target {
            let index = self.push_slot(&mut state)?;
            state.entries[index as usize].queued = true;
            state.ready.push_back(index);
            added += 1;
        }
        let total = state.entries.len();
        drop(state);
        if added > 0 {
            debug!(pool = %self.inner.name, added, total, "pool grown");
            self.inner.available.notify_all();
        }
        Ok(total)
    }

    /// Shrink the pool towards `target` slots.
    ///
    /// Only idle slots at the end of the index range are freed, so indices
    /// stay stable, and the pool never drops below its busy count. Returns
    /// the resulting slot count.
    pub fn shrink(&self, target: usize) -> usize {
        let mut state = self.inner.state.lock();
        let floor = target.max(state.busy());
        while state.entries.len() > floor {
            let last = state.entries.len() - 1;
            if !state.entries[last].queued {
                break;
            }
            state.entries.pop();
            state.dequeue(last as u32);
        }
        let total = state.entries.len();
        debug!(pool = %self.inner.name, total, "pool shrunk");
        total
    }

    /// Reclaim every slot for the home owner and rebuild the ready list in
    /// index order. In-flight contents are discarded.
    pub fn reset_all(&self) {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let home = self.inner.home;
        state.ready.clear();
        for (index, entry) in state.entries.iter_mut().enumerate() {
            entry.slot.reset(home);
            entry.queued = true;
            state.ready.push_back(index as u32);
        }
        let total = state.entries.len();
        drop(guard);
        debug!(pool = %self.inner.name, total, "pool reset");
        self.inner.available.notify_all();
    }

    /// Reject all current and future acquirers with [`Error::Closed`].
    pub fn close(&self) {
        self.inner.state.lock().closed = true;
        self.inner.available.notify_all();
        debug!(pool = %self.inner.name, "pool closed");
    }

    /// Accept acquirers again after [`close`](Self::close).
    pub fn reopen(&self) {
        self.inner.state.lock().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Indices currently in the ready list, front first.
    pub fn ready_indices(&self) -> Vec<u32> {
        self.inner.state.lock().ready.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            total: state.entries.len(),
            ready: state.ready.len(),
            busy: state.busy(),
            max: self.inner.config.max_slots(),
        }
    }

    /// Allocate one slot at the end of the pool. The slot is not queued.
    fn push_slot(&self, state: &mut PoolState) -> Result<u32> {
        let index = state.entries.len() as u32;
        let memory = OwnedBuffer::new(self.inner.config.buffer_size, self.inner.memory_kind)?;
        state.entries.push(Entry {
            slot: BufferSlot::new(index, memory, self.inner.home),
            queued: false,
        });
        Ok(index)
    }
}

fn check_owner(entry: &Entry, index: u32, expected: Owner) -> Result<()> {
    if entry.slot.owner != expected {
        return Err(Error::invalid_value(format!(
            "buffer {index} is owned by {}, not {expected}",
            entry.slot.owner
        )));
    }
    Ok(())
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("name", &self.inner.name)
            .field("home", &self.inner.home)
            .field("stats", &self.stats())
            .finish()
    }
}
