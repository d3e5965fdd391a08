//! Buffer slots and the memory they carry.
//!
//! A [`BufferSlot`] is one addressable unit of storage inside a
//! [`BufferPool`](crate::pool::BufferPool): a capacity-bounded
//! [`OwnedBuffer`], its [`BufferAttrs`] and the [`Owner`] tag that says which
//! role may touch it right now.

use crate::error::{Error, Result};
use bitflags::bitflags;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

bitflags! {
    /// Flags attached to a buffer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct BufferFlags: u32 {
        /// Last buffer of the stream in this direction.
        const EOS = 0x0001;
        /// Buffer holds a sync (key) frame.
        const SYNC_FRAME = 0x0002;
        /// Buffer holds codec configuration data rather than media.
        const CODEC_CONFIG = 0x0004;
    }
}

/// Metadata describing the payload of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferAttrs {
    /// Presentation timestamp in microseconds.
    pub timestamp: i64,
    /// Number of valid payload bytes.
    pub size: i32,
    /// Offset of the payload inside the buffer.
    pub offset: i32,
    pub flags: BufferFlags,
}

impl BufferAttrs {
    /// Attributes for a payload of `size` bytes at `timestamp`.
    pub fn new(timestamp: i64, size: i32) -> Self {
        Self {
            timestamp,
            size,
            offset: 0,
            flags: BufferFlags::empty(),
        }
    }

    /// Attributes of an empty end-of-stream marker.
    pub fn eos(timestamp: i64) -> Self {
        Self {
            timestamp,
            size: 0,
            offset: 0,
            flags: BufferFlags::EOS,
        }
    }

    pub fn with_flags(mut self, flags: BufferFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn is_eos(&self) -> bool {
        self.flags.contains(BufferFlags::EOS)
    }

    /// Validate this payload window against a buffer of `capacity` bytes.
    pub fn validate(&self, capacity: usize) -> Result<()> {
        if self.size < 0 || self.offset < 0 {
            return Err(Error::invalid_value(format!(
                "negative size/offset ({}/{})",
                self.size, self.offset
            )));
        }
        let end = self.offset as usize + self.size as usize;
        if end > capacity {
            return Err(Error::invalid_value(format!(
                "payload window {}..{} exceeds capacity {}",
                self.offset, end, capacity
            )));
        }
        Ok(())
    }
}

/// Role that currently holds a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Owner {
    /// The pipeline (or the engine behind it).
    Codec,
    /// The client application.
    User,
    /// The display surface.
    Surface,
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Codec => write!(f, "CODEC"),
            Owner::User => write!(f, "USER"),
            Owner::Surface => write!(f, "SURFACE"),
        }
    }
}

/// Backing storage of an [`OwnedBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    /// Plain host memory.
    Host,
    /// Memory shared with a display surface.
    Surface,
}

/// Capacity-bounded raw storage.
///
/// Cloning is cheap and yields another handle to the same bytes. Access is
/// serialized by an internal lock; the owner protocol of the enclosing pool
/// decides who is allowed to take it.
#[derive(Clone)]
pub struct OwnedBuffer {
    data: Arc<Mutex<Vec<u8>>>,
    kind: MemoryKind,
}

impl OwnedBuffer {
    /// Allocate `capacity` zeroed bytes.
    pub fn new(capacity: usize, kind: MemoryKind) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|e| Error::no_memory(format!("{capacity} bytes: {e}")))?;
        data.resize(capacity, 0);
        Ok(Self {
            data: Arc::new(Mutex::new(data)),
            kind,
        })
    }

    pub fn capacity(&self) -> usize {
        self.data.lock().len()
    }

    pub fn kind(&self) -> MemoryKind {
        self.kind
    }

    /// Copy `src` into the buffer starting at `offset`.
    pub fn write(&self, offset: usize, src: &[u8]) -> Result<()> {
        let mut data = self.data.lock();
        let end = offset
            .checked_add(src.len())
            .filter(|end| *end <= data.len())
            .ok_or_else(|| {
                Error::invalid_value(format!(
                    "write of {} bytes at {} exceeds capacity {}",
                    src.len(),
                    offset,
                    data.len()
                ))
            })?;
        data[offset..end].copy_from_slice(src);
        Ok(())
    }

    /// Copy the window described by `attrs` out of the buffer.
    pub fn read(&self, attrs: &BufferAttrs) -> Result<Vec<u8>> {
        let data = self.data.lock();
        attrs.validate(data.len())?;
        let start = attrs.offset as usize;
        Ok(data[start..start + attrs.size as usize].to_vec())
    }

    /// Run `f` with shared access to the whole buffer.
    pub fn with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let data = self.data.lock();
        f(&data)
    }

    /// Run `f` with exclusive access to the whole buffer.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut data = self.data.lock();
        f(&mut data)
    }

    /// Check if two handles refer to the same storage.
    pub fn ptr_eq(&self, other: &OwnedBuffer) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl fmt::Debug for OwnedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedBuffer")
            .field("capacity", &self.capacity())
            .field("kind", &self.kind)
            .finish()
    }
}

/// One slot of a buffer pool.
#[derive(Debug, Clone)]
pub struct BufferSlot {
    pub index: u32,
    pub memory: OwnedBuffer,
    pub owner: Owner,
    pub attrs: BufferAttrs,
}

impl BufferSlot {
    pub fn new(index: u32, memory: OwnedBuffer, owner: Owner) -> Self {
        Self {
            index,
            memory,
            owner,
            attrs: BufferAttrs::default(),
        }
    }

    /// Hand the slot back to `owner` with cleared attributes.
    pub fn reset(&mut self, owner: Owner) {
        self.owner = owner;
        self.attrs = BufferAttrs::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attrs_validate() {
        assert!(BufferAttrs::new(0, 16).validate(16).is_ok());
        assert!(BufferAttrs::new(0, 17).validate(16).is_err());
        let attrs = BufferAttrs {
            offset: -1,
            ..BufferAttrs::new(0, 4)
        };
        assert!(matches!(attrs.validate(16), Err(Error::InvalidValue(_))));
    }

    #[test]
    fn test_eos_attrs() {
        let attrs = BufferAttrs::eos(100);
        assert!(attrs.is_eos());
        assert_eq!(attrs.size, 0);
        assert!(!BufferAttrs::new(0, 1).is_eos());
        let attrs = BufferAttrs::new(0, 1).with_flags(BufferFlags::SYNC_FRAME);
        assert!(attrs.flags.contains(BufferFlags::SYNC_FRAME));
    }

    #[test]
    fn test_owned_buffer_write_read() {
        let buf = OwnedBuffer::new(8, MemoryKind::Host).unwrap();
        buf.write(2, &[1, 2, 3]).unwrap();
        let attrs = BufferAttrs {
            offset: 2,
            ..BufferAttrs::new(0, 3)
        };
        assert_eq!(buf.read(&attrs).unwrap(), vec![1, 2, 3]);
        assert!(buf.write(6, &[0; 3]).is_err());
        assert!(buf.write(usize::MAX, &[0]).is_err());
    }

    #[test]
    fn test_owned_buffer_shared_handle() {
        let a = OwnedBuffer::new(4, MemoryKind::Surface).unwrap();
        let b = a.clone();
        b.with_mut(|d| d[0] = 7);
        assert_eq!(a.with(|d| d[0]), 7);
        assert!(a.ptr_eq(&b));
        assert_eq!(a.kind(), MemoryKind::Surface);
    }

    #[test]
    fn test_slot_reset() {
        let mem = OwnedBuffer::new(4, MemoryKind::Host).unwrap();
        let mut slot = BufferSlot::new(3, mem, Owner::User);
        slot.attrs = BufferAttrs::eos(5);
        slot.reset(Owner::Codec);
        assert_eq!(slot.owner, Owner::Codec);
        assert_eq!(slot.attrs, BufferAttrs::default());
    }
}
