/// Transport buffers and their allocator seam.
use alloc::vec::Vec;
use core::fmt;

/// What a buffer carries, as seen by the bottom half.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Encoded control message (header + payload).
    Control = 0,
    /// Data-plane packet for one interface.
    Packet = 1,
    /// Receive buffer handed to the device to fill.
    Empty = 2,
}

/// A buffer travelling through a descriptor ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    pub kind: BufferKind,
    /// Interface the buffer belongs to (ignored for `Empty`).
    pub interface: u16,
    pub data: Vec<u8>,
}

impl Buffer {
    pub fn control(interface: u16, data: Vec<u8>) -> Self {
        Self { kind: BufferKind::Control, interface, data }
    }

    pub fn packet(interface: u16, data: Vec<u8>) -> Self {
        Self { kind: BufferKind::Packet, interface, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    InvalidSize,
    OutOfMemory,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::InvalidSize => write!(f, "invalid buffer size"),
            AllocError::OutOfMemory => write!(f, "out of buffer memory"),
        }
    }
}

/// Source of transport buffers.
pub trait BufferAllocator: Send + Sync {
    /// Zeroed buffer of exactly `len` bytes.
    fn alloc(&self, kind: BufferKind, len: usize) -> Result<Buffer, AllocError>;
}

/// Global-heap allocator. Reports exhaustion instead of aborting.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl BufferAllocator for HeapAllocator {
    fn alloc(&self, kind: BufferKind, len: usize) -> Result<Buffer, AllocError> {
        if len == 0 {
            return Err(AllocError::InvalidSize);
        }
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| AllocError::OutOfMemory)?;
        data.resize(len, 0);
        Ok(Buffer { kind, interface: 0, data })
    }
}
