//! Transport queue: host->device (H2N) and device->host (N2H) descriptor
//! rings over the shared-memory link.
//!
//! Every successful H2N enqueue rings the matching doorbell. N2H rings are
//! drained only from the bottom-half poll, never from the interrupt handler.

pub mod buffer;
pub mod ring;


pub use buffer::{AllocError, Buffer, BufferAllocator, BufferKind, HeapAllocator};
pub use ring::DescRing;

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

use crate::hal::{Context, Doorbell, MAX_QUEUES};

/// Descriptors per H2N ring.
pub const H2N_RING_SIZE: u16 = 128;
/// Descriptors per N2H ring.
pub const N2H_RING_SIZE: u16 = 256;

/// Host -> device rings.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H2nQueue {
    /// Receive buffers for the device to fill.
    EmptyBuffer = 0,
    /// Control messages.
    Command = 1,
    /// Data-plane packets.
    Data = 2,
}

impl H2nQueue {
    pub const ALL: [H2nQueue; 3] = [H2nQueue::EmptyBuffer, H2nQueue::Command, H2nQueue::Data];

    pub fn doorbell(self) -> Doorbell {
        match self {
            H2nQueue::EmptyBuffer => Doorbell::EmptyBufferQueue,
            H2nQueue::Command | H2nQueue::Data => Doorbell::DataCommandQueue,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Context is not `Initialized`.
    NotReady,
    /// No free descriptor. Retry after a tx-unblocked cause.
    Full,
    /// Copy buffer for a control message could not be allocated.
    AllocFailed,
    InvalidQueue,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::NotReady => write!(f, "coprocessor not initialized"),
            QueueError::Full => write!(f, "descriptor ring full"),
            QueueError::AllocFailed => write!(f, "buffer allocation failed"),
            QueueError::InvalidQueue => write!(f, "no such queue"),
        }
    }
}

/// Transport counters at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub tx_control: u64,
    pub tx_packets: u64,
    pub tx_empty_buffers: u64,
    pub rx_buffers: u64,
    pub alloc_failed: u64,
    pub queue_full: u64,
}

pub struct TransportQueue {
    ctx: Arc<Context>,
    alloc: Box<dyn BufferAllocator>,
    h2n: [Mutex<DescRing>; 3],
    n2h: [Mutex<DescRing>; MAX_QUEUES],
    tx_control: AtomicU64,
    tx_packets: AtomicU64,
    tx_empty_buffers: AtomicU64,
    rx_buffers: AtomicU64,
    alloc_failed: AtomicU64,
    queue_full: AtomicU64,
}

impl TransportQueue {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self::with_allocator(ctx, Box::new(HeapAllocator))
    }

    pub fn with_allocator(ctx: Arc<Context>, alloc: Box<dyn BufferAllocator>) -> Self {
        Self {
            ctx,
            alloc,
            h2n: [
                Mutex::new(DescRing::new(H2N_RING_SIZE)),
                Mutex::new(DescRing::new(H2N_RING_SIZE)),
                Mutex::new(DescRing::new(H2N_RING_SIZE)),
            ],
            n2h: [
                Mutex::new(DescRing::new(N2H_RING_SIZE)),
                Mutex::new(DescRing::new(N2H_RING_SIZE)),
            ],
            tx_control: AtomicU64::new(0),
            tx_packets: AtomicU64::new(0),
            tx_empty_buffers: AtomicU64::new(0),
            rx_buffers: AtomicU64::new(0),
            alloc_failed: AtomicU64::new(0),
            queue_full: AtomicU64::new(0),
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    fn check_ready(&self) -> Result<(), QueueError> {
        if self.ctx.is_initialized() {
            Ok(())
        } else {
            Err(QueueError::NotReady)
        }
    }

    // ---- Host -> device ----

    /// Place `buf` on an H2N ring and ring its doorbell.
    pub fn enqueue(&self, queue: H2nQueue, buf: Buffer) -> Result<(), QueueError> {
        self.check_ready()?;

        let pushed = self.h2n[queue as usize].lock().push(buf);
        if pushed.is_err() {
            self.queue_full.fetch_add(1, Ordering::Relaxed);
            log::trace!("core{}: h2n {:?} full", self.ctx.id(), queue);
            return Err(QueueError::Full);
        }

        // Doorbell outside the ring lock.
        self.ctx.send_doorbell(queue.doorbell());
        Ok(())
    }

    /// Copy an encoded control message into a fresh buffer and send it.
    pub fn send_control(&self, interface: u16, bytes: &[u8]) -> Result<(), QueueError> {
        self.check_ready()?;

        let mut buf = match self.alloc.alloc(BufferKind::Control, bytes.len()) {
            Ok(buf) => buf,
            Err(e) => {
                self.alloc_failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("core{}: control buffer for if {}: {}", self.ctx.id(), interface, e);
                return Err(QueueError::AllocFailed);
            }
        };
        buf.interface = interface;
        buf.data.copy_from_slice(bytes);

        self.enqueue(H2nQueue::Command, buf)?;
        self.tx_control.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Hand a packet to the device's data ring. The packet is consumed either way.
    pub fn send_packet(&self, interface: u16, data: Vec<u8>) -> Result<(), QueueError> {
        self.enqueue(H2nQueue::Data, Buffer::packet(interface, data))?;
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Replenish up to `count` receive buffers of `len` bytes.
    ///
    /// Stops at the first full ring or allocation failure; returns how many
    /// were posted, or the stopping error if none were. The doorbell rings
    /// once per buffer posted.
    pub fn post_empty_buffers(&self, count: usize, len: usize) -> Result<usize, QueueError> {
        self.check_ready()?;

        let mut posted = 0;
        let mut stopped = None;
        while posted < count {
            let buf = match self.alloc.alloc(BufferKind::Empty, len) {
                Ok(buf) => buf,
                Err(_) => {
                    self.alloc_failed.fetch_add(1, Ordering::Relaxed);
                    stopped = Some(QueueError::AllocFailed);
                    break;
                }
            };
            match self.enqueue(H2nQueue::EmptyBuffer, buf) {
                Ok(()) => posted += 1,
                Err(QueueError::Full) => {
                    stopped = Some(QueueError::Full);
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        if posted == 0 {
            if let Some(e) = stopped {
                return Err(e);
            }
        }
        self.tx_empty_buffers.fetch_add(posted as u64, Ordering::Relaxed);
        Ok(posted)
    }

    pub fn h2n_free(&self, queue: H2nQueue) -> u16 {
        self.h2n[queue as usize].lock().free()
    }

    pub fn h2n_full(&self, queue: H2nQueue) -> bool {
        self.h2n[queue as usize].lock().is_full()
    }

    // ---- Device -> host ----

    /// Next buffer from N2H ring `queue`, in arrival order.
    pub fn dequeue(&self, queue: usize) -> Option<Buffer> {
        if queue >= self.ctx.num_queue() {
            return None;
        }
        let buf = self.n2h[queue].lock().pop();
        if buf.is_some() {
            self.rx_buffers.fetch_add(1, Ordering::Relaxed);
        }
        buf
    }

    pub fn n2h_pending(&self, queue: usize) -> usize {
        match self.n2h.get(queue) {
            Some(ring) => ring.lock().used() as usize,
            None => 0,
        }
    }

    /// Drop every queued descriptor on both directions.
    pub fn reset(&self) {
        let mut dropped = 0;
        for ring in self.h2n.iter().chain(self.n2h.iter()) {
            dropped += ring.lock().drain();
        }
        if dropped > 0 {
            log::debug!("core{}: dropped {} queued descriptors", self.ctx.id(), dropped);
        }
    }

    /// Device side of the link.
    pub fn device(&self) -> DeviceEnd<'_> {
        DeviceEnd { queue: self }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            tx_control: self.tx_control.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            tx_empty_buffers: self.tx_empty_buffers.load(Ordering::Relaxed),
            rx_buffers: self.rx_buffers.load(Ordering::Relaxed),
            alloc_failed: self.alloc_failed.load(Ordering::Relaxed),
            queue_full: self.queue_full.load(Ordering::Relaxed),
        }
    }
}

/// The firmware's view of the rings: consumes H2N, produces N2H.
///
/// A real device does this through shared memory; this handle exists for
/// simulated firmware and loopback tests.
pub struct DeviceEnd<'a> {
    queue: &'a TransportQueue,
}

impl DeviceEnd<'_> {
    pub fn take_h2n(&self, ring: H2nQueue) -> Option<Buffer> {
        self.queue.h2n[ring as usize].lock().pop()
    }

    /// Post a buffer towards the host. Gives it back when the ring is full.
    pub fn post_n2h(&self, queue: usize, buf: Buffer) -> Result<(), Buffer> {
        match self.queue.n2h.get(queue) {
            Some(ring) => ring.lock().push(buf),
            None => Err(buf),
        }
    }
}
