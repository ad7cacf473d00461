/// Interrupt cause bits, doorbells and per-queue interrupt state.
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use static_assertions::const_assert;

bitflags::bitflags! {
    /// Device -> host interrupt causes, within one queue's 15-bit field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct N2hCause: u32 {
        const EMPTY_BUFFERS_SOS = 1 << 0;
        const DATA_QUEUE_0      = 1 << 1;
        const DATA_QUEUE_1      = 1 << 2;
        const TX_UNBLOCKED      = 1 << 11;
        const COREDUMP_COMPLETE = 1 << 14;
    }
}

impl N2hCause {
    /// Everything the bottom half knows how to service.
    pub const SUPPORTED: N2hCause = N2hCause::EMPTY_BUFFERS_SOS
        .union(N2hCause::DATA_QUEUE_0)
        .union(N2hCause::DATA_QUEUE_1)
        .union(N2hCause::TX_UNBLOCKED)
        .union(N2hCause::COREDUMP_COMPLETE);
}

// Queue 1 sits 15 bits up; its causes must not spill into queue 0's field.
const_assert!(N2hCause::SUPPORTED.bits() < 1 << 15);

/// Host -> device doorbell kinds.
///
/// Bit positions are part of the firmware ABI and must not be renumbered.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Doorbell {
    EmptyBufferQueue = 0,
    DataCommandQueue = 1,
    TxUnblocked = 11,
    TriggerCoredump = 15,
}

impl Doorbell {
    /// Precomputed pattern written to the C2C set register.
    pub const fn bits(self) -> u32 {
        1 << (self as u32)
    }
}

/// Result of the top-half handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// Interrupts masked; a poll is (or already was) scheduled.
    Handled,
    /// Not one of ours.
    None,
}

/// Interrupt state of one hardware queue.
pub struct InterruptContext {
    queue: usize,
    /// Offset of this queue's cause sub-field.
    shift: AtomicU32,
    /// Assigned IRQ line, 0 when unbound.
    irq: AtomicU32,
    /// Set while a bottom half is scheduled or running.
    poll_pending: AtomicBool,
}

impl InterruptContext {
    pub const fn new(queue: usize) -> Self {
        Self {
            queue,
            shift: AtomicU32::new(0),
            irq: AtomicU32::new(0),
            poll_pending: AtomicBool::new(false),
        }
    }

    pub fn queue(&self) -> usize {
        self.queue
    }

    pub fn shift(&self) -> u32 {
        self.shift.load(Ordering::Acquire)
    }

    pub fn irq(&self) -> Option<u32> {
        match self.irq.load(Ordering::Acquire) {
            0 => None,
            line => Some(line),
        }
    }

    pub fn is_poll_pending(&self) -> bool {
        self.poll_pending.load(Ordering::Acquire)
    }

    pub(crate) fn bind(&self, line: u32, shift: u32) {
        self.shift.store(shift, Ordering::Release);
        self.irq.store(line, Ordering::Release);
    }

    /// Returns the line that was bound, if any.
    pub(crate) fn unbind(&self) -> Option<u32> {
        self.poll_pending.store(false, Ordering::Release);
        match self.irq.swap(0, Ordering::AcqRel) {
            0 => None,
            line => Some(line),
        }
    }

    /// Claim the single bottom-half slot. `false` if one is already pending.
    pub(crate) fn try_schedule(&self) -> bool {
        self.poll_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn finish_poll(&self) {
        self.poll_pending.store(false, Ordering::Release);
    }
}
