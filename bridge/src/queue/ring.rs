/// Single-producer/single-consumer descriptor ring.
///
/// Host and device each own one index: the producer advances `head` after
/// filling a slot, the consumer advances `tail` after taking one. Indices are
/// free-running `u16`s and wrap; the slot is `index & mask`, so the size must
/// be a power of two no larger than 2^15.
use alloc::vec::Vec;

use super::buffer::Buffer;

pub struct DescRing {
    slots: Vec<Option<Buffer>>,
    mask: u16,
    /// Next slot the producer fills.
    head: u16,
    /// Next slot the consumer takes.
    tail: u16,
}

impl DescRing {
    /// Ring of `size` descriptors, rounded up to a power of two.
    pub fn new(size: u16) -> Self {
        let size = size.clamp(2, 1 << 15).next_power_of_two();
        let mut slots = Vec::with_capacity(size as usize);
        slots.resize_with(size as usize, || None);
        Self { slots, mask: size - 1, head: 0, tail: 0 }
    }

    pub fn size(&self) -> u16 {
        self.mask + 1
    }

    /// Descriptors currently owned by the consumer side.
    pub fn used(&self) -> u16 {
        self.head.wrapping_sub(self.tail)
    }

    pub fn free(&self) -> u16 {
        self.size() - self.used()
    }

    pub fn is_full(&self) -> bool {
        self.used() == self.size()
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Hand `buf` to the consumer. Gives the buffer back when full.
    pub fn push(&mut self, buf: Buffer) -> Result<(), Buffer> {
        if self.is_full() {
            return Err(buf);
        }
        let slot = (self.head & self.mask) as usize;
        self.slots[slot] = Some(buf);
        self.head = self.head.wrapping_add(1);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Buffer> {
        if self.is_empty() {
            return None;
        }
        let slot = (self.tail & self.mask) as usize;
        let buf = self.slots[slot].take();
        self.tail = self.tail.wrapping_add(1);
        buf
    }

    /// Drop everything still queued. Returns how many descriptors were freed.
    pub fn drain(&mut self) -> usize {
        let mut n = 0;
        while self.pop().is_some() {
            n += 1;
        }
        n
    }
}
