//! Register window access.
//!
//! Everything the HAL writes to the coprocessor goes through
//! `RegisterWindow`, so the same lifecycle code drives real MMIO and the
//! register-file mock used by the host tests.

/// A mapped register window addressed by byte offset.
pub trait RegisterWindow: Send + Sync {
    fn read32(&self, offset: usize) -> u32;

    fn write32(&self, offset: usize, val: u32);

    /// Window size in bytes.
    fn len(&self) -> usize;
}

/// Uncached memory-mapped window backed by a raw pointer.
pub struct MmioWindow {
    base: *mut u8,
    len: usize,
}

unsafe impl Send for MmioWindow {}
unsafe impl Sync for MmioWindow {}

impl MmioWindow {
    /// # Safety
    /// `base` must point to `len` bytes of device memory mapped uncacheable,
    /// valid for the lifetime of the window.
    pub unsafe fn new(base: *mut u8, len: usize) -> Self {
        Self { base, len }
    }

    pub fn base(&self) -> *mut u8 {
        self.base
    }
}

impl RegisterWindow for MmioWindow {
    fn read32(&self, offset: usize) -> u32 {
        debug_assert!(offset + 4 <= self.len);
        unsafe { core::ptr::read_volatile(self.base.add(offset) as *const u32) }
    }

    fn write32(&self, offset: usize, val: u32) {
        debug_assert!(offset + 4 <= self.len);
        unsafe { core::ptr::write_volatile(self.base.add(offset) as *mut u32, val) }
    }

    fn len(&self) -> usize {
        self.len
    }
}

/// Zero a window one word at a time (TCM must be cleared before boot).
pub fn clear_window(window: &dyn RegisterWindow) {
    let mut offset = 0;
    while offset + 4 <= window.len() {
        window.write32(offset, 0);
        offset += 4;
    }
}
