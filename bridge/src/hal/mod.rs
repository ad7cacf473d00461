//! Coprocessor lifecycle: clock/reset bring-up, IRQ registration, interrupt
//! cause masking and doorbells.
//!
//! State machine: `Uninit -> Resetting -> Initialized`, with `Error` as the
//! terminal state of a failed bring-up. Only `teardown` returns a context to
//! `Uninit`.

pub mod clock;
pub mod config;
pub mod irq;
pub mod mmio;
pub mod platform;
pub mod regs;

#[cfg(test)]
mod tests;

pub use clock::{ClockProfile, FrequencyScales, ScaleWindow};
pub use config::{FeatureSet, PlatformConfig, MAX_QUEUES};
pub use irq::{Doorbell, InterruptContext, IrqReturn, N2hCause};
pub use mmio::{MmioWindow, RegisterWindow};
pub use platform::{Clock, CommonInit, MappedRegions, Platform, PlatformError, ResetLine};

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};
use spin::{Mutex, RwLock};

use platform::LOCK_RETRIES;

/// Settle time between reset line releases.
const RESET_SETTLE_MS: u32 = 1;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninit = 0,
    Resetting = 1,
    Initialized = 2,
    Error = 3,
}

impl LifecycleState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => LifecycleState::Resetting,
            2 => LifecycleState::Initialized,
            3 => LifecycleState::Error,
            _ => LifecycleState::Uninit,
        }
    }
}

/// Bring-up failures. Nothing stays enabled after one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    ClockUnavailable,
    ResetTimeout(ResetLine),
    RegionMapFailed,
    FirmwareLoad,
    FirmwareTruncated(usize),
    IrqRequestFailed(u32),
    InvalidConfig(&'static str),
    /// Bring-up attempted from a state other than `Uninit`.
    InvalidState(LifecycleState),
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::ClockUnavailable => write!(f, "core clock unavailable"),
            InitError::ResetTimeout(line) => write!(f, "reset line {:?} did not release", line),
            InitError::RegionMapFailed => write!(f, "register region mapping failed"),
            InitError::FirmwareLoad => write!(f, "firmware load failed"),
            InitError::FirmwareTruncated(size) => write!(f, "firmware truncated: {} bytes", size),
            InitError::IrqRequestFailed(line) => write!(f, "irq {} request failed", line),
            InitError::InvalidConfig(why) => write!(f, "invalid platform config: {}", why),
            InitError::InvalidState(s) => write!(f, "bring-up not allowed in state {:?}", s),
        }
    }
}

/// One coprocessor instance.
///
/// Created at probe, destroyed at remove. Every other component holds it
/// behind an `Arc` and only reads through it; mutation of the lifecycle is
/// confined to `bring_up` and `teardown`.
pub struct Context {
    id: u8,
    state: AtomicU8,
    platform: Arc<dyn Platform>,
    config: PlatformConfig,
    regions: RwLock<Option<MappedRegions>>,
    int_ctx: [InterruptContext; MAX_QUEUES],
    scales: Mutex<Option<FrequencyScales>>,
}

impl Context {
    pub fn new(platform: Arc<dyn Platform>, config: PlatformConfig) -> Self {
        Self {
            id: config.id,
            state: AtomicU8::new(LifecycleState::Uninit as u8),
            platform,
            config,
            regions: RwLock::new(None),
            int_ctx: [InterruptContext::new(0), InterruptContext::new(1)],
            scales: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == LifecycleState::Initialized
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn num_queue(&self) -> usize {
        self.config.num_queue
    }

    pub fn interrupt_context(&self, queue: usize) -> Option<&InterruptContext> {
        if queue < self.config.num_queue {
            self.int_ctx.get(queue)
        } else {
            None
        }
    }

    pub fn frequency_scales(&self) -> Option<FrequencyScales> {
        *self.scales.lock()
    }

    pub fn is_mapped(&self) -> bool {
        self.regions.read().is_some()
    }

    fn set_state(&self, state: LifecycleState) {
        self.state.store(state as u8, Ordering::Release);
    }

    // ---- Bring-up ----

    /// Bring the core out of reset and enable its interrupts.
    ///
    /// On failure every IRQ requested so far is freed, the windows are
    /// unmapped and the context is left in `Error` until `teardown`.
    pub fn bring_up(&self, common: &CommonInit) -> Result<(), InitError> {
        let state = self.state();
        if state != LifecycleState::Uninit {
            return Err(InitError::InvalidState(state));
        }
        self.config.validate()?;

        self.set_state(LifecycleState::Resetting);
        log::info!("core{}: resetting", self.id);

        match self.bring_up_inner(common) {
            Ok(()) => {
                self.set_state(LifecycleState::Initialized);
                for q in 0..self.config.num_queue {
                    self.enable_interrupts(q, N2hCause::SUPPORTED);
                }
                log::info!("core{}: out of reset, {} queue(s) live", self.id, self.config.num_queue);
                Ok(())
            }
            Err(e) => {
                log::warn!("core{}: bring-up failed: {}", self.id, e);
                self.release_irqs();
                self.unmap();
                self.set_state(LifecycleState::Error);
                Err(e)
            }
        }
    }

    fn bring_up_inner(&self, common: &CommonInit) -> Result<(), InitError> {
        let platform = &*self.platform;

        // 1. Shared power/clock steps (first instance only)
        common.ensure(platform)?;

        // 2. Map windows and clear TCM
        let regions = platform
            .map_regions(self.id)
            .map_err(|_| InitError::RegionMapFailed)?;
        mmio::clear_window(&*regions.tcm);
        *self.regions.write() = Some(regions);

        // 3. Firmware
        let size = platform
            .load_firmware(self.id, self.config.load_addr)
            .map_err(|_| InitError::FirmwareLoad)?;
        if size < config::MIN_FIRMWARE_SIZE {
            return Err(InitError::FirmwareTruncated(size));
        }
        log::info!("core{}: firmware {} bytes at {:#x}", self.id, size, self.config.load_addr);

        // 4. Clock profile
        let scales = clock::apply_profile(platform, self.id, &self.config.clock)?;
        *self.scales.lock() = Some(scales);

        // 5. IRQ lines
        for q in 0..self.config.num_queue {
            self.register_queue_irq(q)?;
        }

        // 6. Reset lines, then the core itself
        self.release_reset_lines()?;
        self.program_core();
        Ok(())
    }

    /// Bind queue `queue` to its IRQ line and cause shift.
    pub fn register_queue_irq(&self, queue: usize) -> Result<(), InitError> {
        if queue >= self.config.num_queue {
            return Err(InitError::InvalidConfig("queue index out of range"));
        }
        let line = self.config.irqs[queue];
        let shift = self.config.shift_factors[queue];
        let int_ctx = &self.int_ctx[queue];

        int_ctx.bind(line, shift);
        if self.platform.request_irq(line, self.id, queue).is_err() {
            int_ctx.unbind();
            return Err(InitError::IrqRequestFailed(line));
        }
        log::debug!("core{}: queue {} on irq {} shift {}", self.id, queue, line, shift);
        Ok(())
    }

    fn release_reset_lines(&self) -> Result<(), InitError> {
        for line in ResetLine::SEQUENCE {
            self.platform
                .deassert_reset(self.id, line)
                .map_err(|_| InitError::ResetTimeout(line))?;

            let mut released = false;
            for _ in 0..LOCK_RETRIES {
                self.platform.delay_ms(RESET_SETTLE_MS);
                if self.platform.reset_released(self.id, line) {
                    released = true;
                    break;
                }
            }
            if !released {
                return Err(InitError::ResetTimeout(line));
            }
        }
        Ok(())
    }

    /// Boot address and base configuration; core reset is released last.
    fn program_core(&self) {
        let regions = self.regions.read();
        let Some(regions) = regions.as_ref() else {
            return;
        };
        let w = &*regions.control;
        w.write32(regs::RESET_CTRL, 1);
        w.write32(regs::CORE_AMC, regs::AMC_ENABLE);
        w.write32(regs::CORE_BAR, regs::BAR_DEFAULT);
        w.write32(regs::CORE_BOOT_ADDR, self.config.load_addr);
        w.write32(regs::CORE_INT_STAT2_TYPE, regs::C2C_LEVEL_SENSITIVE);
        w.write32(regs::CORE_IFETCH_RANGE, regs::IFETCH_RANGE_DEFAULT);
        w.write32(regs::RESET_CTRL, 0);
    }

    // ---- Teardown ----

    /// Mask every queue and free its IRQ line. Idempotent.
    pub fn quiesce(&self) {
        for q in 0..self.config.num_queue {
            self.disable_interrupts(q, N2hCause::SUPPORTED);
        }
        self.release_irqs();
    }

    /// Interrupts off, IRQs freed, windows unmapped, back to `Uninit`.
    ///
    /// Callers unhook anything that still references the windows between
    /// `quiesce` and `teardown`.
    pub fn teardown(&self) {
        self.quiesce();
        self.unmap();
        *self.scales.lock() = None;
        self.set_state(LifecycleState::Uninit);
        log::info!("core{}: all resources released", self.id);
    }

    fn release_irqs(&self) {
        for int_ctx in &self.int_ctx {
            if let Some(line) = int_ctx.unbind() {
                self.platform.free_irq(line);
            }
        }
    }

    fn unmap(&self) {
        if let Some(regions) = self.regions.write().take() {
            self.platform.unmap_regions(self.id, regions);
        }
    }

    // ---- Interrupt cause / mask ----

    fn with_control<R>(&self, f: impl FnOnce(&dyn RegisterWindow) -> R) -> Option<R> {
        let regions = self.regions.read();
        regions.as_ref().map(|r| f(&*r.control))
    }

    fn shift(&self, queue: usize) -> Option<u32> {
        self.interrupt_context(queue).map(|c| c.shift())
    }

    /// Unmask `mask` causes of `queue`.
    pub fn enable_interrupts(&self, queue: usize, mask: N2hCause) {
        if let Some(shift) = self.shift(queue) {
            self.with_control(|w| w.write32(regs::N2H_INTR_MASK_SET, mask.bits() << shift));
        }
    }

    /// Mask `mask` causes of `queue`.
    pub fn disable_interrupts(&self, queue: usize, mask: N2hCause) {
        if let Some(shift) = self.shift(queue) {
            self.with_control(|w| w.write32(regs::N2H_INTR_MASK_CLR, mask.bits() << shift));
        }
    }

    /// Pending causes of `queue`. Sticky until `clear_cause`.
    pub fn read_cause(&self, queue: usize) -> N2hCause {
        let Some(shift) = self.shift(queue) else {
            return N2hCause::empty();
        };
        self.with_control(|w| {
            let raw = (w.read32(regs::N2H_INTR_STATUS) >> shift) & regs::CAUSE_FIELD_MASK;
            N2hCause::from_bits_retain(raw)
        })
        .unwrap_or(N2hCause::empty())
    }

    pub fn clear_cause(&self, queue: usize, mask: N2hCause) {
        if mask.is_empty() {
            return;
        }
        if let Some(shift) = self.shift(queue) {
            self.with_control(|w| w.write32(regs::N2H_INTR_CLR, mask.bits() << shift));
        }
    }

    /// Raise a device-side interrupt.
    pub fn send_doorbell(&self, kind: Doorbell) {
        self.with_control(|w| w.write32(regs::C2C_INTR_SET, kind.bits()));
    }

    // ---- Top half ----

    /// Hardware interrupt entry for `queue`.
    ///
    /// Masks the queue before scheduling so the line cannot re-fire until
    /// the bottom half re-enables it. Never blocks.
    pub fn handle_irq(&self, queue: usize) -> IrqReturn {
        let Some(int_ctx) = self.interrupt_context(queue) else {
            return IrqReturn::None;
        };
        if int_ctx.irq().is_none() {
            return IrqReturn::None;
        }
        self.disable_interrupts(queue, N2hCause::SUPPORTED);
        if int_ctx.try_schedule() {
            self.platform.schedule_poll(self.id, queue);
        }
        IrqReturn::Handled
    }

    /// End of a bottom-half pass that drained its queue.
    pub fn complete_poll(&self, queue: usize) {
        if let Some(int_ctx) = self.interrupt_context(queue) {
            int_ctx.finish_poll();
            if self.is_initialized() {
                self.enable_interrupts(queue, N2hCause::SUPPORTED);
            }
        }
    }
}
