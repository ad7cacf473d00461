/// In-memory platform for host tests.
///
/// `MockPlatform` records every hook the lifecycle calls, in order, and can be
/// told to fail any step. `MockWindow` is a register file with the
/// set/clear semantics of the interrupt registers. Time only moves when
/// something waits: every `relax` or `delay_ms` advances the clock.
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use spin::Mutex;

use crate::hal::platform::{Clock, MappedRegions, Platform, PlatformError, ResetLine};
use crate::hal::{regs, RegisterWindow, MAX_QUEUES};
use crate::msg::{ResponseKind, HEADER_LEN};
use crate::netdev::{HostNetDevice, StatsSnapshot};
use crate::queue::{
    AllocError, Buffer, BufferAllocator, BufferKind, H2nQueue, HeapAllocator, TransportQueue,
};

pub const CONTROL_WINDOW_LEN: usize = 0x100;
pub const TCM_WINDOW_LEN: usize = 0x100;
pub const MOCK_FIRMWARE_SIZE: usize = 128 * 1024;

// ---- Register file ----

struct WindowState {
    regs: Vec<u32>,
    writes: Vec<(usize, u32)>,
}

/// Shared register file. Clones see the same registers.
#[derive(Clone)]
pub struct MockWindow {
    state: Arc<Mutex<WindowState>>,
    control: bool,
}

impl MockWindow {
    /// Plain memory window.
    pub fn memory(len: usize) -> Self {
        Self::with_kind(len, false)
    }

    /// Control window: interrupt set/clear/mask registers act on their targets.
    pub fn control(len: usize) -> Self {
        Self::with_kind(len, true)
    }

    fn with_kind(len: usize, control: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(WindowState { regs: vec![0; len / 4], writes: Vec::new() })),
            control,
        }
    }

    pub fn reg(&self, offset: usize) -> u32 {
        self.state.lock().regs[offset / 4]
    }

    pub fn set_reg(&self, offset: usize, val: u32) {
        self.state.lock().regs[offset / 4] = val;
    }

    /// Device side: assert cause bits (already shifted into place).
    pub fn raise(&self, bits: u32) {
        let mut s = self.state.lock();
        s.regs[regs::N2H_INTR_STATUS / 4] |= bits;
    }

    pub fn n2h_status(&self) -> u32 {
        self.reg(regs::N2H_INTR_STATUS)
    }

    pub fn n2h_mask(&self) -> u32 {
        self.reg(regs::N2H_INTR_MASK)
    }

    /// Every write, in order.
    pub fn writes(&self) -> Vec<(usize, u32)> {
        self.state.lock().writes.clone()
    }

    /// Values written to `offset`, in order.
    pub fn writes_to(&self, offset: usize) -> Vec<u32> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|(o, _)| *o == offset)
            .map(|(_, v)| *v)
            .collect()
    }

    /// Doorbell patterns rung so far.
    pub fn doorbells(&self) -> Vec<u32> {
        self.writes_to(regs::C2C_INTR_SET)
    }

    pub fn clear_log(&self) {
        self.state.lock().writes.clear();
    }
}

impl RegisterWindow for MockWindow {
    fn read32(&self, offset: usize) -> u32 {
        self.state.lock().regs[offset / 4]
    }

    fn write32(&self, offset: usize, val: u32) {
        let mut s = self.state.lock();
        s.writes.push((offset, val));
        if !self.control {
            s.regs[offset / 4] = val;
            return;
        }
        match offset {
            regs::N2H_INTR_MASK_SET => s.regs[regs::N2H_INTR_MASK / 4] |= val,
            regs::N2H_INTR_MASK_CLR => s.regs[regs::N2H_INTR_MASK / 4] &= !val,
            regs::N2H_INTR_CLR => s.regs[regs::N2H_INTR_STATUS / 4] &= !val,
            regs::C2C_INTR_SET => s.regs[regs::C2C_INTR_STATUS / 4] |= val,
            _ => s.regs[offset / 4] = val,
        }
    }

    fn len(&self) -> usize {
        self.state.lock().regs.len() * 4
    }
}

// ---- Platform ----

/// Platform hook invocations, as recorded by [`MockPlatform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    CommonClockInit,
    SetRate(u8, u32),
    EnableClock(u8),
    DeassertReset(u8, ResetLine),
    MapRegions(u8),
    UnmapRegions(u8),
    LoadFirmware(u8, u32),
    RequestIrq(u32, usize),
    FreeIrq(u32),
    SchedulePoll(u8, usize),
    Delay(u32),
}

/// Step to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    CommonClock,
    PllNeverLocks,
    EnableClock,
    Map,
    Firmware,
    Irq(u32),
    StuckReset(ResetLine),
}

pub struct MockPlatform {
    calls: Mutex<Vec<Call>>,
    faults: Mutex<Vec<Fault>>,
    /// Rates the clock accepts; empty accepts everything.
    rates: Mutex<Vec<u32>>,
    now: AtomicU64,
    tick: AtomicU64,
    firmware_size: AtomicUsize,
    control: MockWindow,
    tcm: MockWindow,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            faults: Mutex::new(Vec::new()),
            rates: Mutex::new(Vec::new()),
            now: AtomicU64::new(0),
            tick: AtomicU64::new(1),
            firmware_size: AtomicUsize::new(MOCK_FIRMWARE_SIZE),
            control: MockWindow::control(CONTROL_WINDOW_LEN),
            tcm: MockWindow::memory(TCM_WINDOW_LEN),
        }
    }

    pub fn inject(&self, fault: Fault) {
        self.faults.lock().push(fault);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    fn faulted(&self, fault: Fault) -> bool {
        self.faults.lock().contains(&fault)
    }

    pub fn accept_rates(&self, rates: &[u32]) {
        *self.rates.lock() = rates.to_vec();
    }

    pub fn set_firmware_size(&self, size: usize) {
        self.firmware_size.store(size, Ordering::Relaxed);
    }

    /// Milliseconds added by every `relax`.
    pub fn set_tick(&self, ms: u64) {
        self.tick.store(ms, Ordering::Relaxed);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn control(&self) -> &MockWindow {
        &self.control
    }

    pub fn tcm(&self) -> &MockWindow {
        &self.tcm
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(*c)).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockPlatform {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }

    fn relax(&self) {
        self.now.fetch_add(self.tick.load(Ordering::Relaxed), Ordering::Relaxed);
        core::hint::spin_loop();
    }
}

impl Platform for MockPlatform {
    fn common_clock_init(&self) -> Result<(), PlatformError> {
        self.record(Call::CommonClockInit);
        if self.faulted(Fault::CommonClock) {
            return Err(PlatformError::Clock);
        }
        Ok(())
    }

    fn pll_locked(&self) -> bool {
        !self.faulted(Fault::PllNeverLocks)
    }

    fn set_core_clock_rate(&self, id: u8, hz: u32) -> Result<(), PlatformError> {
        self.record(Call::SetRate(id, hz));
        let rates = self.rates.lock();
        if rates.is_empty() || rates.contains(&hz) {
            Ok(())
        } else {
            Err(PlatformError::Clock)
        }
    }

    fn enable_core_clock(&self, id: u8) -> Result<(), PlatformError> {
        self.record(Call::EnableClock(id));
        if self.faulted(Fault::EnableClock) {
            return Err(PlatformError::Clock);
        }
        Ok(())
    }

    fn deassert_reset(&self, id: u8, line: ResetLine) -> Result<(), PlatformError> {
        self.record(Call::DeassertReset(id, line));
        Ok(())
    }

    fn reset_released(&self, _id: u8, line: ResetLine) -> bool {
        !self.faulted(Fault::StuckReset(line))
    }

    fn map_regions(&self, id: u8) -> Result<MappedRegions, PlatformError> {
        self.record(Call::MapRegions(id));
        if self.faulted(Fault::Map) {
            return Err(PlatformError::Map);
        }
        Ok(MappedRegions {
            control: Box::new(self.control.clone()),
            tcm: Box::new(self.tcm.clone()),
        })
    }

    fn unmap_regions(&self, id: u8, _regions: MappedRegions) {
        self.record(Call::UnmapRegions(id));
    }

    fn load_firmware(&self, id: u8, load_addr: u32) -> Result<usize, PlatformError> {
        self.record(Call::LoadFirmware(id, load_addr));
        if self.faulted(Fault::Firmware) {
            return Err(PlatformError::Firmware);
        }
        Ok(self.firmware_size.load(Ordering::Relaxed))
    }

    fn request_irq(&self, line: u32, _id: u8, queue: usize) -> Result<(), PlatformError> {
        self.record(Call::RequestIrq(line, queue));
        if self.faulted(Fault::Irq(line)) {
            return Err(PlatformError::Irq);
        }
        Ok(())
    }

    fn free_irq(&self, line: u32) {
        self.record(Call::FreeIrq(line));
    }

    fn schedule_poll(&self, id: u8, queue: usize) {
        debug_assert!(queue < MAX_QUEUES);
        self.record(Call::SchedulePoll(id, queue));
    }

    fn delay_ms(&self, ms: u32) {
        self.record(Call::Delay(ms));
        self.now.fetch_add(ms as u64, Ordering::Relaxed);
    }
}

// ---- Host net device ----

pub struct MockNetDevice {
    name: &'static str,
    ifindex: u32,
    open: AtomicBool,
    started: AtomicU32,
    restored: AtomicU32,
    carrier: AtomicBool,
    stats: Mutex<StatsSnapshot>,
}

impl MockNetDevice {
    pub fn new(name: &'static str, ifindex: u32) -> Self {
        Self {
            name,
            ifindex,
            open: AtomicBool::new(false),
            started: AtomicU32::new(0),
            restored: AtomicU32::new(0),
            carrier: AtomicBool::new(false),
            stats: Mutex::new(StatsSnapshot::default()),
        }
    }

    pub fn opened(self) -> Self {
        self.open.store(true, Ordering::Relaxed);
        self
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::Relaxed);
    }

    pub fn started(&self) -> u32 {
        self.started.load(Ordering::Relaxed)
    }

    pub fn restored(&self) -> u32 {
        self.restored.load(Ordering::Relaxed)
    }

    pub fn carrier(&self) -> bool {
        self.carrier.load(Ordering::Relaxed)
    }

    pub fn set_stats(&self, stats: StatsSnapshot) {
        *self.stats.lock() = stats;
    }
}

impl HostNetDevice for MockNetDevice {
    fn name(&self) -> &str {
        self.name
    }

    fn ifindex(&self) -> u32 {
        self.ifindex
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    fn start_data_plane(&self, _interface: u16) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    fn restore_data_plane(&self, _interface: u16) {
        self.restored.fetch_add(1, Ordering::Relaxed);
    }

    fn set_carrier(&self, up: bool) {
        self.carrier.store(up, Ordering::Relaxed);
    }

    fn stats(&self) -> StatsSnapshot {
        *self.stats.lock()
    }
}

// ---- Allocation ----

/// Allocator that succeeds `budget` times, then reports out of memory.
pub struct FailingAllocator {
    remaining: AtomicUsize,
}

impl FailingAllocator {
    pub fn after(budget: usize) -> Self {
        Self { remaining: AtomicUsize::new(budget) }
    }

    pub fn always() -> Self {
        Self::after(0)
    }
}

impl BufferAllocator for FailingAllocator {
    fn alloc(&self, kind: BufferKind, len: usize) -> Result<Buffer, AllocError> {
        let ok = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if !ok {
            return Err(AllocError::OutOfMemory);
        }
        HeapAllocator.alloc(kind, len)
    }
}

// ---- Simulated firmware ----

/// Copy of an encoded request turned into a response of `kind`.
pub fn respond(request: &[u8], kind: ResponseKind, error: u32) -> Vec<u8> {
    let mut out = request.to_vec();
    if out.len() >= HEADER_LEN {
        out[12..16].copy_from_slice(&(kind as u32).to_le_bytes());
        out[16..20].copy_from_slice(&error.to_le_bytes());
    }
    out
}

/// Answer every queued command with `kind` on N2H ring `queue`.
/// Returns how many were answered.
pub fn answer_commands(transport: &TransportQueue, queue: usize, kind: ResponseKind, error: u32) -> usize {
    let device = transport.device();
    let mut n = 0;
    while let Some(cmd) = device.take_h2n(H2nQueue::Command) {
        let reply = Buffer::control(cmd.interface, respond(&cmd.data, kind, error));
        if device.post_n2h(queue, reply).is_err() {
            break;
        }
        n += 1;
    }
    n
}

// ---- Device thread (host tests only) ----

#[cfg(test)]
pub(crate) use self::threads::{answer_in_background, WallClock};

#[cfg(test)]
mod threads {
    extern crate std;

    use alloc::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use super::respond;
    use crate::dispatch::DispatchCore;
    use crate::hal::Clock;
    use crate::msg::ResponseKind;
    use crate::queue::H2nQueue;

    /// Real elapsed time; waits yield the thread.
    pub struct WallClock(Instant);

    impl WallClock {
        pub fn new() -> Self {
            Self(Instant::now())
        }
    }

    impl Clock for WallClock {
        fn now_ms(&self) -> u64 {
            self.0.elapsed().as_millis() as u64
        }

        fn relax(&self) {
            thread::yield_now();
        }
    }

    /// Firmware thread: answer `n` commands one at a time with `kind`.
    /// Returns how many it answered before giving up after five seconds.
    pub fn answer_in_background(
        core: Arc<DispatchCore>,
        n: usize,
        kind: ResponseKind,
        error: u32,
    ) -> thread::JoinHandle<usize> {
        thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(5);
            let device = core.transport().device();
            let mut answered = 0;
            while answered < n && Instant::now() < deadline {
                let Some(cmd) = device.take_h2n(H2nQueue::Command) else {
                    thread::yield_now();
                    continue;
                };
                // Synchronous callers serialise: never two requests in flight.
                assert!(device.take_h2n(H2nQueue::Command).is_none());
                core.dispatch_inbound(&respond(&cmd.data, kind, error)).unwrap();
                answered += 1;
            }
            answered
        })
    }
}
