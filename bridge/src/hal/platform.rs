/// Platform seams consumed by the lifecycle manager.
///
/// Clock trees, reset controllers, region mapping, firmware loading and IRQ
/// plumbing are board specific. The HAL only sequences them; a board crate
/// (or the mock in tests) implements the traits below.
use alloc::boxed::Box;
use core::fmt;
use spin::Mutex;

use super::mmio::RegisterWindow;
use super::InitError;

/// Number of 1 ms polls before a PLL lock or reset release is declared failed.
pub const LOCK_RETRIES: u32 = 100;

/// Reset lines, in the order they are released.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetLine {
    /// Clock/reset clamp around the core.
    ClkRstClamp = 0,
    /// Core clamp.
    CoreClamp = 1,
    /// Bus (AHB) reset.
    Bus = 2,
    /// Peripheral (AXI) reset.
    Peripheral = 3,
}

impl ResetLine {
    /// Release order: clamp, core clamp, bus, peripheral.
    pub const SEQUENCE: [ResetLine; 4] = [
        ResetLine::ClkRstClamp,
        ResetLine::CoreClamp,
        ResetLine::Bus,
        ResetLine::Peripheral,
    ];
}

/// Failure reported by a platform hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformError {
    /// Clock handle missing or rate rejected.
    Clock,
    /// Reset controller handle missing.
    Reset,
    /// ioremap-equivalent failed.
    Map,
    /// Firmware image unavailable.
    Firmware,
    /// IRQ line could not be requested.
    Irq,
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformError::Clock => write!(f, "clock unavailable"),
            PlatformError::Reset => write!(f, "reset control unavailable"),
            PlatformError::Map => write!(f, "region mapping failed"),
            PlatformError::Firmware => write!(f, "firmware unavailable"),
            PlatformError::Irq => write!(f, "irq request failed"),
        }
    }
}

/// The two register windows of one coprocessor instance.
pub struct MappedRegions {
    /// CSM control registers (reset, interrupt cause/mask, doorbell).
    pub control: Box<dyn RegisterWindow>,
    /// Tightly coupled memory, cleared before the core boots.
    pub tcm: Box<dyn RegisterWindow>,
}

/// Monotonic time source for bounded waits.
pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary epoch.
    fn now_ms(&self) -> u64;

    /// Called on every iteration of a wait loop.
    fn relax(&self) {
        core::hint::spin_loop();
    }
}

/// Board hooks used by bring-up and teardown.
pub trait Platform: Clock {
    /// Power/clock steps shared by every instance (TCM and fabric clocks,
    /// debug bus attach, PLL vote).
    fn common_clock_init(&self) -> Result<(), PlatformError>;

    /// PLL lock detect after the common vote.
    fn pll_locked(&self) -> bool;

    fn set_core_clock_rate(&self, id: u8, hz: u32) -> Result<(), PlatformError>;

    fn enable_core_clock(&self, id: u8) -> Result<(), PlatformError>;

    fn deassert_reset(&self, id: u8, line: ResetLine) -> Result<(), PlatformError>;

    /// Whether `line` reads back as released.
    fn reset_released(&self, id: u8, line: ResetLine) -> bool;

    fn map_regions(&self, id: u8) -> Result<MappedRegions, PlatformError>;

    fn unmap_regions(&self, id: u8, regions: MappedRegions);

    /// Copy the firmware image to `load_addr`. Returns the image size.
    fn load_firmware(&self, id: u8, load_addr: u32) -> Result<usize, PlatformError>;

    fn request_irq(&self, line: u32, id: u8, queue: usize) -> Result<(), PlatformError>;

    fn free_irq(&self, line: u32);

    /// Schedule the bottom-half poll for `queue`. Must not run it inline.
    fn schedule_poll(&self, id: u8, queue: usize);

    fn delay_ms(&self, ms: u32);
}

/// Guard for the power/clock steps shared by all instances.
///
/// The application owns one of these and hands it to every probe; the
/// shared sequence runs on the first successful probe only.
pub struct CommonInit {
    done: Mutex<bool>,
}

impl CommonInit {
    pub const fn new() -> Self {
        Self { done: Mutex::new(false) }
    }

    pub fn is_done(&self) -> bool {
        *self.done.lock()
    }

    /// Run the shared sequence once. Returns `true` if this call ran it.
    pub fn ensure(&self, platform: &dyn Platform) -> Result<bool, InitError> {
        let mut done = self.done.lock();
        if *done {
            return Ok(false);
        }

        platform
            .common_clock_init()
            .map_err(|_| InitError::ClockUnavailable)?;

        // PLL vote must lock before any core clock is derived from it.
        let mut locked = false;
        for _ in 0..LOCK_RETRIES {
            if platform.pll_locked() {
                locked = true;
                break;
            }
            platform.delay_ms(1);
        }
        if !locked {
            return Err(InitError::ClockUnavailable);
        }

        *done = true;
        log::info!("common clock/reset init done");
        Ok(true)
    }
}

impl Default for CommonInit {
    fn default() -> Self {
        Self::new()
    }
}
