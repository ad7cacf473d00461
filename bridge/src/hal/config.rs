/// Per-instance platform configuration (what a board's device description
/// provides at probe time).
use super::clock::ClockProfile;
use super::InitError;

/// Hardware queues per instance.
pub const MAX_QUEUES: usize = 2;

/// Cause sub-field offset per queue. A policy table, not a derivation.
pub const DEFAULT_SHIFT_FACTORS: [u32; MAX_QUEUES] = [0, 15];

/// Largest shift that still fits a 15-bit cause field in 32 bits.
const MAX_SHIFT: u32 = 17;

/// Smallest image the firmware loader accepts.
pub const MIN_FIRMWARE_SIZE: usize = 64 * 1024;

bitflags::bitflags! {
    /// Logical features served by an instance.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FeatureSet: u32 {
        const GRE     = 1 << 0;
        const PHYS_IF = 1 << 1;
    }
}

#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub id: u8,
    /// Physical address the firmware is loaded to and booted from.
    pub load_addr: u32,
    pub num_queue: usize,
    pub num_irq: usize,
    pub irqs: [u32; MAX_QUEUES],
    pub shift_factors: [u32; MAX_QUEUES],
    pub clock: ClockProfile,
    pub features: FeatureSet,
}

impl PlatformConfig {
    /// Single-queue instance with the default shift table and every feature.
    pub fn new(id: u8, load_addr: u32, irq: u32) -> Self {
        Self {
            id,
            load_addr,
            num_queue: 1,
            num_irq: 1,
            irqs: [irq, 0],
            shift_factors: DEFAULT_SHIFT_FACTORS,
            clock: ClockProfile::default(),
            features: FeatureSet::all(),
        }
    }

    /// Add the second queue on `irq`.
    pub fn with_second_queue(mut self, irq: u32) -> Self {
        self.num_queue = 2;
        self.num_irq = 2;
        self.irqs[1] = irq;
        self
    }

    pub fn validate(&self) -> Result<(), InitError> {
        if self.num_queue == 0 || self.num_queue > MAX_QUEUES {
            return Err(InitError::InvalidConfig("queue count out of range"));
        }
        if self.num_irq < self.num_queue {
            return Err(InitError::InvalidConfig("not enough interrupts for all queues"));
        }
        for q in 0..self.num_queue {
            if self.irqs[q] == 0 {
                return Err(InitError::InvalidConfig("queue without irq line"));
            }
            if self.shift_factors[q] > MAX_SHIFT {
                return Err(InitError::InvalidConfig("cause shift out of range"));
            }
        }
        Ok(())
    }
}
