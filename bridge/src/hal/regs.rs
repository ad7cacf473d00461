//! Control-window register offsets and the fixed values programmed during
//! core reset.
//!
//! The control window is the coprocessor's CSM register block. Interrupt
//! cause, mask and doorbell registers are shared by both queues; each queue
//! owns a 15-bit sub-field selected by its shift factor.

pub const CORE_ID: usize = 0x0000;
pub const RESET_CTRL: usize = 0x0004;         // 1 = hold core in reset
pub const CORE_BAR: usize = 0x0008;
pub const CORE_AMC: usize = 0x000C;
pub const CORE_BOOT_ADDR: usize = 0x0010;
pub const C2C_INTR_STATUS: usize = 0x0014;
pub const C2C_INTR_SET: usize = 0x0018;        // WO: host -> device doorbell
pub const C2C_INTR_CLR: usize = 0x001C;
pub const N2H_INTR_STATUS: usize = 0x0020;     // RO: device -> host cause
pub const N2H_INTR_SET: usize = 0x0024;
pub const N2H_INTR_CLR: usize = 0x0028;        // WO: write 1 to clear cause
pub const N2H_INTR_MASK: usize = 0x002C;
pub const N2H_INTR_MASK_SET: usize = 0x0030;   // WO: write 1 to unmask
pub const N2H_INTR_MASK_CLR: usize = 0x0034;   // WO: write 1 to mask
pub const CORE_INT_STAT0_TYPE: usize = 0x0038;
pub const CORE_INT_STAT1_TYPE: usize = 0x003C;
pub const CORE_INT_STAT2_TYPE: usize = 0x0040;
pub const CORE_IFETCH_RANGE: usize = 0x0044;

/// Values written by the core reset sequence.
pub const AMC_ENABLE: u32 = 1;
pub const BAR_DEFAULT: u32 = 0x3c00_0000;
pub const C2C_LEVEL_SENSITIVE: u32 = 0xFFFF;
pub const IFETCH_RANGE_DEFAULT: u32 = 0xBF00_4001;

/// Width of one queue's cause sub-field.
pub const CAUSE_FIELD_MASK: u32 = 0x7FFF;
