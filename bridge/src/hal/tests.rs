/// Lifecycle tests: bring-up sequencing, failure cleanup, interrupt masking.
///
/// Everything runs against `MockPlatform`; no hardware involved.
use alloc::sync::Arc;
use alloc::vec::Vec;

use super::clock::{FREQ_110, FREQ_275, FREQ_550, FREQ_733};
use super::*;
use crate::mock::{Call, Fault, MockPlatform};

const LOAD_ADDR: u32 = 0x4000_0000;

fn single_queue() -> PlatformConfig {
    PlatformConfig::new(0, LOAD_ADDR, 32)
}

fn setup(config: PlatformConfig) -> (Arc<MockPlatform>, Context) {
    let platform = Arc::new(MockPlatform::new());
    let ctx = Context::new(platform.clone(), config);
    (platform, ctx)
}

// ---- Bring-up ----

#[test]
fn bring_up_reaches_initialized() {
    let (p, ctx) = setup(single_queue());
    assert_eq!(ctx.state(), LifecycleState::Uninit);

    ctx.bring_up(&CommonInit::new()).unwrap();

    assert_eq!(ctx.state(), LifecycleState::Initialized);
    assert!(ctx.is_mapped());
    assert_eq!(ctx.interrupt_context(0).unwrap().irq(), Some(32));
    assert_eq!(p.control().n2h_mask(), N2hCause::SUPPORTED.bits());
}

#[test]
fn core_program_releases_reset_last() {
    let (p, ctx) = setup(single_queue());
    ctx.bring_up(&CommonInit::new()).unwrap();

    let w = p.control();
    assert_eq!(w.writes_to(regs::RESET_CTRL), [1u32, 0]);
    assert_eq!(w.reg(regs::CORE_AMC), regs::AMC_ENABLE);
    assert_eq!(w.reg(regs::CORE_BAR), regs::BAR_DEFAULT);
    assert_eq!(w.reg(regs::CORE_BOOT_ADDR), LOAD_ADDR);
    assert_eq!(w.reg(regs::CORE_INT_STAT2_TYPE), regs::C2C_LEVEL_SENSITIVE);
    assert_eq!(w.reg(regs::CORE_IFETCH_RANGE), regs::IFETCH_RANGE_DEFAULT);

    let writes = w.writes();
    let release = writes
        .iter()
        .rposition(|&(o, v)| o == regs::RESET_CTRL && v == 0)
        .unwrap();
    let last_config = writes
        .iter()
        .rposition(|&(o, _)| o == regs::CORE_IFETCH_RANGE)
        .unwrap();
    assert!(release > last_config);
}

#[test]
fn reset_lines_released_in_order_with_settle_delay() {
    let (p, ctx) = setup(single_queue());
    ctx.bring_up(&CommonInit::new()).unwrap();

    let calls = p.calls();
    let released: Vec<ResetLine> = calls
        .iter()
        .filter_map(|c| match c {
            Call::DeassertReset(0, line) => Some(*line),
            _ => None,
        })
        .collect();
    assert_eq!(released, ResetLine::SEQUENCE);

    for (i, c) in calls.iter().enumerate() {
        if let Call::DeassertReset(..) = c {
            assert_eq!(calls[i + 1], Call::Delay(1));
        }
    }
}

#[test]
fn tcm_cleared_before_boot() {
    let (p, ctx) = setup(single_queue());
    p.tcm().set_reg(0x10, 0xDEAD_BEEF);
    ctx.bring_up(&CommonInit::new()).unwrap();
    assert_eq!(p.tcm().reg(0x10), 0);
}

#[test]
fn common_init_runs_once_across_instances() {
    let platform = Arc::new(MockPlatform::new());
    let common = CommonInit::new();
    let a = Context::new(platform.clone(), PlatformConfig::new(0, LOAD_ADDR, 32));
    let b = Context::new(platform.clone(), PlatformConfig::new(1, LOAD_ADDR, 34));

    a.bring_up(&common).unwrap();
    b.bring_up(&common).unwrap();

    assert!(common.is_done());
    assert_eq!(platform.count(|c| *c == Call::CommonClockInit), 1);
    assert_eq!(b.state(), LifecycleState::Initialized);
}

// ---- Failure paths ----

#[test]
fn failed_irq_leaves_nothing_enabled() {
    let (p, ctx) = setup(single_queue().with_second_queue(33));
    p.inject(Fault::Irq(33));

    assert_eq!(ctx.bring_up(&CommonInit::new()), Err(InitError::IrqRequestFailed(33)));
    assert_eq!(ctx.state(), LifecycleState::Error);
    assert_eq!(p.count(|c| *c == Call::FreeIrq(32)), 1);
    assert_eq!(p.count(|c| *c == Call::UnmapRegions(0)), 1);
    assert_eq!(p.control().n2h_mask(), 0);
    assert!(!ctx.is_mapped());
    assert_eq!(ctx.interrupt_context(0).unwrap().irq(), None);
}

#[test]
fn error_state_requires_teardown_before_retry() {
    let (p, ctx) = setup(single_queue());
    let common = CommonInit::new();
    p.inject(Fault::Firmware);
    assert_eq!(ctx.bring_up(&common), Err(InitError::FirmwareLoad));

    p.clear_faults();
    assert_eq!(
        ctx.bring_up(&common),
        Err(InitError::InvalidState(LifecycleState::Error))
    );

    ctx.teardown();
    assert_eq!(ctx.state(), LifecycleState::Uninit);
    ctx.bring_up(&common).unwrap();
    assert!(ctx.is_initialized());
}

#[test]
fn stuck_reset_times_out() {
    let (p, ctx) = setup(single_queue());
    p.inject(Fault::StuckReset(ResetLine::Bus));

    assert_eq!(
        ctx.bring_up(&CommonInit::new()),
        Err(InitError::ResetTimeout(ResetLine::Bus))
    );
    // Irq was requested before the reset sequence and must be gone again.
    assert_eq!(p.count(|c| *c == Call::FreeIrq(32)), 1);
    assert_eq!(p.control().n2h_mask(), 0);
    assert!(!p.calls().contains(&Call::DeassertReset(0, ResetLine::Peripheral)));
}

#[test]
fn map_failure_reported() {
    let (p, ctx) = setup(single_queue());
    p.inject(Fault::Map);
    assert_eq!(ctx.bring_up(&CommonInit::new()), Err(InitError::RegionMapFailed));
    assert_eq!(p.count(|c| matches!(c, Call::RequestIrq(..))), 0);
}

#[test]
fn pll_lock_wait_is_bounded() {
    let (p, ctx) = setup(single_queue());
    let common = CommonInit::new();
    p.inject(Fault::PllNeverLocks);

    assert_eq!(ctx.bring_up(&common), Err(InitError::ClockUnavailable));
    assert!(!common.is_done());
    assert_eq!(p.count(|c| *c == Call::Delay(1)), platform::LOCK_RETRIES as usize);
}

#[test]
fn truncated_firmware_rejected() {
    let (p, ctx) = setup(single_queue());
    p.set_firmware_size(1024);
    assert_eq!(ctx.bring_up(&CommonInit::new()), Err(InitError::FirmwareTruncated(1024)));
}

#[test]
fn invalid_config_rejected_before_reset() {
    let mut config = single_queue().with_second_queue(33);
    config.num_irq = 1;
    let (p, ctx) = setup(config);

    assert!(matches!(
        ctx.bring_up(&CommonInit::new()),
        Err(InitError::InvalidConfig(_))
    ));
    assert_eq!(ctx.state(), LifecycleState::Uninit);
    assert!(p.calls().is_empty());
}

// ---- Clock profile ----

#[test]
fn non_turbo_default_ladder() {
    let (_, ctx) = setup(single_queue());
    ctx.bring_up(&CommonInit::new()).unwrap();

    let scales = ctx.frequency_scales().unwrap();
    assert_eq!(scales.low().frequency, FREQ_110);
    assert_eq!(scales.mid().frequency, FREQ_275);
    assert_eq!(scales.high().frequency, FREQ_550);
}

#[test]
fn turbo_ladder_falls_back_to_accepted_rates() {
    let mut config = single_queue();
    config.clock.turbo = true;
    let (p, ctx) = setup(config);
    p.accept_rates(&[FREQ_110, FREQ_550, FREQ_733]);

    ctx.bring_up(&CommonInit::new()).unwrap();

    let scales = ctx.frequency_scales().unwrap();
    assert_eq!(scales.mid().frequency, FREQ_550);
    assert_eq!(scales.high().frequency, FREQ_733);

    // Boot rate is the mid scale, set right before the clock is enabled.
    let calls = p.calls();
    let enable = calls.iter().position(|c| *c == Call::EnableClock(0)).unwrap();
    assert_eq!(calls[enable - 1], Call::SetRate(0, FREQ_550));
}

#[test]
fn unknown_configured_frequency_rejected() {
    let mut config = single_queue();
    config.clock = ClockProfile { low: 100_000_000, mid: FREQ_275, high: FREQ_550, turbo: false };
    let (_, ctx) = setup(config);
    assert_eq!(ctx.bring_up(&CommonInit::new()), Err(InitError::ClockUnavailable));
}

// ---- Interrupts ----

#[test]
fn irq_masks_and_schedules_once() {
    let (p, ctx) = setup(single_queue());
    ctx.bring_up(&CommonInit::new()).unwrap();
    let polls = |p: &MockPlatform| p.count(|c| matches!(c, Call::SchedulePoll(0, 0)));

    assert_eq!(ctx.handle_irq(0), IrqReturn::Handled);
    assert_eq!(p.control().n2h_mask(), 0);
    assert!(ctx.interrupt_context(0).unwrap().is_poll_pending());
    assert_eq!(polls(&*p), 1);

    // Still pending: no second bottom half.
    assert_eq!(ctx.handle_irq(0), IrqReturn::Handled);
    assert_eq!(polls(&*p), 1);

    ctx.complete_poll(0);
    assert_eq!(p.control().n2h_mask(), N2hCause::SUPPORTED.bits());
    ctx.handle_irq(0);
    assert_eq!(polls(&*p), 2);
}

#[test]
fn irq_for_unknown_queue_not_ours() {
    let (_, ctx) = setup(single_queue());
    ctx.bring_up(&CommonInit::new()).unwrap();
    assert_eq!(ctx.handle_irq(1), IrqReturn::None);
}

#[test]
fn second_queue_uses_its_shift() {
    let (p, ctx) = setup(single_queue().with_second_queue(33));
    ctx.bring_up(&CommonInit::new()).unwrap();

    let supported = N2hCause::SUPPORTED.bits();
    assert_eq!(p.control().n2h_mask(), supported | (supported << 15));

    p.control().raise(N2hCause::DATA_QUEUE_0.bits() << 15);
    assert_eq!(ctx.read_cause(1), N2hCause::DATA_QUEUE_0);
    assert!(ctx.read_cause(0).is_empty());

    ctx.clear_cause(1, N2hCause::DATA_QUEUE_0);
    assert_eq!(p.control().n2h_status(), 0);
}

#[test]
fn cause_bits_sticky_until_cleared() {
    let (p, ctx) = setup(single_queue());
    ctx.bring_up(&CommonInit::new()).unwrap();

    p.control().raise((N2hCause::DATA_QUEUE_0 | N2hCause::TX_UNBLOCKED).bits());
    let cause = ctx.read_cause(0);
    assert_eq!(cause, N2hCause::DATA_QUEUE_0 | N2hCause::TX_UNBLOCKED);
    assert_eq!(ctx.read_cause(0), cause);

    ctx.clear_cause(0, N2hCause::DATA_QUEUE_0);
    assert_eq!(ctx.read_cause(0), N2hCause::TX_UNBLOCKED);
}

#[test]
fn doorbell_bit_positions() {
    let (p, ctx) = setup(single_queue());
    ctx.bring_up(&CommonInit::new()).unwrap();

    for kind in [
        Doorbell::EmptyBufferQueue,
        Doorbell::DataCommandQueue,
        Doorbell::TxUnblocked,
        Doorbell::TriggerCoredump,
    ] {
        ctx.send_doorbell(kind);
    }
    assert_eq!(p.control().doorbells(), [1u32 << 0, 1 << 1, 1 << 11, 1 << 15]);
}

// ---- Teardown ----

#[test]
fn teardown_releases_everything() {
    let (p, ctx) = setup(single_queue());
    ctx.bring_up(&CommonInit::new()).unwrap();

    ctx.teardown();

    assert_eq!(ctx.state(), LifecycleState::Uninit);
    assert!(!ctx.is_mapped());
    assert!(ctx.frequency_scales().is_none());
    assert_eq!(p.control().n2h_mask(), 0);

    // Mask cleared before the windows went away.
    let calls = p.calls();
    let free = calls.iter().position(|c| *c == Call::FreeIrq(32)).unwrap();
    let unmap = calls.iter().position(|c| *c == Call::UnmapRegions(0)).unwrap();
    assert!(free < unmap);
}

#[test]
fn quiesce_is_idempotent() {
    let (p, ctx) = setup(single_queue());
    ctx.bring_up(&CommonInit::new()).unwrap();
    ctx.quiesce();
    ctx.quiesce();
    assert_eq!(p.count(|c| *c == Call::FreeIrq(32)), 1);
    assert_eq!(ctx.handle_irq(0), IrqReturn::None);
}
