use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use super::gre::{GreSessionRecord, GRE_DEBUG_CAPACITY};
use super::*;
use crate::dispatch::{AppData, DispatchCore, DispatchError, MsgCallback, Request, RxCallback, TxError};
use crate::hal::{Clock, CommonInit, Context, PlatformConfig};
use crate::mock::{answer_in_background, MockNetDevice, MockPlatform, WallClock};
use crate::msg::{
    GreBaseStats, GreConfig, GreMsg, GreSessionStats, Message, NodeStats, OpenParams, PhysIfMsg,
    ResponseKind,
};
use crate::netdev::{NetFeatures, StatsSnapshot};
use crate::queue::{H2nQueue, TransportQueue};

fn core_on(clock: Arc<dyn Clock>) -> Arc<DispatchCore> {
    let platform = Arc::new(MockPlatform::new());
    let ctx = Arc::new(Context::new(platform, PlatformConfig::new(0, 0x4000_0000, 32)));
    ctx.bring_up(&CommonInit::new()).unwrap();
    Arc::new(DispatchCore::new(Arc::new(TransportQueue::new(ctx)), clock))
}

fn mock_core() -> Arc<DispatchCore> {
    core_on(Arc::new(MockPlatform::new()))
}

fn null_rx() -> RxCallback {
    Arc::new(|_: u16, _: &[u8]| {})
}

fn command_queued(core: &DispatchCore) -> bool {
    core.transport().device().take_h2n(H2nQueue::Command).is_some()
}

fn notify(core: &DispatchCore, interface: u16, payload: impl Into<crate::msg::Payload>) -> Result<(), DispatchError> {
    let mut msg = Message::new(interface, payload);
    msg.header.response = ResponseKind::Notify;
    core.dispatch_inbound(&msg.encode())
}

// ---- GRE ----

struct GreFixture {
    core: Arc<DispatchCore>,
    gre: Gre,
    events: Arc<AtomicUsize>,
}

impl GreFixture {
    fn new() -> Self {
        let core = mock_core();
        let gre = Gre::new(Arc::clone(&core));
        gre.register_handler().unwrap();
        Self { core, gre, events: Arc::new(AtomicUsize::new(0)) }
    }

    fn event_cb(&self) -> MsgCallback {
        let events = Arc::clone(&self.events);
        Arc::new(move |_: Option<&AppData>, _: &Message| {
            events.fetch_add(1, Ordering::Relaxed);
        })
    }

    fn session(&self, if_num: u16, device: Arc<MockNetDevice>) -> Result<(), DispatchError> {
        self.gre
            .register_if(if_num, null_rx(), self.event_cb(), None, device, NetFeatures::empty())
    }
}

fn session_stats(rx_packets: u32, debug0: u32) -> GreMsg {
    let mut s = GreSessionStats::default();
    s.node.rx_packets = rx_packets;
    s.debug[0] = debug0;
    GreMsg::SessionStats(s)
}

#[test]
fn gre_session_binds_device_and_stats_record() {
    let f = GreFixture::new();
    let dev = Arc::new(MockNetDevice::new("gretap0", 11).opened());

    f.session(70, dev.clone()).unwrap();

    assert_eq!(dev.started(), 1);
    assert_eq!(f.gre.session_count(), 1);
    assert!(f.core.entry(70).unwrap().handler.is_some());

    let mut out = [GreSessionRecord::EMPTY; GRE_DEBUG_CAPACITY];
    assert_eq!(f.gre.session_stats(&mut out), Ok(1));
    assert_eq!(out[0].if_num, 70);
    assert_eq!(out[0].if_index, 11);
}

#[test]
fn gre_session_needs_dynamic_interface() {
    let f = GreFixture::new();
    let dev = Arc::new(MockNetDevice::new("gretap0", 11));
    assert_eq!(f.session(5, dev.clone()), Err(DispatchError::InvalidInterface(5)));

    f.session(70, dev.clone()).unwrap();
    assert_eq!(f.session(70, dev), Err(DispatchError::Occupied(70)));
    assert_eq!(f.gre.session_count(), 1);
}

#[test]
fn gre_static_interface_registered_once() {
    let f = GreFixture::new();
    assert_eq!(f.gre.register_handler(), Err(DispatchError::Occupied(GRE_INTERFACE)));
}

#[test]
fn gre_stats_syncs_accumulate() {
    let f = GreFixture::new();
    f.session(70, Arc::new(MockNetDevice::new("gretap0", 11))).unwrap();

    notify(&f.core, 70, session_stats(3, 1)).unwrap();
    notify(&f.core, 70, session_stats(2, 0)).unwrap();
    assert_eq!(f.events.load(Ordering::Relaxed), 2);

    let mut out = [GreSessionRecord::EMPTY; 1];
    f.gre.session_stats(&mut out).unwrap();
    assert_eq!(out[0].stats[0], 5);
    assert_eq!(out[0].stats[5], 1);

    let mut base = GreBaseStats::default();
    base.debug[2] = 9;
    notify(&f.core, GRE_INTERFACE, GreMsg::BaseStats(base)).unwrap();
    notify(&f.core, GRE_INTERFACE, GreMsg::BaseStats(base)).unwrap();
    assert_eq!(f.gre.base_stats()[2], 18);
}

#[test]
fn gre_full_debug_table_still_registers() {
    let f = GreFixture::new();
    for i in 0..=GRE_DEBUG_CAPACITY as u16 {
        f.session(64 + i, Arc::new(MockNetDevice::new("gretap", i as u32))).unwrap();
    }
    let late = 64 + GRE_DEBUG_CAPACITY as u16;

    assert_eq!(f.gre.session_count(), GRE_DEBUG_CAPACITY + 1);
    assert_eq!(f.gre.stats_dropped(), 1);

    // Syncs for the untracked session are dropped; delivery still happens.
    notify(&f.core, late, session_stats(1, 0)).unwrap();
    assert_eq!(f.gre.stats_dropped(), 2);
    assert_eq!(f.events.load(Ordering::Relaxed), 1);
}

#[test]
fn gre_event_callback_leaves_with_last_session() {
    let f = GreFixture::new();
    let first = Arc::new(MockNetDevice::new("gretap0", 11));
    f.session(70, first.clone()).unwrap();
    f.session(71, Arc::new(MockNetDevice::new("gretap1", 12))).unwrap();

    f.gre.unregister_if(70);
    assert_eq!(first.restored(), 1);
    assert!(f.core.entry(70).unwrap().is_unbound());
    notify(&f.core, GRE_INTERFACE, GreMsg::BaseStats(GreBaseStats::default())).unwrap();
    assert_eq!(f.events.load(Ordering::Relaxed), 1);

    f.gre.unregister_if(71);
    assert_eq!(f.gre.session_count(), 0);
    assert_eq!(
        notify(&f.core, GRE_INTERFACE, GreMsg::BaseStats(GreBaseStats::default())),
        Err(DispatchError::NoCallback(GRE_INTERFACE))
    );

    // Already gone: no-op.
    f.gre.unregister_if(70);
    assert_eq!(first.restored(), 1);
    assert_eq!(f.gre.session_count(), 0);
}

struct Foreign;

impl crate::dispatch::MessageHandler for Foreign {
    fn feature(&self) -> crate::msg::Feature {
        crate::msg::Feature::Gre
    }
}

#[test]
fn gre_leaves_other_owners_alone() {
    let f = GreFixture::new();
    f.session(70, Arc::new(MockNetDevice::new("gretap0", 11))).unwrap();
    f.core.register_handler(90, Arc::new(Foreign), None).unwrap();

    f.gre.unregister_if(90);
    assert!(f.core.entry(90).unwrap().handler.is_some());
    assert_eq!(f.gre.session_count(), 1);

    // The static interface is not a session either.
    f.gre.unregister_if(GRE_INTERFACE);
    assert!(f.core.entry(GRE_INTERFACE).unwrap().handler.is_some());

    f.gre.unregister_if(70);
    assert_eq!(f.gre.session_count(), 0);
    assert_eq!(
        notify(&f.core, GRE_INTERFACE, GreMsg::BaseStats(GreBaseStats::default())),
        Err(DispatchError::NoCallback(GRE_INTERFACE))
    );
}

#[test]
fn gre_tx_checks_interface_class() {
    let f = GreFixture::new();

    f.gre.tx_buf(70, vec![0x45; 64]).unwrap();
    let pkt = f.core.transport().device().take_h2n(H2nQueue::Data).unwrap();
    assert_eq!(pkt.interface, 70);
    assert_eq!(
        f.gre.tx_buf(GRE_INTERFACE, vec![0; 8]),
        Err(TxError::WrongInterfaceClass { interface: GRE_INTERFACE, expected: crate::msg::InterfaceScope::Dynamic })
    );

    let cfg = GreMsg::Configure(GreConfig { ip_type: 4, mtu: 1476, ..Default::default() });
    f.gre.tx_msg(Request::new(Message::new(70, cfg))).unwrap();
    assert!(command_queued(&f.core));
    assert!(matches!(
        f.gre.tx_msg(Request::new(Message::new(GRE_INTERFACE, cfg))),
        Err(TxError::WrongInterfaceClass { .. })
    ));
}

#[test]
fn gre_packet_tap() {
    let f = GreFixture::new();
    f.gre.register_packet_tap(Arc::new(|_: u16, _: &[u8]| {}));
    assert!(f.core.has_packet_tap());
    f.gre.unregister_packet_tap();
    assert!(!f.core.has_packet_tap());
}

// ---- Physical interfaces ----

fn phys_if(core: &Arc<DispatchCore>) -> PhysIf {
    PhysIf::new(Arc::clone(core))
}

#[test]
fn port_registration_moves_data_plane() {
    let core = mock_core();
    let p = phys_if(&core);
    let dev = Arc::new(MockNetDevice::new("eth0", 2).opened());

    p.register_port(1, dev.clone(), null_rx(), NetFeatures::SG).unwrap();
    assert!(p.is_registered(1));
    assert_eq!(dev.started(), 1);

    p.unregister_port(1);
    assert!(!p.is_registered(1));
    assert_eq!(dev.restored(), 1);
    assert!(core.entry(1).unwrap().is_unbound());
}

#[test]
fn port_numbers_bounded() {
    let core = mock_core();
    let p = phys_if(&core);
    let dev = Arc::new(MockNetDevice::new("eth0", 2));
    assert_eq!(
        p.register_port(0, dev.clone(), null_rx(), NetFeatures::empty()),
        Err(DispatchError::InvalidInterface(0))
    );
    assert_eq!(
        p.register_port(7, dev, null_rx(), NetFeatures::empty()),
        Err(DispatchError::InvalidInterface(7))
    );
    assert_eq!(p.link_state(9, true), Err(TxError::InvalidInterface(9)));
}

#[test]
fn unregister_all_releases_every_port() {
    let core = mock_core();
    let p = phys_if(&core);
    let devs: Vec<_> = (1..=3u16)
        .map(|port| {
            let dev = Arc::new(MockNetDevice::new("eth", port as u32));
            p.register_port(port, dev.clone(), null_rx(), NetFeatures::empty()).unwrap();
            dev
        })
        .collect();

    p.unregister_all();

    assert!(devs.iter().all(|d| d.restored() == 1));
    assert_eq!(core.registered_interfaces(), 0);
}

#[test]
fn oversized_mtu_never_reaches_device() {
    let core = mock_core();
    let p = phys_if(&core);
    p.register_port(1, Arc::new(MockNetDevice::new("eth0", 2)), null_rx(), NetFeatures::empty())
        .unwrap();

    assert_eq!(p.change_mtu(1, MAX_MTU + 1), Err(TxError::Rejected("mtu above maximum")));
    assert!(!command_queued(&core));
    assert_eq!(p.mtu_size(1), Some(1500 + PREHEADER_LEN));

    p.change_mtu(1, MAX_MTU).unwrap();
    assert!(command_queued(&core));
    assert_eq!(p.mtu_size(1), Some(MAX_MTU + PREHEADER_LEN));
}

#[test]
fn link_notify_sets_host_carrier() {
    let core = mock_core();
    let p = phys_if(&core);
    let dev = Arc::new(MockNetDevice::new("eth1", 3));
    p.register_port(2, dev.clone(), null_rx(), NetFeatures::empty()).unwrap();

    notify(&core, 2, PhysIfMsg::LinkState(1)).unwrap();
    assert!(dev.carrier());
    assert!(p.link_up(2));

    notify(&core, 2, PhysIfMsg::LinkState(0)).unwrap();
    assert!(!dev.carrier());
    assert!(!p.link_up(2));
}

#[test]
fn port_statistics() {
    let core = mock_core();
    let p = phys_if(&core);
    let dev = Arc::new(MockNetDevice::new("eth0", 2));
    let mut snap = StatsSnapshot::default();
    snap.counters[1] = 10;
    dev.set_stats(snap);
    p.register_port(1, dev, null_rx(), NetFeatures::empty()).unwrap();

    assert_eq!(p.stats(1).unwrap().get("rx_packets"), Some(10));
    assert!(p.stats(2).is_none());

    let node = NodeStats { rx_packets: 4, rx_bytes: 400, tx_packets: 1, tx_bytes: 64, rx_dropped: 0 };
    notify(&core, 1, PhysIfMsg::Stats(node)).unwrap();
    notify(&core, 1, PhysIfMsg::Stats(node)).unwrap();
    assert_eq!(p.node_stats(1), Some([8, 800, 2, 128, 0]));
}

#[test]
fn open_is_sent_once() {
    let core = core_on(Arc::new(WallClock::new()));
    let p = phys_if(&core);
    p.register_port(1, Arc::new(MockNetDevice::new("eth0", 2)), null_rx(), NetFeatures::empty())
        .unwrap();

    let device = answer_in_background(Arc::clone(&core), 1, ResponseKind::Ack, 0);
    p.open(1, OpenParams::default()).unwrap();
    assert_eq!(device.join().unwrap(), 1);

    p.open(1, OpenParams::default()).unwrap();
    assert!(!command_queued(&core));

    let device = answer_in_background(Arc::clone(&core), 1, ResponseKind::Ack, 0);
    p.close(1).unwrap();
    assert_eq!(device.join().unwrap(), 1);
}

#[test]
fn rejected_open_can_be_retried() {
    let core = core_on(Arc::new(WallClock::new()));
    let p = phys_if(&core);
    p.register_port(1, Arc::new(MockNetDevice::new("eth0", 2)), null_rx(), NetFeatures::empty())
        .unwrap();

    let device = answer_in_background(Arc::clone(&core), 1, ResponseKind::Nack, 5);
    assert_eq!(p.open(1, OpenParams::default()), Err(TxError::Nack(5)));
    device.join().unwrap();

    let device = answer_in_background(Arc::clone(&core), 1, ResponseKind::Ack, 0);
    p.open(1, OpenParams::default()).unwrap();
    assert_eq!(device.join().unwrap(), 1);
}

#[test]
fn unanswered_vsi_assign_times_out() {
    let core = mock_core();
    let p = phys_if(&core);
    p.register_port(1, Arc::new(MockNetDevice::new("eth0", 2)), null_rx(), NetFeatures::empty())
        .unwrap();
    assert_eq!(p.vsi_assign(1, 3), Err(TxError::Timeout));
}
