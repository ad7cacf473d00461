//! GRE tunnel feature.
//!
//! One static interface carries feature-wide traffic (base stats); every
//! tunnel session gets a dynamic interface with its own data callback,
//! device binding and debug record. Notify messages for any session go to
//! the single event callback registered by the tunnel driver.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::RwLock;

use crate::dispatch::{
    interface_scope, Ack, AppData, DispatchCore, DispatchError, MessageHandler, MsgCallback,
    PacketTap, Request, RxCallback, TxError, SYNC_TIMEOUT_MS,
};
use crate::msg::gre::{BASE_DEBUG_MAX, SESSION_DEBUG_MAX};
use crate::msg::{Feature, GreMsg, InterfaceScope, Message, Payload};
use crate::netdev::{HostNetDevice, NetFeatures};
use crate::stats::{SessionRecord, SessionStats, StatsError};

/// Static interface of the GRE feature.
pub const GRE_INTERFACE: u16 = 40;

/// Sessions tracked in the debug table.
pub const GRE_DEBUG_CAPACITY: usize = 16;

/// Counters per session record: node stats, then debug counters.
pub const GRE_SESSION_COUNTERS: usize = 5 + SESSION_DEBUG_MAX;

pub type GreSessionRecord = SessionRecord<GRE_SESSION_COUNTERS>;

struct GreShared {
    stats: SessionStats<GRE_SESSION_COUNTERS>,
    event: RwLock<Option<(MsgCallback, Option<AppData>)>>,
    sessions: AtomicUsize,
}

struct GreHandler {
    shared: Arc<GreShared>,
}

impl MessageHandler for GreHandler {
    fn feature(&self) -> Feature {
        Feature::Gre
    }

    fn sync_stats(&self, interface: u16, msg: &Message) {
        match &msg.payload {
            Payload::Gre(GreMsg::SessionStats(s)) => {
                self.shared.stats.accumulate(interface, &s.counters());
            }
            Payload::Gre(GreMsg::BaseStats(b)) => self.shared.stats.accumulate_base(&b.debug),
            _ => {}
        }
    }

    fn notify_callback(&self, _interface: u16) -> Option<(MsgCallback, Option<AppData>)> {
        self.shared.event.read().clone()
    }
}

pub struct Gre {
    core: Arc<DispatchCore>,
    shared: Arc<GreShared>,
    handler: Arc<GreHandler>,
}

impl Gre {
    pub fn new(core: Arc<DispatchCore>) -> Self {
        let shared = Arc::new(GreShared {
            stats: SessionStats::new(GRE_DEBUG_CAPACITY, BASE_DEBUG_MAX),
            event: RwLock::new(None),
            sessions: AtomicUsize::new(0),
        });
        let handler = Arc::new(GreHandler { shared: Arc::clone(&shared) });
        Self { core, shared, handler }
    }

    /// Claim the static GRE interface.
    pub fn register_handler(&self) -> Result<(), DispatchError> {
        self.core.register_handler(GRE_INTERFACE, self.handler.clone(), None)
    }

    pub fn unregister_handler(&self) {
        self.core.unregister_handler(GRE_INTERFACE);
    }

    /// Bring up a tunnel session on dynamic interface `if_num`.
    ///
    /// `event_cb` becomes the feature's notify subscriber. A full debug
    /// table only costs the session its statistics record.
    pub fn register_if(
        &self,
        if_num: u16,
        data_cb: RxCallback,
        event_cb: MsgCallback,
        app_data: Option<AppData>,
        device: Arc<dyn HostNetDevice>,
        features: NetFeatures,
    ) -> Result<(), DispatchError> {
        if interface_scope(if_num) != Some(InterfaceScope::Dynamic) {
            log::warn!("gre: if {} is not a dynamic interface", if_num);
            return Err(DispatchError::InvalidInterface(if_num));
        }

        self.core
            .register_handler(if_num, self.handler.clone(), app_data.clone())?;
        if let Err(e) = self.core.bind_device(if_num, Arc::clone(&device), data_cb, features) {
            self.core.unregister_handler(if_num);
            return Err(e);
        }

        *self.shared.event.write() = Some((event_cb, app_data));
        self.shared.sessions.fetch_add(1, Ordering::AcqRel);

        if self.shared.stats.register(if_num, device.ifindex()).is_err() {
            log::warn!("gre: debug table full, if {} not tracked", if_num);
        }
        log::info!("gre: session if {} registered on {}", if_num, device.name());
        Ok(())
    }

    /// Tear down a session. The event callback goes with the last one.
    pub fn unregister_if(&self, if_num: u16) {
        if interface_scope(if_num) != Some(InterfaceScope::Dynamic) || !self.owns(if_num) {
            log::debug!("gre: if {} is not a gre session", if_num);
            return;
        }

        self.shared.stats.unregister(if_num);
        self.core.unbind_device(if_num);
        self.core.unregister_handler(if_num);

        let prev = self
            .shared
            .sessions
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if prev == Ok(1) {
            *self.shared.event.write() = None;
        }
        log::info!("gre: session if {} unregistered", if_num);
    }

    /// True when this feature's handler sits on `if_num`.
    fn owns(&self, if_num: u16) -> bool {
        let mine = Arc::as_ptr(&self.handler) as *const ();
        self.core
            .entry(if_num)
            .and_then(|e| e.handler)
            .map_or(false, |h| Arc::as_ptr(&h) as *const () == mine)
    }

    pub fn session_count(&self) -> usize {
        self.shared.sessions.load(Ordering::Acquire)
    }

    // ---- Transmit ----

    pub fn tx_msg(&self, req: Request) -> Result<(), TxError> {
        self.core.send_async(req)
    }

    /// Blocking send, bounded by `SYNC_TIMEOUT_MS`.
    pub fn tx_msg_sync(&self, msg: Message) -> Result<Ack, TxError> {
        self.core.send_sync(Request::new(msg), SYNC_TIMEOUT_MS)
    }

    /// Hand a packet to the tunnel's data path.
    pub fn tx_buf(&self, if_num: u16, packet: Vec<u8>) -> Result<(), TxError> {
        if interface_scope(if_num) != Some(InterfaceScope::Dynamic) {
            return Err(TxError::WrongInterfaceClass {
                interface: if_num,
                expected: InterfaceScope::Dynamic,
            });
        }
        self.core.transport().send_packet(if_num, packet)?;
        Ok(())
    }

    // ---- Statistics ----

    pub fn session_stats(&self, out: &mut [GreSessionRecord]) -> Result<usize, StatsError> {
        self.shared.stats.snapshot(out)
    }

    pub fn base_stats(&self) -> [u64; BASE_DEBUG_MAX] {
        let mut out = [0u64; BASE_DEBUG_MAX];
        self.shared.stats.base_snapshot(&mut out);
        out
    }

    /// Sessions or syncs that did not fit the debug table.
    pub fn stats_dropped(&self) -> u64 {
        self.shared.stats.dropped()
    }

    // ---- Packet tap ----

    pub fn register_packet_tap(&self, tap: PacketTap) {
        self.core.set_packet_tap(tap);
    }

    pub fn unregister_packet_tap(&self) {
        self.core.clear_packet_tap();
    }
}
