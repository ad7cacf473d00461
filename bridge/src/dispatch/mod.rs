//! Message dispatch core.
//!
//! Owns the per-interface handler table, routes inbound messages to the
//! owning feature, and sends outbound messages either fire-and-forget or as
//! a bounded synchronous request. One `DispatchCore` per coprocessor
//! instance; nothing here is process-global.
//!
//! Callbacks run on the bottom-half poll task and must not call `send_sync`.

mod proxy;
pub mod sync;
pub mod table;


pub use sync::{Ack, SyncSlot, SYNC_TIMEOUT_MS};
pub use table::{
    interface_scope, AppData, DeviceBinding, HandlerEntry, MessageHandler, MsgCallback,
    PacketTap, RxCallback, DYNAMIC_BASE, MAX_INTERFACES,
};

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::{Mutex, RwLock};

use crate::hal::Clock;
use crate::msg::{DecodeError, Feature, Header, InterfaceScope, Message, ResponseKind};
use crate::queue::{QueueError, TransportQueue};
use sync::Outcome;
use table::HandlerTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// Interface number outside `0..MAX_INTERFACES`.
    InvalidInterface(u16),
    /// Slot already has a handler; unregister first.
    Occupied(u16),
    NoHandler(u16),
    /// Valid message with nobody to deliver it to.
    NoCallback(u16),
    Malformed(DecodeError),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::InvalidInterface(i) => write!(f, "interface {} out of range", i),
            DispatchError::Occupied(i) => write!(f, "interface {} already registered", i),
            DispatchError::NoHandler(i) => write!(f, "no handler for interface {}", i),
            DispatchError::NoCallback(i) => write!(f, "no callback for interface {}", i),
            DispatchError::Malformed(e) => write!(f, "malformed message: {}", e),
        }
    }
}

impl From<DecodeError> for DispatchError {
    fn from(e: DecodeError) -> Self {
        DispatchError::Malformed(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxError {
    InvalidInterface(u16),
    /// Per-session type on a static interface, or the reverse.
    WrongInterfaceClass { interface: u16, expected: InterfaceScope },
    Invalid(DecodeError),
    /// Rejected by a feature-level precondition (MTU bound, unknown port...).
    Rejected(&'static str),
    Queue(QueueError),
    Timeout,
    /// Device answered with a failure code.
    Nack(u32),
}

impl fmt::Display for TxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxError::InvalidInterface(i) => write!(f, "interface {} out of range", i),
            TxError::WrongInterfaceClass { interface, expected } => {
                write!(f, "interface {} is not a {:?} interface", interface, expected)
            }
            TxError::Invalid(e) => write!(f, "invalid message: {}", e),
            TxError::Rejected(why) => write!(f, "rejected: {}", why),
            TxError::Queue(e) => write!(f, "enqueue failed: {}", e),
            TxError::Timeout => write!(f, "synchronous request timed out"),
            TxError::Nack(code) => write!(f, "device nack, error {}", code),
        }
    }
}

impl From<QueueError> for TxError {
    fn from(e: QueueError) -> Self {
        TxError::Queue(e)
    }
}

impl From<DecodeError> for TxError {
    fn from(e: DecodeError) -> Self {
        TxError::Invalid(e)
    }
}

/// Outbound message with an optional completion callback and its context.
pub struct Request {
    pub message: Message,
    pub callback: Option<MsgCallback>,
    pub app_data: Option<AppData>,
}

impl Request {
    pub fn new(message: Message) -> Self {
        Self { message, callback: None, app_data: None }
    }

    pub fn with_callback(mut self, callback: MsgCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_app_data(mut self, app_data: AppData) -> Self {
        self.app_data = Some(app_data);
        self
    }
}

/// Dispatch counters at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub rx_delivered: u64,
    pub rx_malformed: u64,
    pub rx_unhandled: u64,
    pub tx_sent: u64,
    pub tx_failed: u64,
    pub sync_timeouts: u64,
    pub rx_packets: u64,
    pub rx_packets_dropped: u64,
}

#[derive(Default)]
struct Counters {
    rx_delivered: AtomicU64,
    rx_malformed: AtomicU64,
    rx_unhandled: AtomicU64,
    tx_sent: AtomicU64,
    tx_failed: AtomicU64,
    sync_timeouts: AtomicU64,
    rx_packets: AtomicU64,
    rx_packets_dropped: AtomicU64,
}

fn bump(c: &AtomicU64) {
    c.fetch_add(1, Ordering::Relaxed);
}

struct Pending {
    callback: MsgCallback,
    app_data: Option<AppData>,
}

pub struct DispatchCore {
    transport: Arc<TransportQueue>,
    clock: Arc<dyn Clock>,
    table: RwLock<HandlerTable>,
    /// Outstanding completion callbacks, keyed by the token sent in `cb`.
    pending: Mutex<BTreeMap<u64, Pending>>,
    next_token: AtomicU64,
    slots: [Arc<SyncSlot>; Feature::COUNT],
    tap: RwLock<Option<PacketTap>>,
    counters: Counters,
}

impl DispatchCore {
    pub fn new(transport: Arc<TransportQueue>, clock: Arc<dyn Clock>) -> Self {
        Self {
            transport,
            clock,
            table: RwLock::new(HandlerTable::new()),
            pending: Mutex::new(BTreeMap::new()),
            next_token: AtomicU64::new(1),
            slots: [Arc::new(SyncSlot::new()), Arc::new(SyncSlot::new())],
            tap: RwLock::new(None),
            counters: Counters::default(),
        }
    }

    pub fn transport(&self) -> &Arc<TransportQueue> {
        &self.transport
    }

    pub fn clock(&self) -> &dyn Clock {
        &*self.clock
    }

    pub fn sync_slot(&self, feature: Feature) -> &SyncSlot {
        &self.slots[feature.index()]
    }

    // ---- Registration ----

    pub fn register_handler(
        &self,
        interface: u16,
        handler: Arc<dyn MessageHandler>,
        app_data: Option<AppData>,
    ) -> Result<(), DispatchError> {
        if interface_scope(interface).is_none() {
            return Err(DispatchError::InvalidInterface(interface));
        }
        let mut table = self.table.write();
        let entry = table
            .get_mut(interface)
            .ok_or(DispatchError::InvalidInterface(interface))?;
        if entry.handler.is_some() {
            log::warn!("if {}: handler already registered", interface);
            return Err(DispatchError::Occupied(interface));
        }
        entry.handler = Some(handler);
        entry.app_data = app_data;
        Ok(())
    }

    /// Clear every field of the slot. Unknown or empty slots are a no-op.
    pub fn unregister_handler(&self, interface: u16) {
        let mut table = self.table.write();
        if let Some(entry) = table.get_mut(interface) {
            *entry = HandlerEntry::default();
        }
    }

    /// Copy of the slot for `interface`.
    pub fn entry(&self, interface: u16) -> Option<HandlerEntry> {
        self.table.read().get(interface).cloned()
    }

    pub fn registered_interfaces(&self) -> usize {
        self.table.read().iter_bound().count()
    }

    // ---- Inbound ----

    /// Validate, account and deliver one inbound control message.
    ///
    /// Never panics on bad input; the error tells the poll loop why the
    /// message was dropped.
    pub fn dispatch_inbound(&self, buf: &[u8]) -> Result<(), DispatchError> {
        let header = Header::decode(buf).map_err(|e| {
            bump(&self.counters.rx_malformed);
            log::warn!("dropping inbound message: {}", e);
            DispatchError::Malformed(e)
        })?;
        let interface = header.interface;

        if interface_scope(interface).is_none() {
            bump(&self.counters.rx_malformed);
            log::warn!("dropping message for out-of-range if {}", interface);
            return Err(DispatchError::InvalidInterface(interface));
        }

        let (handler, entry_data) = {
            let table = self.table.read();
            match table.get(interface) {
                Some(HandlerEntry { handler: Some(h), app_data, .. }) => {
                    (Arc::clone(h), app_data.clone())
                }
                _ => {
                    if let Err(e) = Feature::check_any(header.msg_type, header.len) {
                        bump(&self.counters.rx_malformed);
                        log::warn!("if {}: dropping unowned message: {}", interface, e);
                        return Err(DispatchError::Malformed(e));
                    }
                    bump(&self.counters.rx_unhandled);
                    log::warn!("no handler for if {}, type {}", interface, header.msg_type);
                    return Err(DispatchError::NoHandler(interface));
                }
            }
        };

        let msg = Message::decode(handler.feature(), buf).map_err(|e| {
            bump(&self.counters.rx_malformed);
            log::warn!("if {}: dropping {:?} message: {}", interface, handler.feature(), e);
            DispatchError::Malformed(e)
        })?;

        handler.sync_stats(interface, &msg);

        let target = if msg.header.response == ResponseKind::Notify {
            // A notify echoing a live token still retires it.
            if self.take_pending(msg.header.cb).is_some() {
                log::debug!("if {}: notify retired token {}", interface, msg.header.cb);
            }
            handler
                .notify_callback(interface)
                .map(|(cb, data)| (cb, data.or(entry_data)))
        } else {
            self.take_pending(msg.header.cb)
        };

        let Some((callback, app_data)) = target else {
            bump(&self.counters.rx_unhandled);
            log::debug!("if {}: no callback for type {}", interface, msg.header.msg_type);
            return Err(DispatchError::NoCallback(interface));
        };

        callback(app_data.as_ref(), &msg);
        bump(&self.counters.rx_delivered);
        Ok(())
    }

    fn take_pending(&self, token: u64) -> Option<(MsgCallback, Option<AppData>)> {
        if token == 0 {
            return None;
        }
        self.pending
            .lock()
            .remove(&token)
            .map(|p| (p.callback, p.app_data))
    }

    /// Forget every outstanding completion. Used at remove.
    pub fn clear_pending(&self) -> usize {
        let mut pending = self.pending.lock();
        let n = pending.len();
        pending.clear();
        n
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    // ---- Outbound ----

    fn validate_outbound(&self, msg: &Message) -> Result<(), TxError> {
        let feature = msg.feature();
        let header = &msg.header;
        if header.msg_type != msg.payload.msg_type() {
            return Err(TxError::Invalid(DecodeError::UnknownType {
                feature,
                msg_type: header.msg_type,
            }));
        }
        feature.check(header.msg_type, header.len)?;

        let actual = interface_scope(header.interface)
            .ok_or(TxError::InvalidInterface(header.interface))?;
        let expected = feature
            .scope(header.msg_type)
            .ok_or(TxError::Invalid(DecodeError::UnknownType { feature, msg_type: header.msg_type }))?;
        if actual != expected {
            return Err(TxError::WrongInterfaceClass { interface: header.interface, expected });
        }
        Ok(())
    }

    /// Validate and enqueue. The callback, if any, runs when the device
    /// answers. No retry on a full ring.
    pub fn send_async(&self, req: Request) -> Result<(), TxError> {
        self.submit(req).map(|_| ())
    }

    /// `send_async` returning the completion token, 0 when no callback.
    fn submit(&self, req: Request) -> Result<u64, TxError> {
        let Request { mut message, callback, app_data } = req;
        if let Err(e) = self.validate_outbound(&message) {
            bump(&self.counters.tx_failed);
            log::warn!(
                "if {}: rejecting type {}: {}",
                message.header.interface,
                message.header.msg_type,
                e
            );
            return Err(e);
        }

        let token = match callback {
            Some(callback) => {
                let token = self.next_token.fetch_add(1, Ordering::Relaxed);
                self.pending.lock().insert(token, Pending { callback, app_data });
                token
            }
            None => 0,
        };
        message.header.cb = token;

        let bytes = message.encode();
        if let Err(e) = self.transport.send_control(message.header.interface, &bytes) {
            if token != 0 {
                self.pending.lock().remove(&token);
            }
            bump(&self.counters.tx_failed);
            log::warn!("if {}: tx of type {} failed: {}", message.header.interface, message.header.msg_type, e);
            return Err(TxError::Queue(e));
        }
        bump(&self.counters.tx_sent);
        Ok(token)
    }

    /// Send and wait up to `timeout_ms` for the answer.
    ///
    /// One request per feature at a time; later callers wait for the slot.
    /// The caller's own callback, if any, still runs with the response.
    /// On timeout the token is retired, so a late answer is dropped as
    /// unclaimed.
    pub fn send_sync(&self, req: Request, timeout_ms: u64) -> Result<Ack, TxError> {
        let slot = &self.slots[req.message.feature().index()];
        let _gate = slot.acquire(&*self.clock);

        let Request { message, callback, app_data } = req;
        let (interface, msg_type) = (message.header.interface, message.header.msg_type);
        let ticket = slot.arm(callback, app_data);

        let completer = Arc::clone(slot);
        let internal: MsgCallback =
            Arc::new(move |_: Option<&AppData>, msg: &Message| completer.complete(ticket, msg));
        let token = match self.submit(Request::new(message).with_callback(internal)) {
            Ok(token) => token,
            Err(e) => {
                slot.abandon(ticket);
                return Err(e);
            }
        };

        let deadline = self.clock.now_ms().saturating_add(timeout_ms);
        loop {
            if let Some(outcome) = slot.poll(ticket) {
                return match outcome {
                    Outcome::Ack(ack) => Ok(ack),
                    Outcome::Nack(code) => Err(TxError::Nack(code)),
                };
            }
            if self.clock.now_ms() >= deadline {
                slot.abandon(ticket);
                self.pending.lock().remove(&token);
                bump(&self.counters.sync_timeouts);
                log::warn!(
                    "if {}: sync type {} timed out after {} ms",
                    interface,
                    msg_type,
                    timeout_ms
                );
                return Err(TxError::Timeout);
            }
            self.clock.relax();
        }
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.counters;
        DispatchStats {
            rx_delivered: c.rx_delivered.load(Ordering::Relaxed),
            rx_malformed: c.rx_malformed.load(Ordering::Relaxed),
            rx_unhandled: c.rx_unhandled.load(Ordering::Relaxed),
            tx_sent: c.tx_sent.load(Ordering::Relaxed),
            tx_failed: c.tx_failed.load(Ordering::Relaxed),
            sync_timeouts: c.sync_timeouts.load(Ordering::Relaxed),
            rx_packets: c.rx_packets.load(Ordering::Relaxed),
            rx_packets_dropped: c.rx_packets_dropped.load(Ordering::Relaxed),
        }
    }
}
