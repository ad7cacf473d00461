/// Single-outstanding synchronous request slot, one per feature.
///
/// `gate` serialises callers. `state` carries the in-flight ticket, the
/// caller's own callback (run when the response lands) and the outcome.
/// A ticket that no longer matches (timed-out call) makes a late response a
/// no-op.
use spin::{Mutex, MutexGuard};

use super::table::{AppData, MsgCallback};
use crate::hal::Clock;
use crate::msg::{Message, ResponseKind};

/// Default bound on a synchronous request.
pub const SYNC_TIMEOUT_MS: u64 = 3000;

/// Positive response to a synchronous request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub interface: u16,
    pub msg_type: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Ack(Ack),
    Nack(u32),
}

#[derive(Default)]
struct SlotState {
    /// 0 when nothing is in flight.
    ticket: u64,
    next_ticket: u64,
    caller_cb: Option<MsgCallback>,
    caller_data: Option<AppData>,
    outcome: Option<Outcome>,
}

pub struct SyncSlot {
    gate: Mutex<()>,
    state: Mutex<SlotState>,
}

impl SyncSlot {
    pub fn new() -> Self {
        Self { gate: Mutex::new(()), state: Mutex::new(SlotState::default()) }
    }

    /// Block until the slot is free.
    pub(crate) fn acquire<'a>(&'a self, clock: &dyn Clock) -> MutexGuard<'a, ()> {
        loop {
            if let Some(guard) = self.gate.try_lock() {
                return guard;
            }
            clock.relax();
        }
    }

    pub fn is_busy(&self) -> bool {
        self.gate.is_locked()
    }

    /// Start a request; returns its ticket. Caller holds the gate.
    pub(crate) fn arm(&self, caller_cb: Option<MsgCallback>, caller_data: Option<AppData>) -> u64 {
        let mut s = self.state.lock();
        s.next_ticket = s.next_ticket.wrapping_add(1).max(1);
        s.ticket = s.next_ticket;
        s.caller_cb = caller_cb;
        s.caller_data = caller_data;
        s.outcome = None;
        s.ticket
    }

    /// Response path. Ignored unless `ticket` is the one in flight.
    pub(crate) fn complete(&self, ticket: u64, msg: &Message) {
        let (cb, data) = {
            let mut s = self.state.lock();
            if s.ticket == 0 || s.ticket != ticket {
                log::debug!(
                    "late sync response for if {} type {} dropped",
                    msg.header.interface,
                    msg.header.msg_type
                );
                return;
            }
            s.outcome = Some(match msg.header.response {
                ResponseKind::Ack => Outcome::Ack(Ack {
                    interface: msg.header.interface,
                    msg_type: msg.header.msg_type,
                }),
                _ => Outcome::Nack(msg.header.error),
            });
            (s.caller_cb.take(), s.caller_data.take())
        };
        // Caller's callback runs without the state lock held.
        if let Some(cb) = cb {
            cb(data.as_ref(), msg);
        }
    }

    pub(crate) fn poll(&self, ticket: u64) -> Option<Outcome> {
        let mut s = self.state.lock();
        if s.ticket != ticket {
            return None;
        }
        let out = s.outcome.take();
        if out.is_some() {
            s.ticket = 0;
        }
        out
    }

    /// Give up on `ticket`; a response arriving afterwards is discarded.
    pub(crate) fn abandon(&self, ticket: u64) {
        let mut s = self.state.lock();
        if s.ticket == ticket {
            s.ticket = 0;
            s.caller_cb = None;
            s.caller_data = None;
            s.outcome = None;
        }
    }
}

impl Default for SyncSlot {
    fn default() -> Self {
        Self::new()
    }
}
