/// Physical-interface (data-plane port) control messages.
///
/// All of these address a port's static interface number.
use core::mem::size_of;
use static_assertions::const_assert_eq;

use super::wire::{Reader, Writer};
use super::{DecodeError, NodeStats, NODE_STATS_LEN};

pub const PHYS_IF_MSG_MAX: u32 = 9;

pub const OPEN_LEN: usize = 16;
pub const MAC_ADDR_LEN: usize = 8;
pub const WORD_LEN: usize = 4;

/// Largest physical-interface payload.
pub const PHYS_IF_MAX_PAYLOAD: usize = NODE_STATS_LEN;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysIfMsgType {
    Open = 0,
    Close = 1,
    LinkState = 2,
    ChangeMtu = 3,
    MacAddr = 4,
    Pause = 5,
    VsiAssign = 6,
    VsiUnassign = 7,
    Stats = 8,
}

impl PhysIfMsgType {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => PhysIfMsgType::Open,
            1 => PhysIfMsgType::Close,
            2 => PhysIfMsgType::LinkState,
            3 => PhysIfMsgType::ChangeMtu,
            4 => PhysIfMsgType::MacAddr,
            5 => PhysIfMsgType::Pause,
            6 => PhysIfMsgType::VsiAssign,
            7 => PhysIfMsgType::VsiUnassign,
            8 => PhysIfMsgType::Stats,
            _ => return None,
        })
    }

    pub fn payload_len(self) -> usize {
        match self {
            PhysIfMsgType::Open => OPEN_LEN,
            PhysIfMsgType::Close => 0,
            PhysIfMsgType::MacAddr => MAC_ADDR_LEN,
            PhysIfMsgType::Stats => NODE_STATS_LEN,
            _ => WORD_LEN,
        }
    }
}

/// Ring and mode parameters of an open request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenParams {
    pub tx_desc_ring: u32,
    pub rx_desc_ring: u32,
    pub mode: u32,
    /// Skip firmware network processing and bounce straight to the host.
    pub bypass: bool,
}

#[repr(C)]
#[allow(dead_code)]
struct RawOpen {
    tx_desc_ring: u32,
    rx_desc_ring: u32,
    mode: u32,
    bypass_nw_process: u32,
}

#[repr(C)]
#[allow(dead_code)]
struct RawMacAddr {
    mac: [u8; 6],
    _pad: [u8; 2],
}

const_assert_eq!(size_of::<RawOpen>(), OPEN_LEN);
const_assert_eq!(size_of::<RawMacAddr>(), MAC_ADDR_LEN);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysIfMsg {
    Open(OpenParams),
    Close,
    /// Non-zero means link up.
    LinkState(u32),
    ChangeMtu(u32),
    MacAddr([u8; 6]),
    Pause(bool),
    VsiAssign(u32),
    VsiUnassign(u32),
    Stats(NodeStats),
}

impl PhysIfMsg {
    pub fn msg_type(&self) -> PhysIfMsgType {
        match self {
            PhysIfMsg::Open(_) => PhysIfMsgType::Open,
            PhysIfMsg::Close => PhysIfMsgType::Close,
            PhysIfMsg::LinkState(_) => PhysIfMsgType::LinkState,
            PhysIfMsg::ChangeMtu(_) => PhysIfMsgType::ChangeMtu,
            PhysIfMsg::MacAddr(_) => PhysIfMsgType::MacAddr,
            PhysIfMsg::Pause(_) => PhysIfMsgType::Pause,
            PhysIfMsg::VsiAssign(_) => PhysIfMsgType::VsiAssign,
            PhysIfMsg::VsiUnassign(_) => PhysIfMsgType::VsiUnassign,
            PhysIfMsg::Stats(_) => PhysIfMsgType::Stats,
        }
    }

    pub(super) fn encode(&self, w: &mut Writer<'_>) {
        match self {
            PhysIfMsg::Open(p) => {
                w.u32(p.tx_desc_ring);
                w.u32(p.rx_desc_ring);
                w.u32(p.mode);
                w.u32(p.bypass as u32);
            }
            PhysIfMsg::Close => {}
            PhysIfMsg::LinkState(v)
            | PhysIfMsg::ChangeMtu(v)
            | PhysIfMsg::VsiAssign(v)
            | PhysIfMsg::VsiUnassign(v) => w.u32(*v),
            PhysIfMsg::MacAddr(mac) => {
                w.bytes(mac);
                w.zeros(2);
            }
            PhysIfMsg::Pause(on) => w.u32(*on as u32),
            PhysIfMsg::Stats(s) => s.encode(w),
        }
    }

    pub(super) fn decode(msg_type: PhysIfMsgType, r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(match msg_type {
            PhysIfMsgType::Open => PhysIfMsg::Open(OpenParams {
                tx_desc_ring: r.u32()?,
                rx_desc_ring: r.u32()?,
                mode: r.u32()?,
                bypass: r.u32()? != 0,
            }),
            PhysIfMsgType::Close => PhysIfMsg::Close,
            PhysIfMsgType::LinkState => PhysIfMsg::LinkState(r.u32()?),
            PhysIfMsgType::ChangeMtu => PhysIfMsg::ChangeMtu(r.u32()?),
            PhysIfMsgType::MacAddr => {
                let mac = r.array::<6>()?;
                r.skip(2)?;
                PhysIfMsg::MacAddr(mac)
            }
            PhysIfMsgType::Pause => PhysIfMsg::Pause(r.u32()? != 0),
            PhysIfMsgType::VsiAssign => PhysIfMsg::VsiAssign(r.u32()?),
            PhysIfMsgType::VsiUnassign => PhysIfMsg::VsiUnassign(r.u32()?),
            PhysIfMsgType::Stats => PhysIfMsg::Stats(NodeStats::decode(r)?),
        })
    }
}
