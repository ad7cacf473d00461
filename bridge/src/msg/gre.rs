/// GRE tunnel messages.
use core::mem::size_of;
use static_assertions::const_assert_eq;

use super::wire::{Reader, Writer};
use super::{DecodeError, InterfaceScope, NodeStats, NODE_STATS_LEN};

/// Number of known GRE message types; anything at or above is rejected.
pub const GRE_MSG_MAX: u32 = 4;

/// Debug counters carried by a per-session stats sync.
pub const SESSION_DEBUG_MAX: usize = 8;
/// Debug counters carried by a feature-wide stats sync.
pub const BASE_DEBUG_MAX: usize = 12;

pub const CONFIG_LEN: usize = 60;
pub const SESSION_STATS_LEN: usize = NODE_STATS_LEN + 4 * SESSION_DEBUG_MAX;
pub const BASE_STATS_LEN: usize = 4 * BASE_DEBUG_MAX;

/// Largest GRE payload.
pub const GRE_MAX_PAYLOAD: usize = CONFIG_LEN;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GreMsgType {
    Configure = 0,
    Deconfigure = 1,
    SessionStats = 2,
    BaseStats = 3,
}

impl GreMsgType {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(GreMsgType::Configure),
            1 => Some(GreMsgType::Deconfigure),
            2 => Some(GreMsgType::SessionStats),
            3 => Some(GreMsgType::BaseStats),
            _ => None,
        }
    }

    pub fn scope(self) -> InterfaceScope {
        match self {
            GreMsgType::BaseStats => InterfaceScope::Static,
            _ => InterfaceScope::Dynamic,
        }
    }

    pub fn payload_len(self) -> usize {
        match self {
            GreMsgType::Configure => CONFIG_LEN,
            GreMsgType::Deconfigure => 0,
            GreMsgType::SessionStats => SESSION_STATS_LEN,
            GreMsgType::BaseStats => BASE_STATS_LEN,
        }
    }
}

bitflags::bitflags! {
    /// Tunnel option flags in [`GreConfig::flags`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct GreFlags: u32 {
        const CSUM        = 1 << 0;
        const IKEY_VALID  = 1 << 1;
        const OKEY_VALID  = 1 << 2;
        const SEQ         = 1 << 3;
        const TTL_INHERIT = 1 << 4;
        const TOS_INHERIT = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GreConfig {
    /// Tunnel mode (GRE-TUN, GRE-TAP, ...), opaque to the host.
    pub mode: u32,
    /// 4 for IPv4, 6 for IPv6.
    pub ip_type: u32,
    pub flags: GreFlags,
    pub src_ip: [u32; 4],
    pub dst_ip: [u32; 4],
    pub ikey: u32,
    pub okey: u32,
    pub ttl: u8,
    pub tos: u8,
    pub mtu: u16,
    /// Interface the firmware forwards decapsulated traffic to.
    pub next_node_if: u32,
}

#[repr(C)]
#[allow(dead_code)]
struct RawGreConfig {
    mode: u32,
    ip_type: u32,
    flags: u32,
    src_ip: [u32; 4],
    dst_ip: [u32; 4],
    ikey: u32,
    okey: u32,
    ttl: u8,
    tos: u8,
    mtu: u16,
    next_node_if: u32,
}

const_assert_eq!(size_of::<RawGreConfig>(), CONFIG_LEN);

impl GreConfig {
    fn encode(&self, w: &mut Writer<'_>) {
        w.u32(self.mode);
        w.u32(self.ip_type);
        w.u32(self.flags.bits());
        for v in self.src_ip.iter().chain(self.dst_ip.iter()) {
            w.u32(*v);
        }
        w.u32(self.ikey);
        w.u32(self.okey);
        w.u8(self.ttl);
        w.u8(self.tos);
        w.u16(self.mtu);
        w.u32(self.next_node_if);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            mode: r.u32()?,
            ip_type: r.u32()?,
            flags: GreFlags::from_bits_retain(r.u32()?),
            src_ip: r.u32_array()?,
            dst_ip: r.u32_array()?,
            ikey: r.u32()?,
            okey: r.u32()?,
            ttl: r.u8()?,
            tos: r.u8()?,
            mtu: r.u16()?,
            next_node_if: r.u32()?,
        })
    }
}

/// Per-session statistics sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GreSessionStats {
    pub node: NodeStats,
    /// Exception counters (bad checksum, key mismatch, ...).
    pub debug: [u32; SESSION_DEBUG_MAX],
}

#[repr(C)]
#[allow(dead_code)]
struct RawGreSessionStats {
    node: [u32; 5],
    debug: [u32; SESSION_DEBUG_MAX],
}

const_assert_eq!(size_of::<RawGreSessionStats>(), SESSION_STATS_LEN);

impl GreSessionStats {
    /// Counters in session-table order: node stats, then debug.
    pub fn counters(&self) -> [u32; 5 + SESSION_DEBUG_MAX] {
        let mut out = [0u32; 5 + SESSION_DEBUG_MAX];
        out[..5].copy_from_slice(&self.node.as_array());
        out[5..].copy_from_slice(&self.debug);
        out
    }
}

/// Feature-wide statistics sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GreBaseStats {
    pub debug: [u32; BASE_DEBUG_MAX],
}

const_assert_eq!(size_of::<GreBaseStats>(), BASE_STATS_LEN);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GreMsg {
    Configure(GreConfig),
    Deconfigure,
    SessionStats(GreSessionStats),
    BaseStats(GreBaseStats),
}

impl GreMsg {
    pub fn msg_type(&self) -> GreMsgType {
        match self {
            GreMsg::Configure(_) => GreMsgType::Configure,
            GreMsg::Deconfigure => GreMsgType::Deconfigure,
            GreMsg::SessionStats(_) => GreMsgType::SessionStats,
            GreMsg::BaseStats(_) => GreMsgType::BaseStats,
        }
    }

    pub(super) fn encode(&self, w: &mut Writer<'_>) {
        match self {
            GreMsg::Configure(cfg) => cfg.encode(w),
            GreMsg::Deconfigure => {}
            GreMsg::SessionStats(s) => {
                s.node.encode(w);
                for v in s.debug {
                    w.u32(v);
                }
            }
            GreMsg::BaseStats(s) => {
                for v in s.debug {
                    w.u32(v);
                }
            }
        }
    }

    pub(super) fn decode(msg_type: GreMsgType, r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(match msg_type {
            GreMsgType::Configure => GreMsg::Configure(GreConfig::decode(r)?),
            GreMsgType::Deconfigure => GreMsg::Deconfigure,
            GreMsgType::SessionStats => GreMsg::SessionStats(GreSessionStats {
                node: NodeStats::decode(r)?,
                debug: r.u32_array()?,
            }),
            GreMsgType::BaseStats => GreMsg::BaseStats(GreBaseStats { debug: r.u32_array()? }),
        })
    }
}
