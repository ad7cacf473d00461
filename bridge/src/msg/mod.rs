//! Typed control messages and their byte-exact wire encoding.
//!
//! A message is the 40-byte common header followed by `header.len` payload
//! bytes. Which payload union applies is decided by the feature that owns
//! the interface, not by the message itself.

pub mod gre;
pub mod header;
pub mod phys_if;
mod wire;

#[cfg(test)]
mod tests;

pub use gre::{GreBaseStats, GreConfig, GreFlags, GreMsg, GreMsgType, GreSessionStats};
pub use header::{Header, ResponseKind, HEADER_LEN};
pub use phys_if::{OpenParams, PhysIfMsg, PhysIfMsgType};

use alloc::vec::Vec;
use core::fmt;

use wire::{Reader, Writer};

pub const NODE_STATS_LEN: usize = 20;

/// Logical features with their own message namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Gre = 0,
    PhysIf = 1,
}

/// Which half of the interface space a message type addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceScope {
    /// Feature-global, fixed interface numbers.
    Static,
    /// Per-session, runtime-allocated interface numbers.
    Dynamic,
}

impl Feature {
    pub const COUNT: usize = 2;
    pub const ALL: [Feature; Feature::COUNT] = [Feature::Gre, Feature::PhysIf];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Message types at or above this are unknown.
    pub fn max_msg_type(self) -> u32 {
        match self {
            Feature::Gre => gre::GRE_MSG_MAX,
            Feature::PhysIf => phys_if::PHYS_IF_MSG_MAX,
        }
    }

    /// Size of the largest payload variant.
    pub fn max_payload_len(self) -> usize {
        match self {
            Feature::Gre => gre::GRE_MAX_PAYLOAD,
            Feature::PhysIf => phys_if::PHYS_IF_MAX_PAYLOAD,
        }
    }

    /// Encoded size of `msg_type`'s payload, if the type is known.
    pub fn payload_len(self, msg_type: u32) -> Option<usize> {
        match self {
            Feature::Gre => GreMsgType::from_u32(msg_type).map(GreMsgType::payload_len),
            Feature::PhysIf => PhysIfMsgType::from_u32(msg_type).map(PhysIfMsgType::payload_len),
        }
    }

    pub fn scope(self, msg_type: u32) -> Option<InterfaceScope> {
        match self {
            Feature::Gre => GreMsgType::from_u32(msg_type).map(GreMsgType::scope),
            Feature::PhysIf => PhysIfMsgType::from_u32(msg_type).map(|_| InterfaceScope::Static),
        }
    }

    /// Type and declared-length checks shared by the rx and tx paths.
    pub fn check(self, msg_type: u32, len: u32) -> Result<(), DecodeError> {
        if msg_type >= self.max_msg_type() {
            return Err(DecodeError::UnknownType { feature: self, msg_type });
        }
        let max = self.max_payload_len();
        if len as usize > max {
            return Err(DecodeError::LengthTooLarge { len, max });
        }
        let need = self.payload_len(msg_type).unwrap_or(0);
        if (len as usize) < need {
            return Err(DecodeError::LengthTooShort { len, need });
        }
        Ok(())
    }

    /// Passes if any feature accepts the type and length. Used before the
    /// owning feature is known.
    pub fn check_any(msg_type: u32, len: u32) -> Result<(), DecodeError> {
        let mut first = None;
        for feature in Feature::ALL {
            match feature.check(msg_type, len) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    first.get_or_insert(e);
                }
            }
        }
        first.map_or(Ok(()), Err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    Truncated { need: usize, got: usize },
    BadResponse(u32),
    UnknownType { feature: Feature, msg_type: u32 },
    LengthTooLarge { len: u32, max: usize },
    LengthTooShort { len: u32, need: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated { need, got } => {
                write!(f, "message truncated: need {} bytes, got {}", need, got)
            }
            DecodeError::BadResponse(v) => write!(f, "bad response kind {}", v),
            DecodeError::UnknownType { feature, msg_type } => {
                write!(f, "unknown {:?} message type {}", feature, msg_type)
            }
            DecodeError::LengthTooLarge { len, max } => {
                write!(f, "payload length {} exceeds maximum {}", len, max)
            }
            DecodeError::LengthTooShort { len, need } => {
                write!(f, "payload length {} below type size {}", len, need)
            }
        }
    }
}

/// Generic node counters shared by several features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeStats {
    pub rx_packets: u32,
    pub rx_bytes: u32,
    pub tx_packets: u32,
    pub tx_bytes: u32,
    pub rx_dropped: u32,
}

impl NodeStats {
    pub fn as_array(&self) -> [u32; 5] {
        [self.rx_packets, self.rx_bytes, self.tx_packets, self.tx_bytes, self.rx_dropped]
    }

    fn encode(&self, w: &mut Writer<'_>) {
        for v in self.as_array() {
            w.u32(v);
        }
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let [rx_packets, rx_bytes, tx_packets, tx_bytes, rx_dropped] = r.u32_array::<5>()?;
        Ok(Self { rx_packets, rx_bytes, tx_packets, tx_bytes, rx_dropped })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    Gre(GreMsg),
    PhysIf(PhysIfMsg),
}

impl Payload {
    pub fn feature(&self) -> Feature {
        match self {
            Payload::Gre(_) => Feature::Gre,
            Payload::PhysIf(_) => Feature::PhysIf,
        }
    }

    pub fn msg_type(&self) -> u32 {
        match self {
            Payload::Gre(m) => m.msg_type() as u32,
            Payload::PhysIf(m) => m.msg_type() as u32,
        }
    }

    /// Encoded size of this variant.
    pub fn wire_len(&self) -> usize {
        match self {
            Payload::Gre(m) => m.msg_type().payload_len(),
            Payload::PhysIf(m) => m.msg_type().payload_len(),
        }
    }
}

impl From<GreMsg> for Payload {
    fn from(m: GreMsg) -> Self {
        Payload::Gre(m)
    }
}

impl From<PhysIfMsg> for Payload {
    fn from(m: PhysIfMsg) -> Self {
        Payload::PhysIf(m)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub payload: Payload,
}

impl Message {
    /// Header filled from the payload: type, exact length, no response.
    pub fn new(interface: u16, payload: impl Into<Payload>) -> Self {
        let payload = payload.into();
        let header = Header::new(interface, payload.msg_type(), payload.wire_len() as u32);
        Self { header, payload }
    }

    /// Override the declared length. Extra bytes are zero on the wire.
    pub fn with_len(mut self, len: u32) -> Self {
        self.header.len = len;
        self
    }

    pub fn feature(&self) -> Feature {
        self.payload.feature()
    }

    pub fn interface(&self) -> u16 {
        self.header.interface
    }

    pub fn msg_type(&self) -> u32 {
        self.header.msg_type
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.header.len as usize
    }

    /// Header followed by exactly `header.len` payload bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len().max(HEADER_LEN + self.payload.wire_len()));
        let mut w = Writer::new(&mut out);
        self.header.encode(&mut w);
        match &self.payload {
            Payload::Gre(m) => m.encode(&mut w),
            Payload::PhysIf(m) => m.encode(&mut w),
        }
        out.resize(self.encoded_len(), 0);
        out
    }

    /// Parse a message of `feature`. Type and length are checked before the
    /// payload is touched.
    pub fn decode(feature: Feature, buf: &[u8]) -> Result<Self, DecodeError> {
        let header = Header::decode(buf)?;
        feature.check(header.msg_type, header.len)?;

        let end = HEADER_LEN + header.len as usize;
        if buf.len() < end {
            return Err(DecodeError::Truncated { need: end, got: buf.len() });
        }
        let mut r = Reader::new(&buf[HEADER_LEN..end]);

        let payload = match feature {
            Feature::Gre => {
                let ty = GreMsgType::from_u32(header.msg_type)
                    .ok_or(DecodeError::UnknownType { feature, msg_type: header.msg_type })?;
                Payload::Gre(GreMsg::decode(ty, &mut r)?)
            }
            Feature::PhysIf => {
                let ty = PhysIfMsgType::from_u32(header.msg_type)
                    .ok_or(DecodeError::UnknownType { feature, msg_type: header.msg_type })?;
                Payload::PhysIf(PhysIfMsg::decode(ty, &mut r)?)
            }
        };
        Ok(Self { header, payload })
    }
}
