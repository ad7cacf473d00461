/// Common message header (40 bytes, little-endian).
///
/// ```text
///  0  interface  u16
///  2  reserved   u16
///  4  type       u32
///  8  length     u32   payload bytes following the header
/// 12  response   u32   ResponseKind
/// 16  error      u32   firmware error code (nack only)
/// 20  reserved   u32
/// 24  callback   u64   opaque, echoed by the device
/// 32  app_data   u64   opaque, echoed by the device
/// ```
use core::mem::size_of;
use static_assertions::const_assert_eq;

use super::wire::{Reader, Writer};
use super::DecodeError;

pub const HEADER_LEN: usize = 40;

#[repr(C)]
#[allow(dead_code)]
struct RawHeader {
    interface: u16,
    _reserved0: u16,
    msg_type: u32,
    len: u32,
    response: u32,
    error: u32,
    _reserved1: u32,
    cb: u64,
    app_data: u64,
}

const_assert_eq!(size_of::<RawHeader>(), HEADER_LEN);

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    None = 0,
    Ack = 1,
    Nack = 2,
    /// Unsolicited; always delivered to the feature's notify subscriber.
    Notify = 3,
}

impl ResponseKind {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(ResponseKind::None),
            1 => Some(ResponseKind::Ack),
            2 => Some(ResponseKind::Nack),
            3 => Some(ResponseKind::Notify),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub interface: u16,
    pub msg_type: u32,
    /// Declared payload length.
    pub len: u32,
    pub response: ResponseKind,
    pub error: u32,
    /// Host-side completion token, 0 when none.
    pub cb: u64,
    pub app_data: u64,
}

impl Header {
    pub fn new(interface: u16, msg_type: u32, len: u32) -> Self {
        Self {
            interface,
            msg_type,
            len,
            response: ResponseKind::None,
            error: 0,
            cb: 0,
            app_data: 0,
        }
    }

    pub(super) fn encode(&self, w: &mut Writer<'_>) {
        w.u16(self.interface);
        w.u16(0);
        w.u32(self.msg_type);
        w.u32(self.len);
        w.u32(self.response as u32);
        w.u32(self.error);
        w.u32(0);
        w.u64(self.cb);
        w.u64(self.app_data);
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(buf);
        let interface = r.u16()?;
        r.skip(2)?;
        let msg_type = r.u32()?;
        let len = r.u32()?;
        let raw_response = r.u32()?;
        let response = ResponseKind::from_u32(raw_response).ok_or(DecodeError::BadResponse(raw_response))?;
        let error = r.u32()?;
        r.skip(4)?;
        let cb = r.u64()?;
        let app_data = r.u64()?;
        Ok(Self { interface, msg_type, len, response, error, cb, app_data })
    }
}
