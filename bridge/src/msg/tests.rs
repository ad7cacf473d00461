use super::gre::{GRE_MAX_PAYLOAD, GRE_MSG_MAX};
use super::phys_if::{PHYS_IF_MAX_PAYLOAD, PHYS_IF_MSG_MAX};
use super::*;

fn u32_at(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn set_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

// ---- Header ----

#[test]
fn header_field_offsets() {
    let mut msg = Message::new(0x1234, PhysIfMsg::LinkState(1));
    msg.header.response = ResponseKind::Nack;
    msg.header.error = 7;
    msg.header.cb = 0x1122_3344_5566_7788;
    msg.header.app_data = 0xA5A5_0000_0000_5A5A;

    let buf = msg.encode();
    assert_eq!(buf.len(), HEADER_LEN + 4);
    assert_eq!(&buf[0..2], &[0x34, 0x12]);
    assert_eq!(&buf[2..4], &[0, 0]);
    assert_eq!(u32_at(&buf, 4), PhysIfMsgType::LinkState as u32);
    assert_eq!(u32_at(&buf, 8), 4);
    assert_eq!(u32_at(&buf, 12), ResponseKind::Nack as u32);
    assert_eq!(u32_at(&buf, 16), 7);
    assert_eq!(u32_at(&buf, 20), 0);
    assert_eq!(&buf[24..32], &0x1122_3344_5566_7788u64.to_le_bytes());
    assert_eq!(&buf[32..40], &0xA5A5_0000_0000_5A5Au64.to_le_bytes());
    assert_eq!(u32_at(&buf, 40), 1);
}

#[test]
fn short_header_is_truncated() {
    let buf = Message::new(1, PhysIfMsg::Close).encode();
    assert!(matches!(
        Header::decode(&buf[..10]),
        Err(DecodeError::Truncated { got: 10, .. })
    ));
}

#[test]
fn unknown_response_kind_rejected() {
    let mut buf = Message::new(1, PhysIfMsg::Close).encode();
    set_u32(&mut buf, 12, 9);
    assert_eq!(Header::decode(&buf), Err(DecodeError::BadResponse(9)));
}

// ---- Length and type checks ----

#[test]
fn declared_length_above_largest_variant_rejected() {
    let mut buf = Message::new(5, PhysIfMsg::Stats(NodeStats::default())).encode();
    buf.resize(HEADER_LEN + 64, 0);
    set_u32(&mut buf, 8, 21);
    assert_eq!(
        Message::decode(Feature::PhysIf, &buf),
        Err(DecodeError::LengthTooLarge { len: 21, max: 20 })
    );

    let mut buf = Message::new(70, GreMsg::Deconfigure).encode();
    buf.resize(HEADER_LEN + 64, 0);
    set_u32(&mut buf, 8, (GRE_MAX_PAYLOAD + 1) as u32);
    assert!(matches!(
        Message::decode(Feature::Gre, &buf),
        Err(DecodeError::LengthTooLarge { max: GRE_MAX_PAYLOAD, .. })
    ));
}

#[test]
fn length_at_maximum_accepted() {
    let stats = NodeStats { rx_packets: 3, rx_bytes: 180, tx_packets: 1, tx_bytes: 60, rx_dropped: 0 };
    let buf = Message::new(5, PhysIfMsg::Stats(stats)).encode();
    assert_eq!(buf.len(), HEADER_LEN + PHYS_IF_MAX_PAYLOAD);

    let msg = Message::decode(Feature::PhysIf, &buf).unwrap();
    assert_eq!(msg.payload, Payload::PhysIf(PhysIfMsg::Stats(stats)));
}

#[test]
fn declared_length_below_type_size_rejected() {
    let mut buf = Message::new(5, PhysIfMsg::ChangeMtu(1500)).encode();
    set_u32(&mut buf, 8, 2);
    assert_eq!(
        Message::decode(Feature::PhysIf, &buf),
        Err(DecodeError::LengthTooShort { len: 2, need: 4 })
    );
}

#[test]
fn unknown_type_rejected() {
    let mut buf = Message::new(5, PhysIfMsg::Close).encode();
    set_u32(&mut buf, 4, PHYS_IF_MSG_MAX);
    assert_eq!(
        Message::decode(Feature::PhysIf, &buf),
        Err(DecodeError::UnknownType { feature: Feature::PhysIf, msg_type: PHYS_IF_MSG_MAX })
    );
    assert!(Feature::Gre.check(GRE_MSG_MAX, 0).is_err());
}

#[test]
fn payload_shorter_than_declared_is_truncated() {
    let buf = Message::new(5, PhysIfMsg::Stats(NodeStats::default())).encode();
    assert_eq!(
        Message::decode(Feature::PhysIf, &buf[..HEADER_LEN + 8]),
        Err(DecodeError::Truncated { need: HEADER_LEN + 20, got: HEADER_LEN + 8 })
    );
}

#[test]
fn padded_length_encodes_zeros() {
    let msg = Message::new(5, PhysIfMsg::Close).with_len(8);
    let buf = msg.encode();
    assert_eq!(buf.len(), HEADER_LEN + 8);
    assert!(buf[HEADER_LEN..].iter().all(|b| *b == 0));

    let back = Message::decode(Feature::PhysIf, &buf).unwrap();
    assert_eq!(back.header.len, 8);
    assert_eq!(back.payload, Payload::PhysIf(PhysIfMsg::Close));
}

// ---- Payload layouts ----

#[test]
fn gre_config_layout() {
    let cfg = GreConfig {
        mode: 2,
        ip_type: 4,
        flags: GreFlags::IKEY_VALID | GreFlags::OKEY_VALID,
        src_ip: [0x0A00_0001, 0, 0, 0],
        dst_ip: [0x0A00_0002, 0, 0, 0],
        ikey: 0x100,
        okey: 0x200,
        ttl: 64,
        tos: 0x10,
        mtu: 1476,
        next_node_if: 3,
    };
    let buf = Message::new(70, GreMsg::Configure(cfg)).encode();
    let p = &buf[HEADER_LEN..];
    assert_eq!(p.len(), gre::CONFIG_LEN);
    assert_eq!(u32_at(p, 8), 0b110);
    assert_eq!(u32_at(p, 12), 0x0A00_0001);
    assert_eq!(u32_at(p, 28), 0x0A00_0002);
    assert_eq!(u32_at(p, 44), 0x100);
    assert_eq!(u32_at(p, 48), 0x200);
    assert_eq!(p[52], 64);
    assert_eq!(p[53], 0x10);
    assert_eq!(&p[54..56], &1476u16.to_le_bytes());
    assert_eq!(u32_at(p, 56), 3);

    let back = Message::decode(Feature::Gre, &buf).unwrap();
    assert_eq!(back.payload, Payload::Gre(GreMsg::Configure(cfg)));
}

#[test]
fn mac_addr_padded_to_eight() {
    let mac = [0x02, 0x00, 0x5E, 0x10, 0x20, 0x30];
    let buf = Message::new(1, PhysIfMsg::MacAddr(mac)).encode();
    assert_eq!(&buf[HEADER_LEN..HEADER_LEN + 6], &mac);
    assert_eq!(&buf[HEADER_LEN + 6..], &[0, 0]);
}

#[test]
fn session_counters_in_table_order() {
    let mut stats = GreSessionStats::default();
    stats.node.rx_packets = 1;
    stats.node.rx_dropped = 5;
    stats.debug[0] = 6;
    stats.debug[7] = 13;

    let c = stats.counters();
    assert_eq!(c.len(), 13);
    assert_eq!(c[0], 1);
    assert_eq!(c[4], 5);
    assert_eq!(c[5], 6);
    assert_eq!(c[12], 13);
}

#[test]
fn interface_scope_per_type() {
    assert_eq!(Feature::Gre.scope(GreMsgType::BaseStats as u32), Some(InterfaceScope::Static));
    assert_eq!(Feature::Gre.scope(GreMsgType::Configure as u32), Some(InterfaceScope::Dynamic));
    assert_eq!(Feature::PhysIf.scope(PhysIfMsgType::Open as u32), Some(InterfaceScope::Static));
    assert_eq!(Feature::Gre.scope(99), None);
}
