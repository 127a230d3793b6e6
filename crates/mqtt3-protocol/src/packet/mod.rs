//! The tagged packet value and its fixed header.

pub mod ack;
pub mod connect;
pub mod publish;
pub mod subscribe;

use bytes::{BufMut, BytesMut};

use crate::encoding::{decode_remaining_length, encode_remaining_length};
use crate::error::{MqttError, Result};
use crate::types::{PacketType, QoS};

pub use ack::{PubAckPacket, PubCompPacket, PubRecPacket, PubRelPacket, UnsubAckPacket};
pub use connect::{ConnAckPacket, ConnectPacket};
pub use publish::PublishPacket;
pub use subscribe::{SubAckPacket, SubscribePacket, UnsubscribePacket};

/// The 2-5 byte preamble of every MQTT packet: one control byte, then a
/// variable-length remaining-length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    /// Duplicate delivery flag; PUBLISH only.
    pub dup: bool,
    /// QoS carried in the flags; PUBLISH only.
    pub qos: QoS,
    /// Retain flag; PUBLISH only.
    pub retain: bool,
    /// Length of the packet body following this header.
    pub remaining: usize,
}

impl FixedHeader {
    pub fn new(packet_type: PacketType, remaining: usize) -> Self {
        Self {
            packet_type,
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            remaining,
        }
    }

    /// Decode the control byte: type nibble plus flags. `remaining` is left
    /// at zero; the caller fills it in after reading the length field.
    ///
    /// Flag bits are validated per MQTT-2.2.2: PUBLISH interprets them,
    /// SUBSCRIBE/UNSUBSCRIBE/PUBREL require 0b0010, everything else 0b0000.
    pub fn from_control_byte(byte: u8) -> Result<Self> {
        let packet_type = PacketType::try_from(byte >> 4)?;
        let flags = byte & 0x0F;

        match packet_type {
            PacketType::Publish => Ok(Self {
                packet_type,
                dup: flags & 0x08 != 0,
                qos: QoS::try_from((flags >> 1) & 0x03)?,
                retain: flags & 0x01 != 0,
                remaining: 0,
            }),
            PacketType::Subscribe | PacketType::Unsubscribe | PacketType::PubRel => {
                if flags != 0x02 {
                    return Err(MqttError::MalformedPacket(format!(
                        "{:?} flags must be 0x02, got {:#04x}",
                        packet_type, flags
                    )));
                }
                Ok(Self::new(packet_type, 0))
            }
            _ => {
                if flags != 0 {
                    return Err(MqttError::MalformedPacket(format!(
                        "{:?} flags must be 0, got {:#04x}",
                        packet_type, flags
                    )));
                }
                Ok(Self::new(packet_type, 0))
            }
        }
    }

    pub fn control_byte(&self) -> u8 {
        let flags = match self.packet_type {
            PacketType::Publish => {
                (u8::from(self.dup) << 3) | ((self.qos as u8) << 1) | u8::from(self.retain)
            }
            PacketType::Subscribe | PacketType::Unsubscribe | PacketType::PubRel => 0x02,
            _ => 0,
        };
        ((self.packet_type as u8) << 4) | flags
    }

    /// Parse a header out of a byte prefix, without consuming it.
    ///
    /// Returns the header and the number of prefix bytes it occupies, or
    /// `None` when the prefix is too short to hold the length field yet.
    pub fn parse(prefix: &[u8]) -> Result<Option<(Self, usize)>> {
        let Some((&control, rest)) = prefix.split_first() else {
            return Ok(None);
        };
        let mut header = Self::from_control_byte(control)?;
        match decode_remaining_length(rest)? {
            Some((remaining, len_bytes)) => {
                header.remaining = remaining;
                Ok(Some((header, 1 + len_bytes)))
            }
            None => Ok(None),
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.control_byte());
        encode_remaining_length(self.remaining, buf);
    }
}

/// An MQTT 3.1.1 control packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Connect(ConnectPacket),
    ConnAck(ConnAckPacket),
    Publish(PublishPacket),
    PubAck(PubAckPacket),
    PubRec(PubRecPacket),
    PubRel(PubRelPacket),
    PubComp(PubCompPacket),
    Subscribe(SubscribePacket),
    SubAck(SubAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubAck(UnsubAckPacket),
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::ConnAck(_) => PacketType::ConnAck,
            Packet::Publish(_) => PacketType::Publish,
            Packet::PubAck(_) => PacketType::PubAck,
            Packet::PubRec(_) => PacketType::PubRec,
            Packet::PubRel(_) => PacketType::PubRel,
            Packet::PubComp(_) => PacketType::PubComp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::SubAck(_) => PacketType::SubAck,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::UnsubAck(_) => PacketType::UnsubAck,
            Packet::PingReq => PacketType::PingReq,
            Packet::PingResp => PacketType::PingResp,
            Packet::Disconnect => PacketType::Disconnect,
        }
    }

    /// Decode a packet body against its already-parsed fixed header.
    ///
    /// PINGREQ, PINGRESP and DISCONNECT have zero-length bodies and decode
    /// without touching `body`.
    pub fn decode(header: &FixedHeader, body: &[u8]) -> Result<Packet> {
        match header.packet_type {
            PacketType::Connect => ConnectPacket::decode_body(body).map(Packet::Connect),
            PacketType::ConnAck => ConnAckPacket::decode_body(body).map(Packet::ConnAck),
            PacketType::Publish => {
                PublishPacket::decode_body(header, body).map(Packet::Publish)
            }
            PacketType::PubAck => PubAckPacket::decode_body(body).map(Packet::PubAck),
            PacketType::PubRec => PubRecPacket::decode_body(body).map(Packet::PubRec),
            PacketType::PubRel => PubRelPacket::decode_body(body).map(Packet::PubRel),
            PacketType::PubComp => PubCompPacket::decode_body(body).map(Packet::PubComp),
            PacketType::Subscribe => SubscribePacket::decode_body(body).map(Packet::Subscribe),
            PacketType::SubAck => SubAckPacket::decode_body(body).map(Packet::SubAck),
            PacketType::Unsubscribe => {
                UnsubscribePacket::decode_body(body).map(Packet::Unsubscribe)
            }
            PacketType::UnsubAck => UnsubAckPacket::decode_body(body).map(Packet::UnsubAck),
            PacketType::PingReq => Ok(Packet::PingReq),
            PacketType::PingResp => Ok(Packet::PingResp),
            PacketType::Disconnect => Ok(Packet::Disconnect),
        }
    }

    /// Encode the complete wire frame, fixed header included.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut body = BytesMut::new();
        let mut header = FixedHeader::new(self.packet_type(), 0);

        match self {
            Packet::Connect(p) => p.encode_body(&mut body),
            Packet::ConnAck(p) => p.encode_body(&mut body),
            Packet::Publish(p) => {
                header.dup = p.dup;
                header.qos = p.qos;
                header.retain = p.retain;
                p.encode_body(&mut body)?;
            }
            Packet::PubAck(p) => p.encode_body(&mut body),
            Packet::PubRec(p) => p.encode_body(&mut body),
            Packet::PubRel(p) => p.encode_body(&mut body),
            Packet::PubComp(p) => p.encode_body(&mut body),
            Packet::Subscribe(p) => p.encode_body(&mut body),
            Packet::SubAck(p) => p.encode_body(&mut body),
            Packet::Unsubscribe(p) => p.encode_body(&mut body),
            Packet::UnsubAck(p) => p.encode_body(&mut body),
            Packet::PingReq | Packet::PingResp | Packet::Disconnect => {}
        }

        header.remaining = body.len();
        header.encode(buf);
        buf.extend_from_slice(&body);
        Ok(())
    }
}
