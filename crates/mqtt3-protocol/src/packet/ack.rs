//! Packet-id-only acknowledgements: PUBACK, PUBREC, PUBREL, PUBCOMP and
//! UNSUBACK all share the same two-byte body.

use bytes::{BufMut, BytesMut};

use crate::encoding::Decoder;
use crate::error::{MqttError, Result};

macro_rules! define_ack_packet {
    (
        $(#[$meta:meta])*
        $name:ident, $label:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            pub packet_id: u16,
        }

        impl $name {
            pub fn new(packet_id: u16) -> Self {
                Self { packet_id }
            }

            pub fn decode_body(body: &[u8]) -> Result<Self> {
                let mut dec = Decoder::new(body);
                let packet_id = dec.read_u16()?;
                if packet_id == 0 {
                    return Err(MqttError::MalformedPacket(
                        concat!($label, " packet id 0").into(),
                    ));
                }
                Ok(Self { packet_id })
            }

            pub fn encode_body(&self, buf: &mut BytesMut) {
                buf.put_u16(self.packet_id);
            }
        }
    };
}

define_ack_packet! {
    /// QoS 1 publish acknowledgement.
    PubAckPacket, "PUBACK"
}

define_ack_packet! {
    /// QoS 2 delivery, first response.
    PubRecPacket, "PUBREC"
}

define_ack_packet! {
    /// QoS 2 delivery, release.
    PubRelPacket, "PUBREL"
}

define_ack_packet! {
    /// QoS 2 delivery, completion.
    PubCompPacket, "PUBCOMP"
}

define_ack_packet! {
    /// Unsubscribe acknowledgement.
    UnsubAckPacket, "UNSUBACK"
}
