//! PUBLISH.

use bytes::{BufMut, Bytes, BytesMut};

use crate::encoding::{put_string, Decoder};
use crate::error::{MqttError, Result};
use crate::packet::FixedHeader;
use crate::types::QoS;

#[derive(Debug, Clone, PartialEq)]
pub struct PublishPacket {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    /// Present exactly when `qos > 0`.
    pub packet_id: Option<u16>,
    pub payload: Bytes,
}

impl PublishPacket {
    /// The dup/qos/retain flags live in the fixed header, so decoding needs
    /// the header alongside the body.
    pub fn decode_body(header: &FixedHeader, body: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(body);

        let topic = dec.read_string()?;
        if topic.contains(['+', '#']) {
            return Err(MqttError::MalformedPacket(
                "publish topic must not contain wildcards".into(),
            ));
        }

        let packet_id = if header.qos == QoS::AtMostOnce {
            None
        } else {
            let id = dec.read_u16()?;
            if id == 0 {
                return Err(MqttError::MalformedPacket("packet id 0".into()));
            }
            Some(id)
        };

        // MQTT-3.3.1-2: dup must be 0 on a QoS 0 publish.
        if header.dup && header.qos == QoS::AtMostOnce {
            return Err(MqttError::MalformedPacket("dup set on QoS 0".into()));
        }

        Ok(Self {
            dup: header.dup,
            qos: header.qos,
            retain: header.retain,
            topic,
            packet_id,
            payload: dec.read_rest(),
        })
    }

    pub fn encode_body(&self, buf: &mut BytesMut) -> Result<()> {
        put_string(buf, &self.topic);
        if self.qos != QoS::AtMostOnce {
            let id = self
                .packet_id
                .ok_or_else(|| MqttError::MalformedPacket("QoS > 0 without packet id".into()))?;
            buf.put_u16(id);
        }
        buf.put_slice(&self.payload);
        Ok(())
    }
}
