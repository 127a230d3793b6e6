//! SUBSCRIBE, SUBACK and UNSUBSCRIBE.

use bytes::{BufMut, BytesMut};

use crate::encoding::{put_string, Decoder};
use crate::error::{MqttError, Result};
use crate::types::QoS;

/// SUBACK return code for a rejected filter.
pub const SUBACK_FAILURE: u8 = 0x80;

fn validate_filter(filter: &str) -> Result<()> {
    if filter.is_empty() {
        return Err(MqttError::MalformedPacket(
            "topic filter must not be empty".into(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribePacket {
    pub packet_id: u16,
    /// Topic filter plus requested QoS, in wire order.
    pub filters: Vec<(String, QoS)>,
}

impl SubscribePacket {
    pub fn decode_body(body: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(body);
        let packet_id = dec.read_u16()?;

        let mut filters = Vec::new();
        while dec.remaining() > 0 {
            let filter = dec.read_string()?;
            validate_filter(&filter)?;
            // MQTT-3.8.3-4: upper bits of the requested QoS byte are reserved.
            let qos_byte = dec.read_u8()?;
            if qos_byte & !0x03 != 0 {
                return Err(MqttError::MalformedPacket(format!(
                    "reserved bits in requested QoS: {:#04x}",
                    qos_byte
                )));
            }
            filters.push((filter, QoS::try_from(qos_byte)?));
        }

        // MQTT-3.8.3-3: at least one filter is required.
        if filters.is_empty() {
            return Err(MqttError::MalformedPacket("SUBSCRIBE with no filters".into()));
        }

        Ok(Self { packet_id, filters })
    }

    pub fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u16(self.packet_id);
        for (filter, qos) in &self.filters {
            put_string(buf, filter);
            buf.put_u8(*qos as u8);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAckPacket {
    pub packet_id: u16,
    /// One granted-QoS byte per requested filter; 0x80 marks failure.
    pub return_codes: Vec<u8>,
}

impl SubAckPacket {
    pub fn decode_body(body: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(body);
        let packet_id = dec.read_u16()?;

        let mut return_codes = Vec::with_capacity(dec.remaining());
        while dec.remaining() > 0 {
            let code = dec.read_u8()?;
            if code > 2 && code != SUBACK_FAILURE {
                return Err(MqttError::MalformedPacket(format!(
                    "invalid SUBACK return code: {:#04x}",
                    code
                )));
            }
            return_codes.push(code);
        }

        Ok(Self {
            packet_id,
            return_codes,
        })
    }

    pub fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u16(self.packet_id);
        buf.put_slice(&self.return_codes);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribePacket {
    pub packet_id: u16,
    pub filters: Vec<String>,
}

impl UnsubscribePacket {
    pub fn decode_body(body: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(body);
        let packet_id = dec.read_u16()?;

        let mut filters = Vec::new();
        while dec.remaining() > 0 {
            let filter = dec.read_string()?;
            validate_filter(&filter)?;
            filters.push(filter);
        }

        if filters.is_empty() {
            return Err(MqttError::MalformedPacket(
                "UNSUBSCRIBE with no filters".into(),
            ));
        }

        Ok(Self { packet_id, filters })
    }

    pub fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u16(self.packet_id);
        for filter in &self.filters {
            put_string(buf, filter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_requires_a_filter() {
        assert!(SubscribePacket::decode_body(&[0x00, 0x01]).is_err());
    }

    #[test]
    fn subscribe_rejects_reserved_qos_bits() {
        let mut buf = BytesMut::new();
        buf.put_u16(1);
        put_string(&mut buf, "a");
        buf.put_u8(0x04);
        assert!(SubscribePacket::decode_body(&buf).is_err());
    }

    #[test]
    fn subscribe_rejects_empty_filter() {
        let mut buf = BytesMut::new();
        buf.put_u16(1);
        put_string(&mut buf, "");
        buf.put_u8(0x00);
        assert!(SubscribePacket::decode_body(&buf).is_err());
    }

    #[test]
    fn suback_accepts_failure_code() {
        let suback = SubAckPacket::decode_body(&[0x00, 0x01, 0x02, 0x80]).unwrap();
        assert_eq!(suback.return_codes, vec![0x02, 0x80]);
    }

    #[test]
    fn suback_rejects_unknown_code() {
        assert!(SubAckPacket::decode_body(&[0x00, 0x01, 0x03]).is_err());
    }

    #[test]
    fn unsubscribe_preserves_filter_order() {
        let mut buf = BytesMut::new();
        buf.put_u16(9);
        put_string(&mut buf, "b/#");
        put_string(&mut buf, "a/+");
        let unsub = UnsubscribePacket::decode_body(&buf).unwrap();
        assert_eq!(unsub.filters, vec!["b/#".to_string(), "a/+".to_string()]);
    }
}
