//! CONNECT and CONNACK.

use bytes::{BufMut, Bytes, BytesMut};

use crate::encoding::{put_binary, put_string, Decoder};
use crate::error::{MqttError, Result};
use crate::types::QoS;

/// Last will and testament captured from the CONNECT packet. Immutable once
/// decoded; the broker publishes it when the session ends ungracefully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectPacket {
    pub protocol_name: String,
    /// 3 = MQTT 3.1 ("MQIsdp"), 4 = MQTT 3.1.1.
    pub protocol_version: u8,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub will: Option<LastWill>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
}

impl ConnectPacket {
    pub fn decode_body(body: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(body);

        let protocol_name = dec.read_string()?;
        if protocol_name != "MQTT" && protocol_name != "MQIsdp" {
            return Err(MqttError::InvalidProtocolName(protocol_name));
        }

        let protocol_version = dec.read_u8()?;
        if protocol_version != 4 && protocol_version != 3 {
            return Err(MqttError::UnsupportedProtocolVersion(protocol_version));
        }

        let flags = dec.read_u8()?;
        if flags & 0x01 != 0 {
            return Err(MqttError::MalformedPacket(
                "reserved connect flag must be 0".into(),
            ));
        }
        let clean_session = flags & 0x02 != 0;
        let will_flag = flags & 0x04 != 0;
        let will_qos = QoS::try_from((flags >> 3) & 0x03)?;
        let will_retain = flags & 0x20 != 0;
        let password_flag = flags & 0x40 != 0;
        let username_flag = flags & 0x80 != 0;

        // MQTT-3.1.2-11..15: will qos/retain are meaningless without the flag.
        if !will_flag && (will_qos != QoS::AtMostOnce || will_retain) {
            return Err(MqttError::MalformedPacket(
                "will qos/retain set without will flag".into(),
            ));
        }
        // MQTT-3.1.2-22.
        if !username_flag && password_flag {
            return Err(MqttError::MalformedPacket(
                "password flag set without username flag".into(),
            ));
        }

        let keep_alive = dec.read_u16()?;
        let client_id = dec.read_string()?;

        let will = if will_flag {
            let topic = dec.read_string()?;
            let payload = dec.read_binary()?;
            Some(LastWill {
                topic,
                payload,
                qos: will_qos,
                retain: will_retain,
            })
        } else {
            None
        };

        let username = if username_flag {
            Some(dec.read_string()?)
        } else {
            None
        };
        let password = if password_flag {
            Some(dec.read_binary()?)
        } else {
            None
        };

        Ok(Self {
            protocol_name,
            protocol_version,
            clean_session,
            keep_alive,
            client_id,
            will,
            username,
            password,
        })
    }

    pub fn encode_body(&self, buf: &mut BytesMut) {
        put_string(buf, &self.protocol_name);
        buf.put_u8(self.protocol_version);

        let mut flags = 0u8;
        if self.clean_session {
            flags |= 0x02;
        }
        if let Some(will) = &self.will {
            flags |= 0x04 | ((will.qos as u8) << 3);
            if will.retain {
                flags |= 0x20;
            }
        }
        if self.password.is_some() {
            flags |= 0x40;
        }
        if self.username.is_some() {
            flags |= 0x80;
        }
        buf.put_u8(flags);

        buf.put_u16(self.keep_alive);
        put_string(buf, &self.client_id);

        if let Some(will) = &self.will {
            put_string(buf, &will.topic);
            put_binary(buf, &will.payload);
        }
        if let Some(username) = &self.username {
            put_string(buf, username);
        }
        if let Some(password) = &self.password {
            put_binary(buf, password);
        }
    }
}

/// CONNACK return codes, MQTT 3.1.1 table 3.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUsernameOrPassword = 4,
    NotAuthorized = 5,
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = MqttError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Accepted),
            1 => Ok(Self::UnacceptableProtocolVersion),
            2 => Ok(Self::IdentifierRejected),
            3 => Ok(Self::ServerUnavailable),
            4 => Ok(Self::BadUsernameOrPassword),
            5 => Ok(Self::NotAuthorized),
            other => Err(MqttError::MalformedPacket(format!(
                "invalid connack return code: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAckPacket {
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

impl ConnAckPacket {
    pub fn new(session_present: bool, return_code: ConnectReturnCode) -> Self {
        Self {
            session_present,
            return_code,
        }
    }

    pub fn decode_body(body: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(body);
        let ack_flags = dec.read_u8()?;
        if ack_flags & 0xFE != 0 {
            return Err(MqttError::MalformedPacket(
                "connack flags bits 1-7 must be 0".into(),
            ));
        }
        let return_code = ConnectReturnCode::try_from(dec.read_u8()?)?;
        Ok(Self {
            session_present: ack_flags & 0x01 != 0,
            return_code,
        })
    }

    pub fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u8(u8::from(self.session_present));
        buf.put_u8(self.return_code as u8);
    }
}
