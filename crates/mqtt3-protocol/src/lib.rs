//! # MQTT 3.1.1 Protocol
//!
//! Packet types and wire codec for MQTT 3.1.1: the tagged [`Packet`] value,
//! the [`FixedHeader`] with its variable-length remaining-length field, and
//! per-variant encode/decode.
//!
//! This crate is purely about bytes; it performs no I/O. The session engine
//! in the `mqtt3` crate feeds it header prefixes and packet bodies read from
//! its framed byte channel.

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]

pub mod encoding;
pub mod error;
pub mod packet;
pub mod types;

pub use error::{MqttError, Result};
pub use packet::ack::{PubAckPacket, PubCompPacket, PubRecPacket, PubRelPacket, UnsubAckPacket};
pub use packet::connect::{ConnAckPacket, ConnectPacket, ConnectReturnCode, LastWill};
pub use packet::publish::PublishPacket;
pub use packet::subscribe::{SubAckPacket, SubscribePacket, UnsubscribePacket};
pub use packet::{FixedHeader, Packet};
pub use types::{PacketType, QoS};
