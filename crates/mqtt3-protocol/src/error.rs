use thiserror::Error;

pub type Result<T> = std::result::Result<T, MqttError>;

/// Error type shared by the codec and the session engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MqttError {
    #[error("IO error: {0}")]
    Io(String),

    /// A write was attempted after the session shut down.
    #[error("connection not open")]
    ConnectionClosed,

    /// The remaining-length field carried a continuation bit in its fourth
    /// byte; MQTT 3.1.1 allows at most four length bytes.
    #[error("oversized remaining-length indicator")]
    OversizedLengthIndicator,

    #[error("invalid packet type: {0}")]
    InvalidPacketType(u8),

    #[error("invalid QoS: {0}")]
    InvalidQoS(u8),

    #[error("invalid protocol name: {0}")]
    InvalidProtocolName(String),

    #[error("unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(u8),

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    #[error("packet too large: {size} exceeds maximum {max}")]
    PacketTooLarge { size: usize, max: usize },

    /// The outbound buffer refused a frame; the peer is draining too slowly.
    #[error("write buffer full: {queued} queued, limit {limit}")]
    BufferFull { queued: usize, limit: usize },

    #[error("keep alive timeout")]
    KeepAliveTimeout,
}

impl From<std::io::Error> for MqttError {
    fn from(err: std::io::Error) -> Self {
        MqttError::Io(err.to_string())
    }
}
