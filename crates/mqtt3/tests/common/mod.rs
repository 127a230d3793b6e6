#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use mqtt3::{EngineConfig, Session};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

/// A started session wired to an in-memory peer. The periodic resend tick
/// is disabled so tests drive every resend pass themselves.
pub async fn started_session() -> (
    Arc<Session>,
    WriteHalf<DuplexStream>,
    ReadHalf<DuplexStream>,
) {
    started_session_with(EngineConfig::default().with_resend_interval(Duration::ZERO)).await
}

pub async fn started_session_with(
    config: EngineConfig,
) -> (
    Arc<Session>,
    WriteHalf<DuplexStream>,
    ReadHalf<DuplexStream>,
) {
    let (stream, peer) = tokio::io::duplex(4096);
    let (peer_rx, peer_tx) = tokio::io::split(peer);
    let session = Session::new(stream, config);
    session.start().await;
    (session, peer_tx, peer_rx)
}

/// CONNECT: clean session, keepalive 60, empty client id.
pub const CONNECT_EMPTY_ID: [u8; 14] = [
    0x10, 0x0C, 0x00, 0x04, 0x4D, 0x51, 0x54, 0x54, 0x04, 0x02, 0x00, 0x3C, 0x00, 0x00,
];
