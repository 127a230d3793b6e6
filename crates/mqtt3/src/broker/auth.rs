//! Authentication capability interface.
//!
//! The engine never authenticates anyone itself; the broker hands each
//! session an [`AuthController`] at identify time and consults it again for
//! per-topic authorization while dispatching packets.

use std::future::Future;
use std::pin::Pin;

use crate::protocol::ConnectPacket;

/// Capability interface inherited from the listener that accepted the
/// connection.
pub trait AuthController: Send + Sync {
    /// Whether the credentials in a CONNECT packet are acceptable.
    fn authenticate<'a>(
        &'a self,
        connect: &'a ConnectPacket,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

    /// Whether `username` may publish to (`write == true`) or subscribe to
    /// (`write == false`) the given topic.
    fn authorize<'a>(
        &'a self,
        username: Option<&'a str>,
        topic: &'a str,
        write: bool,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;
}

/// Accepts every connection and every topic. The default controller for
/// listeners without an auth policy.
pub struct AllowAll;

impl AuthController for AllowAll {
    fn authenticate<'a>(
        &'a self,
        _connect: &'a ConnectPacket,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async { true })
    }

    fn authorize<'a>(
        &'a self,
        _username: Option<&'a str>,
        _topic: &'a str,
        _write: bool,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async { true })
    }
}
