//! # MQTT 3.1.1 Session Engine
//!
//! The per-client session engine of an MQTT 3.1.1 broker: one [`Session`]
//! per live connection, owning the two-direction packet pipeline, QoS 1/2
//! in-flight state, keepalive enforcement, and the start/stop lifecycle.
//!
//! ## Architecture
//!
//! This library uses Rust's native async/await patterns throughout:
//! - Two background drainer tasks per connection pump bytes between the
//!   socket and the session's framed byte channel
//! - The broker drives its own handler loop through [`Session::read`]
//! - The Tokio runtime for task scheduling
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mqtt3::broker::{AllowAll, EngineConfig, Registry, Session};
//! use mqtt3::Packet;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(Registry::new());
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:1883").await?;
//!
//!     loop {
//!         let (stream, _) = listener.accept().await?;
//!         let session = Session::new(stream, EngineConfig::default());
//!         session.start().await;
//!
//!         let registry = Arc::clone(&registry);
//!         tokio::spawn(async move {
//!             let result = session
//!                 .read(|session, packet| async move {
//!                     if let Packet::Connect(connect) = &packet {
//!                         session.identify("tcp", connect, Arc::new(AllowAll));
//!                     }
//!                     // ... dispatch the remaining packet kinds ...
//!                     Ok(())
//!                 })
//!                 .await;
//!             if result.is_err() {
//!                 session.stop().await;
//!             }
//!             registry.delete(&session.client_id()).await;
//!         });
//!     }
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]

pub mod broker;
pub mod channel;

pub use mqtt3_protocol as protocol;

pub use broker::auth::{AllowAll, AuthController};
pub use broker::config::EngineConfig;
pub use broker::inflight::{InFlight, InFlightMessage};
pub use broker::registry::Registry;
pub use broker::session::Session;
pub use protocol::{MqttError, Packet, PacketType, QoS, Result};
