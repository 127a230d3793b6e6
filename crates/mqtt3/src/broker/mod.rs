//! Broker-side session engine: the per-client [`Session`], the registry of
//! live sessions, QoS in-flight state, and the capability interfaces the
//! broker plugs in.

pub mod auth;
pub mod config;
pub mod inflight;
pub mod registry;
pub mod session;

pub use auth::{AllowAll, AuthController};
pub use config::EngineConfig;
pub use inflight::{InFlight, InFlightMessage, MAX_RESENDS, RESEND_BACKOFF};
pub use registry::Registry;
pub use session::Session;
