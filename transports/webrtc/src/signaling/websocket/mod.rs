//! Trusted WebSocket relay
//!
//! Assigns identities, tracks presence for a single room and forwards
//! offer/answer/candidate payloads between participants.

mod hub;
mod rate_limit;
mod server;

pub use hub::Hub;
pub use rate_limit::RateLimiter;
pub use server::{RelayHandle, RelayServer};
