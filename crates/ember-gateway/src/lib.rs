//! Herf session relay: authenticated WebSocket rooms with persisted chat.

pub mod auth;
pub mod connection;
pub mod registry;
pub mod relay;
pub mod upgrade;

pub use registry::{ConnectionId, Registry};
pub use relay::{Rejection, Relay};
pub use upgrade::router;
