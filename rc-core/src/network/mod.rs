//! Controller link: endpoint validation and the WebSocket-backed
//! connection manager.

pub mod connection;
pub mod endpoint;

pub use connection::{ConnectionManager, InboundEvent, InboundKind};
pub use endpoint::Endpoint;
