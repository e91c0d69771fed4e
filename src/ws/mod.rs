//! WebSocket transport layer

pub mod handler;
pub mod protocol;
