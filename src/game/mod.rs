//! Room simulation and session modules

pub mod admission;
pub mod clock;
pub mod offload;
pub mod physics;
pub mod room;
pub mod snapshot;

pub use room::{GameRoom, RoomHandle, RoomRegistry};

use crate::ws::protocol::{ClientMsg, ServerMsg};
use uuid::Uuid;

/// Command received from a connection, tagged with its origin
#[derive(Debug, Clone)]
pub struct RoomCommand {
    pub conn_id: Uuid,
    pub msg: ClientMsg,
    pub received_at: u64,
}

/// Outbound room message; `target: None` means every room member
#[derive(Debug, Clone)]
pub struct RoomMsg {
    pub target: Option<Uuid>,
    pub msg: ServerMsg,
}
