//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};

/// Player side within a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Role assigned to a connection when it joins a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Left,
    Right,
    Spectator,
}

impl From<Side> for Role {
    fn from(side: Side) -> Self {
        match side {
            Side::Left => Role::Left,
            Side::Right => Role::Right,
        }
    }
}

/// Paddle movement direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveDirection {
    Up,
    Down,
}

/// Match phase within a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    /// Room open, match not started
    NotStarted,
    /// Started, waiting for the serving side
    AwaitingServe,
    /// Rally in progress
    Active,
    /// Win threshold reached
    Finished,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Join a room by id, or create a fresh one when no id is given
    JoinRoom {
        room_id: Option<String>,
    },

    /// Start the match (both players present, phase not started)
    StartMatch,

    /// Serve the ball
    Serve {
        /// Logical timestamp of the serve, used for tie-breaking
        lamport: u64,
    },

    /// Move own paddle one step
    Move {
        direction: MoveDirection,
        /// Logical timestamp gating stale moves
        lamport: u64,
    },

    /// Spectator answer to the promotion prompt
    SpectatorResponse {
        accept: bool,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Leave the current room (injected on transport close)
    Disconnect,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Confirmation of room join with the resolved role
    JoinedRoom {
        room_id: String,
        role: Role,
    },

    /// Authoritative room state (sent after every simulation step and mutation)
    StateSnapshot {
        players: PlayersSnapshot,
        ball: BallState,
        phase: MatchPhase,
        turn: Side,
        /// Server time in unix millis for client latency compensation
        server_timestamp: u64,
    },

    /// Match reached the win threshold
    MatchOver {
        winner: Side,
        score: u32,
    },

    /// Asks a spectator whether they want to play when a slot opens
    SpectatorPrompt {
        message: String,
    },

    /// A queued spectator was moved into a vacated player slot
    PromotedToPlayer {
        side: Side,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

/// Both paddle slots as seen by clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayersSnapshot {
    pub left: Option<PaddleSnapshot>,
    pub right: Option<PaddleSnapshot>,
}

/// One player's paddle and score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaddleSnapshot {
    pub x: f32,
    pub y: f32,
    pub score: u32,
}

/// Ball position and velocity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BallState {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub radius: f32,
}
