//! Snapshot projection for network transmission

use crate::util::time::unix_millis;
use crate::ws::protocol::{PaddleSnapshot, PlayersSnapshot, ServerMsg};

use super::room::{PlayerSlot, RoomState};

/// Project room state into the wire snapshot, stamped with server time
/// so clients can compensate for one-way latency.
pub fn room_snapshot(state: &RoomState) -> ServerMsg {
    ServerMsg::StateSnapshot {
        players: PlayersSnapshot {
            left: state.players.left.as_ref().map(paddle_snapshot),
            right: state.players.right.as_ref().map(paddle_snapshot),
        },
        ball: state.ball.clone(),
        phase: state.phase,
        turn: state.turn,
        server_timestamp: unix_millis(),
    }
}

fn paddle_snapshot(player: &PlayerSlot) -> PaddleSnapshot {
    PaddleSnapshot {
        x: player.x,
        y: player.y,
        score: player.score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::{MatchPhase, Side};
    use uuid::Uuid;

    #[test]
    fn test_snapshot_projects_players_and_ball() {
        let mut state = RoomState::new("ROOM01".to_string(), 7);
        state.players.left = Some(PlayerSlot::new(Uuid::new_v4(), Side::Left));
        state.players.left.as_mut().unwrap().score = 2;
        state.turn = Side::Right;

        let msg = room_snapshot(&state);
        match msg {
            ServerMsg::StateSnapshot {
                players,
                ball,
                phase,
                turn,
                server_timestamp,
            } => {
                let left = players.left.unwrap();
                assert_eq!(left.score, 2);
                assert_eq!(left.x, crate::game::physics::LEFT_PADDLE_X);
                assert!(players.right.is_none());
                assert_eq!(ball.x, state.ball.x);
                assert_eq!(phase, MatchPhase::NotStarted);
                assert_eq!(turn, Side::Right);
                assert!(server_timestamp > 0);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
