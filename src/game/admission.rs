//! Command admission: accept or reject state-mutating client commands
//!
//! Commands arrive over independent, unordered channels. Arrival order
//! is meaningless, so each causal channel (the serve channel and one
//! move channel per side) is gated by logical timestamps instead.
//! Rejection is always silent; clients reconcile via the next snapshot.

use crate::ws::protocol::{MatchPhase, MoveDirection, Side};

use super::physics::{self, PADDLE_STEP};
use super::room::{RoomState, ServeRecord};

/// Decide a serve command and apply its effect if accepted.
///
/// The serve channel keeps the *earliest* logical timestamp it has
/// seen: a freshly contested serve needs phase `AwaitingServe`, while a
/// later-arriving serve with a strictly smaller timestamp beats the
/// stored one even if the rally already went live, overwriting it and
/// re-resetting the ball. Re-submitting the stored timestamp loses the
/// strict comparison, which makes acceptance idempotent.
///
/// Only the side whose turn it is may serve; both slots must be
/// occupied and the match started.
pub fn admit_serve(state: &mut RoomState, side: Side, lamport: u64) -> bool {
    if !state.both_occupied() {
        return false;
    }
    if matches!(state.phase, MatchPhase::NotStarted | MatchPhase::Finished) {
        return false;
    }
    if side != state.turn {
        return false;
    }

    match state.last_serve {
        None => {
            if state.phase != MatchPhase::AwaitingServe {
                return false;
            }
        }
        Some(stored) => {
            if lamport >= stored.lamport {
                return false;
            }
        }
    }

    state.ball = physics::reset_ball();
    state.phase = MatchPhase::Active;
    state.last_serve = Some(ServeRecord { lamport, side });
    true
}

/// Decide a move command and apply its effect if accepted.
///
/// Per-side monotonic gating: only timestamps strictly greater than the
/// side's last accepted one pass, so a stale "down" can never arrive
/// after a fresh "up" and corrupt the paddle position.
pub fn admit_move(
    state: &mut RoomState,
    side: Side,
    direction: MoveDirection,
    lamport: u64,
) -> bool {
    if state.players.get(side).is_none() {
        return false;
    }
    if lamport <= *state.last_accepted.get(side) {
        return false;
    }

    *state.last_accepted.get_mut(side) = lamport;

    if let Some(player) = state.players.get_mut(side) {
        let delta = match direction {
            MoveDirection::Up => -PADDLE_STEP,
            MoveDirection::Down => PADDLE_STEP,
        };
        player.y = physics::clamp_paddle_y(player.y + delta);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::physics::{FIELD_HEIGHT, PADDLE_HEIGHT, PADDLE_START_Y};
    use crate::game::room::PlayerSlot;
    use uuid::Uuid;

    fn room_with_players() -> RoomState {
        let mut state = RoomState::new("ROOM01".to_string(), 7);
        state.players.left = Some(PlayerSlot::new(Uuid::new_v4(), Side::Left));
        state.players.right = Some(PlayerSlot::new(Uuid::new_v4(), Side::Right));
        state.phase = MatchPhase::AwaitingServe;
        state.turn = Side::Left;
        state
    }

    #[test]
    fn test_serve_accepted_when_awaiting() {
        let mut state = room_with_players();
        assert!(admit_serve(&mut state, Side::Left, 4));
        assert_eq!(state.phase, MatchPhase::Active);
        let serve = state.last_serve.unwrap();
        assert_eq!(serve.lamport, 4);
        assert_eq!(serve.side, Side::Left);
    }

    #[test]
    fn test_serve_rejected_out_of_turn() {
        let mut state = room_with_players();
        assert!(!admit_serve(&mut state, Side::Right, 4));
        assert_eq!(state.phase, MatchPhase::AwaitingServe);
        assert!(state.last_serve.is_none());
    }

    #[test]
    fn test_serve_rejected_without_opponent() {
        let mut state = room_with_players();
        state.players.right = None;
        assert!(!admit_serve(&mut state, Side::Left, 4));
    }

    #[test]
    fn test_serve_rejected_before_start_and_after_finish() {
        let mut state = room_with_players();
        state.phase = MatchPhase::NotStarted;
        assert!(!admit_serve(&mut state, Side::Left, 4));
        state.phase = MatchPhase::Finished;
        assert!(!admit_serve(&mut state, Side::Left, 4));
    }

    #[test]
    fn test_earliest_serve_wins_regardless_of_arrival_order() {
        let mut state = room_with_players();
        // Later logical timestamp lands first
        assert!(admit_serve(&mut state, Side::Left, 7));
        assert_eq!(state.phase, MatchPhase::Active);
        // The logically earlier serve overrides it
        assert!(admit_serve(&mut state, Side::Left, 3));
        assert_eq!(state.last_serve.unwrap().lamport, 3);
        // And nothing later gets in
        assert!(!admit_serve(&mut state, Side::Left, 5));
        assert_eq!(state.last_serve.unwrap().lamport, 3);
    }

    #[test]
    fn test_serve_is_idempotent() {
        let mut state = room_with_players();
        assert!(admit_serve(&mut state, Side::Left, 4));
        assert!(!admit_serve(&mut state, Side::Left, 4));
    }

    #[test]
    fn test_move_requires_increasing_timestamps() {
        let mut state = room_with_players();
        assert!(admit_move(&mut state, Side::Left, MoveDirection::Up, 2));
        assert!(!admit_move(&mut state, Side::Left, MoveDirection::Down, 2));
        assert!(!admit_move(&mut state, Side::Left, MoveDirection::Down, 1));
        assert_eq!(state.last_accepted.left, 2);
        assert_eq!(
            state.players.left.as_ref().unwrap().y,
            PADDLE_START_Y - PADDLE_STEP
        );
    }

    #[test]
    fn test_move_channels_are_independent_per_side() {
        let mut state = room_with_players();
        assert!(admit_move(&mut state, Side::Left, MoveDirection::Up, 5));
        // The right side still starts from zero
        assert!(admit_move(&mut state, Side::Right, MoveDirection::Down, 1));
        assert_eq!(state.last_accepted.left, 5);
        assert_eq!(state.last_accepted.right, 1);
    }

    #[test]
    fn test_move_rejected_for_empty_slot() {
        let mut state = room_with_players();
        state.players.right = None;
        assert!(!admit_move(&mut state, Side::Right, MoveDirection::Up, 1));
    }

    #[test]
    fn test_moves_clamp_at_playfield_bounds() {
        let mut state = room_with_players();
        for lamport in 1..=10 {
            admit_move(&mut state, Side::Left, MoveDirection::Up, lamport);
        }
        assert_eq!(state.players.left.as_ref().unwrap().y, 0.0);

        for lamport in 11..=20 {
            admit_move(&mut state, Side::Left, MoveDirection::Down, lamport);
        }
        assert_eq!(
            state.players.left.as_ref().unwrap().y,
            FIELD_HEIGHT - PADDLE_HEIGHT
        );
    }

    /// Replaying an increasing-timestamp sequence yields the cumulative
    /// clamped position; interleaved stale timestamps are no-ops.
    #[test]
    fn test_move_replay_ignores_stale_interleavings() {
        let mut state = room_with_players();
        admit_move(&mut state, Side::Left, MoveDirection::Down, 3);
        admit_move(&mut state, Side::Left, MoveDirection::Up, 1); // stale
        admit_move(&mut state, Side::Left, MoveDirection::Down, 4);
        admit_move(&mut state, Side::Left, MoveDirection::Up, 2); // stale
        assert_eq!(
            state.players.left.as_ref().unwrap().y,
            PADDLE_START_Y + 2.0 * PADDLE_STEP
        );
    }
}
