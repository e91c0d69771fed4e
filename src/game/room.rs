//! Room state, registry, and the authoritative room task

use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info};
use uuid::Uuid;

use crate::util::time::{unix_millis, TICK_DURATION_MICROS};
use crate::ws::protocol::{BallState, ClientMsg, MatchPhase, Role, ServerMsg, Side};

use super::admission;
use super::clock::LamportClock;
use super::offload::OffloadHandle;
use super::physics::{self, SimFrame, StepOutcome, PADDLE_START_Y, WIN_SCORE};
use super::snapshot;
use super::{RoomCommand, RoomMsg};

/// Length of generated room identifiers
const ROOM_ID_LEN: usize = 6;

/// Ticks a freshly created room waits for its first join before closing
const JOIN_GRACE_TICKS: u64 = 600;

/// A pair of values keyed by side
#[derive(Debug, Clone, Default)]
pub struct SidePair<T> {
    pub left: T,
    pub right: T,
}

impl<T> SidePair<T> {
    pub fn get(&self, side: Side) -> &T {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn get_mut(&mut self, side: Side) -> &mut T {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }
}

/// One occupied player slot
#[derive(Debug, Clone)]
pub struct PlayerSlot {
    pub conn_id: Uuid,
    pub x: f32,
    pub y: f32,
    pub score: u32,
}

impl PlayerSlot {
    pub fn new(conn_id: Uuid, side: Side) -> Self {
        let x = match side {
            Side::Left => physics::LEFT_PADDLE_X,
            Side::Right => physics::RIGHT_PADDLE_X,
        };
        Self {
            conn_id,
            x,
            y: PADDLE_START_Y,
            score: 0,
        }
    }
}

/// The accepted serve on the serve channel
#[derive(Debug, Clone, Copy)]
pub struct ServeRecord {
    pub lamport: u64,
    pub side: Side,
}

/// Authoritative room state (owned by the room task)
pub struct RoomState {
    pub id: String,
    pub players: SidePair<Option<PlayerSlot>>,
    pub spectators: HashSet<Uuid>,
    /// Spectators that opted in for promotion, FIFO
    pub waiting: VecDeque<Uuid>,
    pub ball: BallState,
    pub phase: MatchPhase,
    pub turn: Side,
    pub last_serve: Option<ServeRecord>,
    /// Per-side last-accepted move timestamp
    pub last_accepted: SidePair<u64>,
    /// Scheduled turn flip after a paddle contact, unix millis
    pub turn_flip_deadline: Option<u64>,
    /// Diagnostic observation clock, never used for admission
    pub observed: LamportClock,
    pub rng: ChaCha8Rng,
}

impl RoomState {
    pub fn new(id: String, seed: u64) -> Self {
        Self {
            id,
            players: SidePair::default(),
            spectators: HashSet::new(),
            waiting: VecDeque::new(),
            ball: physics::reset_ball(),
            phase: MatchPhase::NotStarted,
            turn: Side::Left,
            last_serve: None,
            last_accepted: SidePair::default(),
            turn_flip_deadline: None,
            observed: LamportClock::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Side occupied by this connection, if any
    pub fn side_of(&self, conn_id: Uuid) -> Option<Side> {
        for side in [Side::Left, Side::Right] {
            if self
                .players
                .get(side)
                .as_ref()
                .is_some_and(|p| p.conn_id == conn_id)
            {
                return Some(side);
            }
        }
        None
    }

    /// First vacant side, left before right
    pub fn vacant_side(&self) -> Option<Side> {
        if self.players.left.is_none() {
            Some(Side::Left)
        } else if self.players.right.is_none() {
            Some(Side::Right)
        } else {
            None
        }
    }

    pub fn player_count(&self) -> usize {
        [Side::Left, Side::Right]
            .into_iter()
            .filter(|&s| self.players.get(s).is_some())
            .count()
    }

    pub fn both_occupied(&self) -> bool {
        self.players.left.is_some() && self.players.right.is_some()
    }

    /// Start the match: pick the serving side and await the serve.
    /// Starting again from `Finished` begins a fresh match with
    /// cleared scores. Returns false when the phase does not allow it.
    pub fn start_match(&mut self) -> bool {
        match self.phase {
            MatchPhase::NotStarted => {}
            MatchPhase::Finished => {
                for side in [Side::Left, Side::Right] {
                    if let Some(player) = self.players.get_mut(side) {
                        player.score = 0;
                    }
                }
                self.last_serve = None;
                self.last_accepted = SidePair::default();
                self.ball = physics::reset_ball();
                self.turn_flip_deadline = None;
            }
            MatchPhase::AwaitingServe | MatchPhase::Active => return false,
        }

        self.turn = if self.rng.gen_bool(0.5) {
            Side::Left
        } else {
            Side::Right
        };
        self.phase = MatchPhase::AwaitingServe;
        true
    }

    /// Full match reset after a disconnect: scores, ball, phase, and all
    /// admission channels back to their initial state.
    pub fn reset_match(&mut self) {
        for side in [Side::Left, Side::Right] {
            if let Some(player) = self.players.get_mut(side) {
                player.score = 0;
            }
        }
        self.ball = physics::reset_ball();
        self.phase = MatchPhase::NotStarted;
        self.last_serve = None;
        self.last_accepted = SidePair::default();
        self.turn_flip_deadline = None;
    }

    /// Project the physics-relevant state for one step
    pub fn sim_frame(&self, now_ms: u64) -> SimFrame {
        SimFrame {
            ball: self.ball.clone(),
            turn: self.turn,
            left_y: self.players.left.as_ref().map_or(PADDLE_START_Y, |p| p.y),
            right_y: self.players.right.as_ref().map_or(PADDLE_START_Y, |p| p.y),
            turn_flip_deadline: self.turn_flip_deadline,
            now_ms,
        }
    }
}

/// Handle to a running room
#[derive(Clone)]
pub struct RoomHandle {
    pub id: String,
    pub command_tx: mpsc::Sender<RoomCommand>,
    pub events_tx: broadcast::Sender<RoomMsg>,
    pub player_count: Arc<AtomicUsize>,
}

impl RoomHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }
}

/// Registry of all active rooms (identifier -> handle).
///
/// Creation is idempotent: concurrent joins to the same unknown id race
/// through the map's entry API and the first writer wins.
pub struct RoomRegistry {
    rooms: DashMap<String, RoomHandle>,
    sim_offload: bool,
}

impl RoomRegistry {
    pub fn new(sim_offload: bool) -> Self {
        Self {
            rooms: DashMap::new(),
            sim_offload,
        }
    }

    pub fn get(&self, id: &str) -> Option<RoomHandle> {
        self.rooms.get(id).map(|r| r.value().clone())
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_players(&self) -> usize {
        self.rooms.iter().map(|r| r.value().player_count()).sum()
    }

    /// Resolve a join request to a live room handle, creating and
    /// spawning the room task when the id is unknown or absent.
    pub fn join_or_create(self: &Arc<Self>, requested: Option<String>) -> RoomHandle {
        let id = requested.unwrap_or_else(generate_room_id);

        match self.rooms.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => entry.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let seed = rand::random::<u64>();
                let (room, handle) = GameRoom::new(id.clone(), seed, self.sim_offload);
                entry.insert(handle.clone());

                let registry = Arc::clone(self);
                tokio::spawn(async move {
                    room.run().await;
                    registry.rooms.remove(&id);
                    info!(room_id = %id, "Room removed from registry");
                });

                handle
            }
        }
    }
}

fn generate_room_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ROOM_ID_LEN)
        .map(char::from)
        .collect()
}

/// The authoritative room: single owner of its state, processing
/// commands and simulation steps without interleaving within a tick
pub struct GameRoom {
    state: RoomState,
    command_rx: mpsc::Receiver<RoomCommand>,
    events_tx: broadcast::Sender<RoomMsg>,
    player_count: Arc<AtomicUsize>,
    offload: Option<OffloadHandle>,
    tick: u64,
    /// Set once any connection has joined; an emptied room then closes
    ever_joined: bool,
    closing: bool,
}

impl GameRoom {
    pub fn new(id: String, seed: u64, sim_offload: bool) -> (Self, RoomHandle) {
        let (command_tx, command_rx) = mpsc::channel(256);
        let (events_tx, _) = broadcast::channel(64);
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = RoomHandle {
            id: id.clone(),
            command_tx,
            events_tx: events_tx.clone(),
            player_count: player_count.clone(),
        };

        let room = Self {
            state: RoomState::new(id, seed),
            command_rx,
            events_tx,
            player_count,
            offload: sim_offload.then(OffloadHandle::spawn),
            tick: 0,
            ever_joined: false,
            closing: false,
        };

        (room, handle)
    }

    /// Run the authoritative tick loop until the room empties
    pub async fn run(mut self) {
        info!(room_id = %self.state.id, "Room opened");

        let tick_duration = Duration::from_micros(TICK_DURATION_MICROS);
        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut idle_ticks: u64 = 0;
        loop {
            tick_interval.tick().await;

            self.process_commands();
            self.run_tick(unix_millis());

            if self.closing
                || (self.ever_joined
                    && self.state.player_count() == 0
                    && self.state.spectators.is_empty())
            {
                break;
            }

            // A room whose creator never completed the join is abandoned
            if !self.ever_joined {
                idle_ticks += 1;
                if idle_ticks > JOIN_GRACE_TICKS {
                    break;
                }
            }
        }

        info!(room_id = %self.state.id, "Room closed");
    }

    /// Drain the command queue and apply admission decisions
    fn process_commands(&mut self) {
        while let Ok(command) = self.command_rx.try_recv() {
            self.handle_command(command);
        }
    }

    fn handle_command(&mut self, command: RoomCommand) {
        let conn_id = command.conn_id;
        match command.msg {
            ClientMsg::JoinRoom { .. } => self.handle_join(conn_id),
            ClientMsg::StartMatch => {
                if self.state.both_occupied() && self.state.start_match() {
                    info!(
                        room_id = %self.state.id,
                        turn = ?self.state.turn,
                        "Match started"
                    );
                    self.broadcast_snapshot();
                }
            }
            ClientMsg::Serve { lamport } => {
                let observed = self.state.observed.observe(lamport);
                debug!(
                    room_id = %self.state.id,
                    conn_id = %conn_id,
                    lamport,
                    observed,
                    "Serve command"
                );
                if let Some(side) = self.state.side_of(conn_id) {
                    if admission::admit_serve(&mut self.state, side, lamport) {
                        // The serve reset invalidates any frame the
                        // worker is still stepping
                        let tick = self.tick;
                        if let Some(offload) = self.offload.as_mut() {
                            offload.discard_pending(tick);
                        }
                        self.broadcast_snapshot();
                    }
                }
            }
            ClientMsg::Move { direction, lamport } => {
                let observed = self.state.observed.observe(lamport);
                debug!(
                    room_id = %self.state.id,
                    conn_id = %conn_id,
                    lamport,
                    observed,
                    "Move command"
                );
                if let Some(side) = self.state.side_of(conn_id) {
                    if admission::admit_move(&mut self.state, side, direction, lamport) {
                        self.broadcast_snapshot();
                    }
                }
            }
            ClientMsg::SpectatorResponse { accept } => {
                self.handle_spectator_response(conn_id, accept);
            }
            ClientMsg::Disconnect => self.handle_disconnect(conn_id),
            // Latency pings are answered at the connection layer
            ClientMsg::Ping { .. } => {}
        }
    }

    fn handle_join(&mut self, conn_id: Uuid) {
        self.ever_joined = true;

        // Duplicate join from the same connection is a no-op
        if self.state.side_of(conn_id).is_some() || self.state.spectators.contains(&conn_id) {
            return;
        }

        let role = if let Some(side) = self.state.vacant_side() {
            *self.state.players.get_mut(side) = Some(PlayerSlot::new(conn_id, side));
            Role::from(side)
        } else {
            self.state.spectators.insert(conn_id);
            self.send_to(
                conn_id,
                ServerMsg::SpectatorPrompt {
                    message: "Room is full. Do you want to play when a paddle frees up?"
                        .to_string(),
                },
            );
            Role::Spectator
        };

        self.player_count
            .store(self.state.player_count(), Ordering::Relaxed);

        self.send_to(
            conn_id,
            ServerMsg::JoinedRoom {
                room_id: self.state.id.clone(),
                role,
            },
        );

        info!(
            room_id = %self.state.id,
            conn_id = %conn_id,
            role = ?role,
            "Connection joined room"
        );

        self.broadcast_snapshot();
    }

    fn handle_spectator_response(&mut self, conn_id: Uuid, accept: bool) {
        if !accept || !self.state.spectators.contains(&conn_id) {
            return;
        }
        if !self.state.waiting.contains(&conn_id) {
            self.state.waiting.push_back(conn_id);
            debug!(
                room_id = %self.state.id,
                conn_id = %conn_id,
                queue_len = self.state.waiting.len(),
                "Spectator queued for promotion"
            );
        }
    }

    fn handle_disconnect(&mut self, conn_id: Uuid) {
        let vacated = self.state.side_of(conn_id);

        if let Some(side) = vacated {
            *self.state.players.get_mut(side) = None;
        } else if !self.state.spectators.remove(&conn_id) {
            // Unknown connection, nothing to do
            return;
        }
        self.state.waiting.retain(|id| *id != conn_id);

        // Promote the head of the waiting list into the vacated slot
        if let Some(side) = vacated {
            if let Some(next) = self.state.waiting.pop_front() {
                self.state.spectators.remove(&next);
                *self.state.players.get_mut(side) = Some(PlayerSlot::new(next, side));
                self.send_to(next, ServerMsg::PromotedToPlayer { side });
                info!(
                    room_id = %self.state.id,
                    conn_id = %next,
                    side = ?side,
                    "Spectator promoted to player"
                );
            }
        }

        self.player_count
            .store(self.state.player_count(), Ordering::Relaxed);

        info!(
            room_id = %self.state.id,
            conn_id = %conn_id,
            remaining_players = self.state.player_count(),
            "Connection left room"
        );

        if self.state.player_count() == 0 {
            self.closing = true;
            return;
        }

        // Any departure with players remaining restarts the match from
        // scratch; resuming with a missing or substituted player is
        // never allowed.
        self.state.reset_match();
        let tick = self.tick;
        if let Some(offload) = self.offload.as_mut() {
            offload.discard_pending(tick);
        }
        self.broadcast_snapshot();
    }

    /// Run one simulation step. Public to the crate so the tick cadence
    /// stays in `run` while tests drive steps directly.
    pub(crate) fn run_tick(&mut self, now_ms: u64) {
        if self.state.phase != MatchPhase::Active {
            return;
        }

        if self.offload.is_some() {
            let result = self.offload.as_mut().and_then(|o| o.take_result());
            if let Some(result) = result {
                self.apply_frame(result.frame, result.outcome);
                self.broadcast_snapshot();
            }
            self.tick += 1;
            // Re-check: the applied result may have ended the rally
            if self.state.phase == MatchPhase::Active {
                let tick = self.tick;
                let frame = self.state.sim_frame(now_ms);
                if let Some(offload) = self.offload.as_mut() {
                    offload.submit(tick, frame);
                }
            }
        } else {
            let mut frame = self.state.sim_frame(now_ms);
            let outcome = physics::step(&mut frame);
            self.apply_frame(frame, outcome);
            self.broadcast_snapshot();
        }
    }

    /// Fold a stepped frame back into the authoritative state
    fn apply_frame(&mut self, frame: SimFrame, outcome: StepOutcome) {
        self.state.ball = frame.ball;
        self.state.turn = frame.turn;
        self.state.turn_flip_deadline = frame.turn_flip_deadline;

        if let StepOutcome::PointScored { winner } = outcome {
            self.state.phase = MatchPhase::AwaitingServe;

            let score = if let Some(player) = self.state.players.get_mut(winner) {
                player.score += 1;
                player.score
            } else {
                0
            };

            if score >= WIN_SCORE {
                self.state.phase = MatchPhase::Finished;
                self.state.turn_flip_deadline = None;
                self.broadcast(ServerMsg::MatchOver { winner, score });
                info!(
                    room_id = %self.state.id,
                    winner = ?winner,
                    score,
                    "Match over"
                );
                return;
            }

            self.state.ball = physics::reset_ball();
            self.state.turn = winner;
            self.state.last_serve = None;
            self.state.turn_flip_deadline = None;
        }
    }

    fn broadcast_snapshot(&self) {
        self.broadcast(snapshot::room_snapshot(&self.state));
    }

    fn broadcast(&self, msg: ServerMsg) {
        let _ = self.events_tx.send(RoomMsg { target: None, msg });
    }

    fn send_to(&self, conn_id: Uuid, msg: ServerMsg) {
        let _ = self.events_tx.send(RoomMsg {
            target: Some(conn_id),
            msg,
        });
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &RoomState {
        &self.state
    }

    #[cfg(test)]
    pub(crate) fn state_mut(&mut self) -> &mut RoomState {
        &mut self.state
    }

    #[cfg(test)]
    pub(crate) fn is_closing(&self) -> bool {
        self.closing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_room() -> (GameRoom, broadcast::Receiver<RoomMsg>) {
        let (room, handle) = GameRoom::new("ROOM01".to_string(), 42, false);
        (room, handle.events_tx.subscribe())
    }

    fn join(room: &mut GameRoom, conn_id: Uuid) {
        room.handle_command(RoomCommand {
            conn_id,
            msg: ClientMsg::JoinRoom { room_id: None },
            received_at: 0,
        });
    }

    fn command(room: &mut GameRoom, conn_id: Uuid, msg: ClientMsg) {
        room.handle_command(RoomCommand {
            conn_id,
            msg,
            received_at: 0,
        });
    }

    fn drain<T>(rx: &mut broadcast::Receiver<RoomMsg>, mut pick: impl FnMut(&RoomMsg) -> Option<T>) -> Vec<T> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let Some(v) = pick(&msg) {
                out.push(v);
            }
        }
        out
    }

    #[test]
    fn test_join_assigns_left_then_right_then_spectator() {
        let (mut room, mut rx) = make_room();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        join(&mut room, a);
        join(&mut room, b);
        join(&mut room, c);

        assert_eq!(room.state().side_of(a), Some(Side::Left));
        assert_eq!(room.state().side_of(b), Some(Side::Right));
        assert!(room.state().spectators.contains(&c));

        let roles = drain(&mut rx, |m| match &m.msg {
            ServerMsg::JoinedRoom { role, .. } => Some((m.target, *role)),
            _ => None,
        });
        assert_eq!(
            roles,
            vec![
                (Some(a), Role::Left),
                (Some(b), Role::Right),
                (Some(c), Role::Spectator)
            ]
        );
    }

    #[test]
    fn test_spectator_receives_promotion_prompt() {
        let (mut room, mut rx) = make_room();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        join(&mut room, a);
        join(&mut room, b);
        join(&mut room, c);

        let prompts = drain(&mut rx, |m| match &m.msg {
            ServerMsg::SpectatorPrompt { .. } => m.target,
            _ => None,
        });
        assert_eq!(prompts, vec![c]);
    }

    #[test]
    fn test_disconnect_promotes_waiting_spectator_and_resets() {
        let (mut room, mut rx) = make_room();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        join(&mut room, a);
        join(&mut room, b);
        join(&mut room, c);
        command(&mut room, c, ClientMsg::SpectatorResponse { accept: true });

        // Give the match some history to verify the reset
        room.state_mut().players.left.as_mut().unwrap().score = 3;
        room.state_mut().phase = MatchPhase::Active;
        room.state_mut().last_accepted.left = 9;

        command(&mut room, a, ClientMsg::Disconnect);

        assert_eq!(room.state().side_of(c), Some(Side::Left));
        assert!(room.state().waiting.is_empty());
        assert!(!room.state().spectators.contains(&c));
        assert_eq!(room.state().phase, MatchPhase::NotStarted);
        assert_eq!(room.state().players.left.as_ref().unwrap().score, 0);
        assert_eq!(room.state().players.right.as_ref().unwrap().score, 0);
        assert_eq!(room.state().last_accepted.left, 0);
        assert!(room.state().last_serve.is_none());

        let promoted = drain(&mut rx, |m| match &m.msg {
            ServerMsg::PromotedToPlayer { side } => Some((m.target, *side)),
            _ => None,
        });
        assert_eq!(promoted, vec![(Some(c), Side::Left)]);
    }

    #[test]
    fn test_disconnect_without_waiting_list_still_resets() {
        let (mut room, _rx) = make_room();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        join(&mut room, a);
        join(&mut room, b);
        room.state_mut().players.right.as_mut().unwrap().score = 2;
        room.state_mut().phase = MatchPhase::Active;

        command(&mut room, a, ClientMsg::Disconnect);

        assert!(room.state().players.left.is_none());
        assert_eq!(room.state().phase, MatchPhase::NotStarted);
        assert_eq!(room.state().players.right.as_ref().unwrap().score, 0);
        assert!(!room.is_closing());
    }

    #[test]
    fn test_room_closes_when_last_player_leaves() {
        let (mut room, _rx) = make_room();
        let a = Uuid::new_v4();
        join(&mut room, a);
        command(&mut room, a, ClientMsg::Disconnect);
        assert!(room.is_closing());
    }

    #[test]
    fn test_opt_out_spectator_is_not_promoted() {
        let (mut room, mut rx) = make_room();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        join(&mut room, a);
        join(&mut room, b);
        join(&mut room, c);
        command(&mut room, c, ClientMsg::SpectatorResponse { accept: false });

        command(&mut room, a, ClientMsg::Disconnect);

        assert!(room.state().players.left.is_none());
        assert!(room.state().spectators.contains(&c));

        let promoted = drain(&mut rx, |m| match &m.msg {
            ServerMsg::PromotedToPlayer { .. } => Some(()),
            _ => None,
        });
        assert!(promoted.is_empty());
    }

    #[test]
    fn test_start_requires_both_players() {
        let (mut room, _rx) = make_room();
        let a = Uuid::new_v4();
        join(&mut room, a);
        command(&mut room, a, ClientMsg::StartMatch);
        assert_eq!(room.state().phase, MatchPhase::NotStarted);
    }

    #[test]
    fn test_start_from_finished_clears_scores() {
        let (mut room, _rx) = make_room();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        join(&mut room, a);
        join(&mut room, b);
        room.state_mut().phase = MatchPhase::Finished;
        room.state_mut().players.left.as_mut().unwrap().score = 5;
        room.state_mut().players.right.as_mut().unwrap().score = 3;

        command(&mut room, a, ClientMsg::StartMatch);

        assert_eq!(room.state().phase, MatchPhase::AwaitingServe);
        assert_eq!(room.state().players.left.as_ref().unwrap().score, 0);
        assert_eq!(room.state().players.right.as_ref().unwrap().score, 0);
    }

    #[test]
    fn test_point_scoring_flow() {
        let (mut room, mut rx) = make_room();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        join(&mut room, a);
        join(&mut room, b);

        room.state_mut().phase = MatchPhase::Active;
        room.state_mut().turn = Side::Left;
        room.state_mut().ball = BallState {
            x: 5.0,
            y: 480.0,
            vx: -10.0,
            vy: 0.0,
            radius: physics::BALL_RADIUS,
        };

        room.run_tick(1_000);

        assert_eq!(room.state().phase, MatchPhase::AwaitingServe);
        assert_eq!(room.state().players.right.as_ref().unwrap().score, 1);
        assert_eq!(room.state().turn, Side::Right);
        assert!(room.state().last_serve.is_none());
        assert_eq!(room.state().ball.x, physics::FIELD_WIDTH / 2.0);

        let snapshots = drain(&mut rx, |m| match &m.msg {
            ServerMsg::StateSnapshot { phase, .. } => Some(*phase),
            _ => None,
        });
        assert_eq!(snapshots.last(), Some(&MatchPhase::AwaitingServe));
    }

    #[test]
    fn test_fifth_point_finishes_match() {
        let (mut room, mut rx) = make_room();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        join(&mut room, a);
        join(&mut room, b);

        room.state_mut().players.right.as_mut().unwrap().score = WIN_SCORE - 1;
        room.state_mut().phase = MatchPhase::Active;
        room.state_mut().turn = Side::Left;
        room.state_mut().ball = BallState {
            x: 5.0,
            y: 480.0,
            vx: -10.0,
            vy: 0.0,
            radius: physics::BALL_RADIUS,
        };

        room.run_tick(1_000);

        assert_eq!(room.state().phase, MatchPhase::Finished);
        assert_eq!(room.state().players.right.as_ref().unwrap().score, WIN_SCORE);

        let over = drain(&mut rx, |m| match &m.msg {
            ServerMsg::MatchOver { winner, score } => Some((*winner, *score)),
            _ => None,
        });
        assert_eq!(over, vec![(Side::Right, WIN_SCORE)]);
    }

    #[test]
    fn test_no_simulation_outside_active_phase() {
        let (mut room, _rx) = make_room();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        join(&mut room, a);
        join(&mut room, b);

        let before = room.state().ball.clone();
        room.run_tick(1_000);
        assert_eq!(room.state().ball.x, before.x);
        assert_eq!(room.state().ball.y, before.y);
    }

    /// The full session flow: join, start, out-of-turn serve rejected,
    /// in-turn serve accepted, rally scored.
    #[test]
    fn test_end_to_end_session() {
        let (mut room, mut rx) = make_room();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        join(&mut room, a);
        join(&mut room, b);
        assert_eq!(room.state().side_of(a), Some(Side::Left));
        assert_eq!(room.state().side_of(b), Some(Side::Right));

        command(&mut room, a, ClientMsg::StartMatch);
        assert_eq!(room.state().phase, MatchPhase::AwaitingServe);

        // Pin the serving side for determinism
        room.state_mut().turn = Side::Left;

        command(&mut room, b, ClientMsg::Serve { lamport: 5 });
        assert_eq!(room.state().phase, MatchPhase::AwaitingServe);
        assert!(room.state().last_serve.is_none());

        command(&mut room, a, ClientMsg::Serve { lamport: 3 });
        assert_eq!(room.state().phase, MatchPhase::Active);
        assert_eq!(room.state().last_serve.unwrap().lamport, 3);

        // Steer the rally straight at the scoring boundary
        room.state_mut().ball = BallState {
            x: 25.0,
            y: 480.0,
            vx: -10.0,
            vy: 0.0,
            radius: physics::BALL_RADIUS,
        };
        let mut now = 1_000;
        while room.state().phase == MatchPhase::Active {
            room.run_tick(now);
            now += 16;
        }

        assert_eq!(room.state().phase, MatchPhase::AwaitingServe);
        assert_eq!(room.state().players.right.as_ref().unwrap().score, 1);

        let _ = drain(&mut rx, |_| Some(()));
    }
}
