//! Ball physics and court constants
//!
//! The stepper is a pure function over a [`SimFrame`] so the same code
//! runs inline in the room task or inside the offload worker.

use crate::ws::protocol::{BallState, Side};

/// Court dimensions (must match the reference client exactly)
pub const FIELD_WIDTH: f32 = 800.0;
pub const FIELD_HEIGHT: f32 = 500.0;
pub const BALL_RADIUS: f32 = 10.0;
/// Ball velocity per tick on each axis at serve
pub const BALL_SPEED: f32 = 10.0;
pub const PADDLE_HEIGHT: f32 = 100.0;
/// Paddle displacement per accepted move command
pub const PADDLE_STEP: f32 = 50.0;
/// Fixed paddle x positions (both on the scoring side, squash style)
pub const LEFT_PADDLE_X: f32 = 50.0;
pub const RIGHT_PADDLE_X: f32 = 100.0;
/// Initial paddle y position
pub const PADDLE_START_Y: f32 = 200.0;
/// Points needed to win the match
pub const WIN_SCORE: u32 = 5;
/// Delay before the defending turn passes to the other side after a
/// paddle contact. Prevents double-reflection within one contact window.
pub const TURN_REARM_MS: u64 = 1000;

/// Canonical ball state: center court, fixed speed and direction
pub fn reset_ball() -> BallState {
    BallState {
        x: FIELD_WIDTH / 2.0,
        y: FIELD_HEIGHT / 2.0,
        vx: BALL_SPEED,
        vy: BALL_SPEED,
        radius: BALL_RADIUS,
    }
}

/// The simulation state for a single step, detached from room bookkeeping
#[derive(Debug, Clone)]
pub struct SimFrame {
    pub ball: BallState,
    /// Side currently due to defend/serve
    pub turn: Side,
    pub left_y: f32,
    pub right_y: f32,
    /// Scheduled turn flip deadline in unix millis, if a contact is pending
    pub turn_flip_deadline: Option<u64>,
    /// Wall clock for this step in unix millis
    pub now_ms: u64,
}

/// Result of one simulation step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    None,
    /// Ball crossed the scoring boundary; the non-defending side scores
    PointScored { winner: Side },
}

/// Advance the ball by one tick and resolve collisions.
///
/// Order matters: the pending turn flip is applied first, then movement,
/// wall bounces, paddle contact, and finally the scoring check.
pub fn step(frame: &mut SimFrame) -> StepOutcome {
    if let Some(deadline) = frame.turn_flip_deadline {
        if frame.now_ms >= deadline {
            frame.turn = frame.turn.other();
            frame.turn_flip_deadline = None;
        }
    }

    let ball = &mut frame.ball;
    ball.x += ball.vx;
    ball.y += ball.vy;

    // Bounce off top/bottom
    if ball.y < ball.radius || ball.y > FIELD_HEIGHT - ball.radius {
        ball.vy = -ball.vy;
    }

    // Bounce off the far (non-scoring) wall
    if ball.x > FIELD_WIDTH - ball.radius {
        ball.vx = -ball.vx;
    }

    // Paddle contact. While a turn flip is pending the bands are
    // disarmed so one contact cannot reflect twice.
    if frame.turn_flip_deadline.is_none() && ball.x - ball.radius < RIGHT_PADDLE_X {
        let in_left_band = ball.x > LEFT_PADDLE_X - 10.0 && ball.x < LEFT_PADDLE_X + 10.0;
        let in_right_band = ball.x > RIGHT_PADDLE_X - 10.0 && ball.x < RIGHT_PADDLE_X + 10.0;

        if in_left_band
            && frame.turn == Side::Left
            && overlaps_paddle(ball.y, frame.left_y)
        {
            ball.vx = -ball.vx;
            frame.turn_flip_deadline = Some(frame.now_ms + TURN_REARM_MS);
        } else if in_right_band
            && frame.turn == Side::Right
            && overlaps_paddle(ball.y, frame.right_y)
        {
            ball.vx = -ball.vx;
            frame.turn_flip_deadline = Some(frame.now_ms + TURN_REARM_MS);
        }
    }

    // Scoring boundary
    if frame.ball.x < 0.0 {
        return StepOutcome::PointScored {
            winner: frame.turn.other(),
        };
    }

    StepOutcome::None
}

fn overlaps_paddle(ball_y: f32, paddle_y: f32) -> bool {
    ball_y >= paddle_y && ball_y <= paddle_y + PADDLE_HEIGHT
}

/// Clamp a paddle y position to the playfield
pub fn clamp_paddle_y(y: f32) -> f32 {
    y.clamp(0.0, FIELD_HEIGHT - PADDLE_HEIGHT)
}
