//! Offloaded simulation stepping
//!
//! When enabled, a room delegates its physics step to a dedicated
//! worker task. Frames travel one way over an mpsc channel and results
//! travel back over another; there is no shared mutable state. The room
//! applies a result only once received (tagged by tick) and keeps at
//! most one frame in flight, so the authoritative copy never reflects a
//! speculative update.

use tokio::sync::mpsc;
use tracing::debug;

use super::physics::{self, SimFrame, StepOutcome};

/// Frame submitted to the worker
#[derive(Debug)]
struct OffloadRequest {
    tick: u64,
    frame: SimFrame,
}

/// Stepped frame returned by the worker
#[derive(Debug)]
pub struct OffloadResult {
    pub tick: u64,
    pub frame: SimFrame,
    pub outcome: StepOutcome,
}

/// Room-side handle to the simulation worker
pub struct OffloadHandle {
    request_tx: mpsc::Sender<OffloadRequest>,
    result_rx: mpsc::Receiver<OffloadResult>,
    in_flight: bool,
    last_applied: u64,
}

impl OffloadHandle {
    /// Spawn a worker task and return the handle connected to it
    pub fn spawn() -> Self {
        let (request_tx, mut request_rx) = mpsc::channel::<OffloadRequest>(64);
        let (result_tx, result_rx) = mpsc::channel::<OffloadResult>(64);

        tokio::spawn(async move {
            while let Some(OffloadRequest { tick, mut frame }) = request_rx.recv().await {
                let outcome = physics::step(&mut frame);
                if result_tx
                    .send(OffloadResult {
                        tick,
                        frame,
                        outcome,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            debug!("Simulation worker stopped");
        });

        Self {
            request_tx,
            result_rx,
            in_flight: false,
            last_applied: 0,
        }
    }

    /// Submit a frame unless one is already in flight
    pub fn submit(&mut self, tick: u64, frame: SimFrame) {
        if self.in_flight {
            return;
        }
        if self
            .request_tx
            .try_send(OffloadRequest { tick, frame })
            .is_ok()
        {
            self.in_flight = true;
        }
    }

    /// Drop the in-flight frame, if any. Results computed from state
    /// at or before `current_tick` will be ignored when they arrive.
    pub fn discard_pending(&mut self, current_tick: u64) {
        self.last_applied = self.last_applied.max(current_tick);
        self.in_flight = false;
    }

    /// Take the newest completed result, discarding anything stale
    pub fn take_result(&mut self) -> Option<OffloadResult> {
        let mut latest: Option<OffloadResult> = None;
        while let Ok(result) = self.result_rx.try_recv() {
            if result.tick > self.last_applied
                && latest.as_ref().map_or(true, |l| result.tick > l.tick)
            {
                latest = Some(result);
            }
        }
        if let Some(result) = latest.as_ref() {
            self.last_applied = result.tick;
            self.in_flight = false;
        }
        latest
    }
}
