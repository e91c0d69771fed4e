//! Lamport-style logical clock

/// Monotonically increasing logical counter.
///
/// The room owns one observation clock updated on every inbound command
/// that carries a peer timestamp. Its value is only used for ordering
/// diagnostics in logs; admission decisions read the per-channel
/// `last_serve` / `last_accepted` fields on the room instead.
#[derive(Debug, Clone, Default)]
pub struct LamportClock {
    counter: u64,
}

impl LamportClock {
    pub fn new() -> Self {
        Self { counter: 0 }
    }

    /// Advance before an outgoing state-mutating message
    pub fn tick(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    /// Merge a received peer timestamp: max(local, received) + 1
    pub fn observe(&mut self, received: u64) -> u64 {
        self.counter = self.counter.max(received) + 1;
        self.counter
    }

    pub fn current(&self) -> u64 {
        self.counter
    }
}
