//! Lamport-style logical clock.
//!
//! Every replica carries its own clock. Local mutations advance it with
//! `tick`; folding in a remote change advances it past the sender's value
//! with `update`. Either way the clock is strictly increasing, so every
//! event observed by a replica gets a fresh, ever-growing version number.

use serde::{Deserialize, Serialize};

/// A logical clock value.
pub type Version = u64;

/// Identifier of a replica.
///
/// Doubles as the deterministic tie-breaker in conflict resolution, so it
/// must be unique across the cluster.
pub type NodeId = u64;

/// Monotonic logical clock for one replica.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalClock {
    time: Version,
}

impl LogicalClock {
    /// Create a clock starting at time 0.
    pub fn new() -> Self {
        Self { time: 0 }
    }

    /// Create a clock resumed at a known time, e.g. after loading state.
    pub fn starting_at(time: Version) -> Self {
        Self { time }
    }

    /// Advance for a local event and return the new time.
    pub fn tick(&mut self) -> Version {
        self.time += 1;
        self.time
    }

    /// Fold in a received time and advance past it.
    pub fn update(&mut self, received: Version) -> Version {
        self.time = self.time.max(received);
        self.time += 1;
        self.time
    }

    /// Current time. Pure read.
    pub fn current_time(&self) -> Version {
        self.time
    }
}
