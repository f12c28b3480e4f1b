//! Peer timing configuration

use std::time::Duration;

/// Timing knobs for the protocol and reunion loops.
///
/// Defaults follow the protocol's designed cadence: the reunion valid
/// window is a generous multiple of the reunion tick so a single lost
/// hello never triggers re-discovery, and the root's remove threshold
/// sits well past its turn-off threshold to give a suspected peer a
/// grace window to self-heal.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Main protocol loop period: drain inbound, dispatch, flush.
    pub main_tick: Duration,
    /// Reunion timer period (non-root hello cadence).
    pub reunion_tick: Duration,
    /// How long a hello may stay unanswered before the path to root is
    /// considered broken and the peer re-advertises.
    pub reunion_valid: Duration,
    /// Root: silence after which a peer's subtree is excluded from
    /// neighbour assignment.
    pub turn_off_after: Duration,
    /// Root: silence after which a peer is expired outright.
    pub remove_after: Duration,
    /// Display event channel capacity.
    pub event_capacity: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            main_tick: Duration::from_secs(2),
            reunion_tick: Duration::from_secs(4),
            reunion_valid: Duration::from_secs(32),
            turn_off_after: Duration::from_secs(16),
            remove_after: Duration::from_secs(60),
            event_capacity: 64,
        }
    }
}

impl PeerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_main_tick(mut self, period: Duration) -> Self {
        self.main_tick = period;
        self
    }

    pub fn with_reunion_tick(mut self, period: Duration) -> Self {
        self.reunion_tick = period;
        self
    }

    pub fn with_reunion_valid(mut self, window: Duration) -> Self {
        self.reunion_valid = window;
        self
    }

    pub fn with_turn_off_after(mut self, threshold: Duration) -> Self {
        self.turn_off_after = threshold;
        self
    }

    pub fn with_remove_after(mut self, threshold: Duration) -> Self {
        self.remove_after = threshold;
        self
    }
}
