//! Protocol timing and sizing parameters.

use std::time::Duration;

/// Number of players in a full game.
pub const NB_PLAYERS: usize = 4;

/// Default lifetime of request/reply rounds.
pub const REQUEST_LIFETIME: Duration = Duration::from_millis(2000);

/// Default interval between heartbeat beacons.
pub const HEARTBEAT_FREQUENCY: Duration = Duration::from_millis(2000);

/// Default silence after which a peer is declared missing.
pub const HEARTBEAT_LIFETIME: Duration = Duration::from_millis(5000);

/// Tunable protocol parameters.
///
/// The defaults are the protocol constants; tests shrink the durations.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Number of players in a full game.
    pub nb_players: usize,
    /// Lifetime of request/reply rounds (join vote, team ping).
    pub request_lifetime: Duration,
    /// Interval between heartbeat beacons.
    pub heartbeat_frequency: Duration,
    /// Silence after which a confirmed peer is declared missing.
    pub heartbeat_lifetime: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            nb_players: NB_PLAYERS,
            request_lifetime: REQUEST_LIFETIME,
            heartbeat_frequency: HEARTBEAT_FREQUENCY,
            heartbeat_lifetime: HEARTBEAT_LIFETIME,
        }
    }
}
