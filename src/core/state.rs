//! Game lifecycle states and disconnect reasons.

use serde::{Deserialize, Serialize};

/// Lifecycle of a peer's view of the game.
///
/// The variant order doubles as a progress ranking: when a join reply
/// advertises the party's state, the joiner adopts it only if it ranks
/// above its own, so a sparse or late reply can never downgrade progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameState {
    /// Not connected to any game.
    Disconnected,
    /// Join vote in flight; membership not yet ratified.
    Joining,
    /// In the lobby, waiting for the party to fill.
    Waiting,
    /// Lobby full and numbers rolled; waiting for the start broadcast.
    Starting,
    /// Game in progress.
    Playing,
    /// Game suspended until missing players rejoin and everyone is ready.
    Paused,
}

impl GameState {
    /// Whether this peer is connected to a game at all.
    pub fn is_connected(self) -> bool {
        self != GameState::Disconnected
    }

    /// Whether this peer is connected and past the join vote.
    pub fn is_joined(self) -> bool {
        self.is_connected() && self != GameState::Joining
    }

    /// Whether player numbers are meaningful in this state.
    pub fn has_numbers(self) -> bool {
        matches!(
            self,
            GameState::Starting | GameState::Playing | GameState::Paused
        )
    }
}

/// Why a peer left the game.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisconnectReason {
    /// The peer left voluntarily.
    Leave,
    /// The peer's join vote was rejected.
    Reject,
    /// The peer's heartbeat expired.
    Timeout,
}
