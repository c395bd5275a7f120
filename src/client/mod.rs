//! Player and spectator front-ends over the coordination core.

pub mod config;
pub mod handler;
pub mod player;
pub mod spectator;

pub use config::ClientConfig;
pub use handler::{Dispatcher, GameHandler, PlayerHandler, SpectatorHandler};
pub use player::PlayerClient;
pub use spectator::SpectatorClient;

use crate::network::transport::TransportError;
use crate::network::wire::WireError;

/// Errors surfaced by the player and spectator clients.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The operation is not permitted in the current state. Never
    /// retried; the message names the violated requirement.
    #[error("precondition violated: {0}")]
    Precondition(&'static str),

    /// The join vote was rejected by a peer.
    #[error("join request rejected")]
    JoinRejected,

    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A payload could not be encoded or decoded.
    #[error(transparent)]
    Wire(#[from] WireError),
}
