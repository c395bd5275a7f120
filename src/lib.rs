//! # HTTTP
//!
//! Peer-to-peer coordination protocol for a four-robot maze game. There
//! is no central server: each participant runs one peer, and the peers
//! agree on membership, roles and lifecycle among themselves over a
//! topic publish/subscribe broker.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          HTTTP                               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Coordination data (deterministic)         │
//! │  ├── state.rs    - Lifecycle and disconnect-reason enums     │
//! │  ├── register.rs - Confirmed / voted / missing membership    │
//! │  └── roll.rs     - Roll table and number assignment          │
//! │                                                              │
//! │  network/        - Transport seam and wire plumbing          │
//! │  ├── transport.rs- Topic pub/sub trait (narrow)              │
//! │  ├── memory.rs   - In-memory broker for tests and demos      │
//! │  ├── wire.rs     - Topics, payloads, JSON codec              │
//! │  ├── request.rs  - Correlated request/reply with deadlines   │
//! │  └── vote.rs     - Quorum voting over request/reply          │
//! │                                                              │
//! │  client/         - The peers                                 │
//! │  ├── player.rs   - State machine, join/rejoin, heartbeats,   │
//! │  │                 rolls, seesaws, teams                     │
//! │  ├── spectator.rs- Read-only observer                        │
//! │  └── handler.rs  - Event contracts and dispatch              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Coordination guarantees
//!
//! - Membership is agreed by quorum vote; a vote that times out without
//!   a reject succeeds (the first peer joins an empty exchange).
//! - Player numbers are derived identically on every peer from the same
//!   unordered set of rolls (ties break by player identifier).
//! - Crashed peers are detected by heartbeat expiry; every remaining
//!   peer reaches the same conclusion independently and duplicates are
//!   suppressed.
//! - A disconnected peer may rejoin under its previous identity; its
//!   found-object flag, team and number are restored.
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use htttp::{MemoryBroker, PlayerClient, PlayerDetails, PlayerType};
//!
//! let broker = MemoryBroker::new();
//! let details = PlayerDetails::new("brainy", PlayerType::Robot, 0.4, 0.4);
//! let client = PlayerClient::new(Arc::new(broker.open()), handler, "maze-1", details);
//!
//! client.join().await?;            // resolves on quorum or timeout
//! client.set_ready(true).await?;   // the last ready toggle starts the game
//! // ... while playing:
//! client.update_position(1.0, 2.0, 90.0).await?;
//! client.lock_seesaw(17).await?;
//! client.unlock_seesaw().await?;
//! client.leave().await?;
//! ```
//!
//! Handlers implement [`PlayerHandler`] (or [`SpectatorHandler`]) and
//! receive lifecycle callbacks after each transition commits. Any topic
//! broker satisfying the [`Transport`] trait can replace the in-memory
//! one.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod client;
pub mod core;
pub mod network;

pub use client::{
    ClientConfig, ClientError, Dispatcher, GameHandler, PlayerClient, PlayerHandler,
    SpectatorClient, SpectatorHandler,
};
pub use core::{DisconnectReason, GameState};
pub use network::{
    MemoryBroker, MemoryTransport, PlayerDetails, PlayerType, Tile, Transport, TransportError,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
