//! Transport seam, wire format and request/reply plumbing.

pub mod memory;
pub mod request;
pub mod transport;
pub mod vote;
pub mod wire;

pub use memory::{MemoryBroker, MemoryTransport};
pub use request::{RequestProvider, Requester};
pub use transport::{Delivery, MessageProps, Subscription, Transport, TransportError};
pub use vote::{VoteOutcome, VoteRequest, VoteResult};
pub use wire::{PlayerDetails, PlayerType, Tile, WireError};
