//! Pure coordination data structures.
//!
//! Everything in here is transport-free and mutated only by the client
//! state machine: the lifecycle enums, the three-bucket membership
//! register and the roll table. Iteration order is deterministic
//! (`BTreeMap` throughout) so every peer derives identical decisions from
//! identical inputs.

pub mod register;
pub mod roll;
pub mod state;

pub use register::{PlayerRegister, PlayerState};
pub use roll::{PlayerRoll, RollTable};
pub use state::{DisconnectReason, GameState};
