//! Game Logic Module
//!
//! Match rules with no I/O. Everything here is synchronous and testable on
//! its own; randomness for the CPU opponent is injected by the caller.
//!
//! ## Module Structure
//!
//! - `moves`: Hand shapes and the round resolver
//! - `state`: Match entity, identifiers, transition rules
//! - `events`: Facts produced by transitions

pub mod moves;
pub mod state;
pub mod events;

// Re-export key types
pub use moves::{Move, RoundOutcome, resolve};
pub use state::{
    CompletedMatch, FinishReason, Match, MatchId, MatchKind, MatchStatus, PlayerId, Rejection, Side,
};
pub use events::{GameEvent, GameEventData};
