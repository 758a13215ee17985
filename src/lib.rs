//! # RPS Arena Server
//!
//! Authoritative match server for Rock/Paper/Scissors: matchmaking, hidden
//! simultaneous moves, first-to-three matches and a win leaderboard.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     RPS ARENA SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game/           - Match rules (no I/O)                      │
//! │  ├── moves.rs    - Moves and the round resolver              │
//! │  ├── state.rs    - Match entity and transitions              │
//! │  └── events.rs   - Facts emitted by transitions              │
//! │                                                              │
//! │  network/        - Coordination and transport                │
//! │  ├── server.rs   - WebSocket server                          │
//! │  ├── auth.rs     - Token validation                          │
//! │  ├── protocol.rs - Message types                             │
//! │  ├── coordinator.rs - Match operations                       │
//! │  ├── session.rs  - Per-match locking and delivery            │
//! │  ├── directory.rs - Open matches                             │
//! │  └── fanout.rs   - All-clients snapshots                     │
//! │                                                              │
//! │  store/          - Durable users and match records           │
//! │  ranking.rs      - Stats and leaderboard                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! Each match sits behind its own lock, so matches never contend. The open
//! match directory is a single lock; claiming a match removes it in the
//! same critical section. Store writes are queued to one background task
//! and never happen while a match is locked.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod game;
pub mod network;
pub mod ranking;
pub mod store;

// Re-export commonly used types
pub use game::moves::{resolve, Move, RoundOutcome};
pub use game::state::{Match, MatchId, MatchKind, PlayerId};
pub use network::coordinator::MatchCoordinator;
pub use store::{GameStore, InMemoryStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Round wins needed to take a match.
pub const WIN_THRESHOLD: u32 = 3;
